//! Core contracts for stash: the record envelope, write options, storage
//! errors, clocks and the backend traits both storage tiers are built on.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod clock;
pub mod error;
pub mod record;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StorageError;
pub use record::{DurableOptions, DurableRecord, StoredRecord, WriteOptions};
