//! Business-facing storage adapters. Each adapter owns a fixed catalogue of
//! named records, each pinned to one tier and TTL, and is the only code that
//! touches those keys.

pub mod auth;
pub mod cart;
pub mod catalogue;
pub mod models;

pub use auth::AuthStorage;
pub use cart::CartStorage;

use async_trait::async_trait;

/// An adapter that can drop every record it owns in one call.
#[async_trait]
pub trait OwnedRecords: Send + Sync {
    /// Short name for logs and CLI output (e.g., "cart", "auth").
    fn name(&self) -> &'static str;

    /// Remove every owned record across both tiers; already-absent records are fine.
    async fn clear_all(&self) -> anyhow::Result<()>;
}
