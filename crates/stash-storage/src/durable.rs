use std::sync::Arc;

use serde_json::Value;
use stash_core::{
    storage::RecordTable, Clock, DurableOptions, DurableRecord, StorageError, SystemClock,
};
use tracing::{debug, instrument, warn};

/// Cross-reload tier for larger payloads, backed by a structured table.
///
/// Records are stored unencrypted. When the platform has no structured
/// storage every operation resolves to a no-op.
#[derive(Clone)]
pub struct DurableStore {
    table: Option<Arc<dyn RecordTable>>,
    clock: Arc<dyn Clock>,
}

impl DurableStore {
    pub fn new(table: Option<Arc<dyn RecordTable>>) -> Self {
        Self::with_clock(table, Arc::new(SystemClock))
    }

    pub fn with_clock(table: Option<Arc<dyn RecordTable>>, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }

    pub fn is_available(&self) -> bool {
        self.table.is_some()
    }

    #[instrument(skip_all, fields(id))]
    pub async fn store(
        &self,
        id: &str,
        data: Value,
        opts: DurableOptions,
    ) -> Result<(), StorageError> {
        validate_id(id)?;
        let Some(table) = &self.table else {
            return Ok(());
        };
        let record = DurableRecord::new(id, data, self.clock.now(), opts.expires_in_ms)?;
        table.put(record).await
    }

    #[instrument(skip_all, fields(id))]
    pub async fn get(&self, id: &str) -> Result<Option<Value>, StorageError> {
        validate_id(id)?;
        let Some(table) = &self.table else {
            return Ok(None);
        };
        let Some(record) = table.get(id).await? else {
            return Ok(None);
        };

        if record.is_expired(self.clock.now()) {
            debug!("durable record expired");
            if let Err(err) = table.delete(id).await {
                warn!(%err, "failed to remove expired durable record");
            }
            return Ok(None);
        }
        Ok(Some(record.data))
    }

    #[instrument(skip_all, fields(id))]
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        match &self.table {
            Some(table) => table.delete(id).await,
            None => Ok(()),
        }
    }

    /// Delete every expired record; returns how many were removed.
    #[instrument(skip_all)]
    pub async fn clear_expired(&self) -> Result<usize, StorageError> {
        let Some(table) = &self.table else {
            return Ok(0);
        };
        let now = self.clock.now();
        let mut removed = 0;
        for record in table.scan_by_created().await? {
            if record.is_expired(now) {
                table.delete(&record.id).await?;
                removed += 1;
            }
        }
        debug!(removed, "swept expired durable records");
        Ok(removed)
    }
}

fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() {
        return Err(StorageError::InvalidArgument {
            reason: "record id must not be empty".into(),
        });
    }
    Ok(())
}
