use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use stash_core::{storage::RecordTable, DurableRecord, StorageError};
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

const RECORD_EXT: &str = "json";

/// Directory-backed `RecordTable`: one JSON file per row, written atomically.
///
/// Rows are named by the SHA-256 of their id; the id itself lives in the row.
pub struct FileRecordTable {
    root: PathBuf,
}

impl FileRecordTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(file_stem(id)).with_extension(RECORD_EXT)
    }
}

#[async_trait]
impl RecordTable for FileRecordTable {
    #[instrument(skip_all, fields(id = %record.id))]
    async fn put(&self, record: DurableRecord) -> Result<(), StorageError> {
        let path = self.path_for(&record.id);
        let json = serde_json::to_vec(&record)?;
        write_atomic(&path, &json)
    }

    #[instrument(skip_all, fields(id))]
    async fn get(&self, id: &str) -> Result<Option<DurableRecord>, StorageError> {
        let path = self.path_for(id);
        let Some(bytes) = read_file(&path)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<DurableRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(%err, "corrupt durable record treated as missing");
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(id))]
    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::transaction(err)),
        }
    }

    #[instrument(skip_all)]
    async fn scan_by_created(&self) -> Result<Vec<DurableRecord>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::transaction(err)),
        };

        let mut rows = Vec::new();
        for entry in entries {
            let path = entry.map_err(StorageError::transaction)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(bytes) = read_file(&path)? else {
                continue;
            };
            match serde_json::from_slice::<DurableRecord>(&bytes) {
                Ok(record) => rows.push(record),
                Err(err) => warn!(path = %path.display(), %err, "skipping corrupt durable record"),
            }
        }
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| StorageError::Transaction {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(StorageError::transaction)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StorageError::transaction)?;
    tmp.write_all(bytes).map_err(StorageError::transaction)?;
    tmp.flush().map_err(StorageError::transaction)?;
    tmp.persist(path).map_err(|e| StorageError::transaction(e.error))?;
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::transaction(err)),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StorageError::transaction)?;
    Ok(Some(buf))
}

fn file_stem(id: &str) -> String {
    Sha256::digest(id.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
