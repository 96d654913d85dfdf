//! Read-only reference face stores.

use crate::types::{Embedding, ReferenceRecord};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const SQLITE_QUERY: &str =
    "SELECT id, embedding, model_version FROM reference_faces ORDER BY rowid";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid store {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid record '{id}': {message}")]
    InvalidRecord { id: String, message: String },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Read-only enumeration of enrolled faces, in store order.
pub trait ReferenceStore: Send + Sync {
    fn records(&self) -> Result<Vec<ReferenceRecord>, StoreError>;
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<ReferenceRecord>,
}

impl MemoryStore {
    pub fn new(records: Vec<ReferenceRecord>) -> Self {
        Self { records }
    }
}

impl ReferenceStore for MemoryStore {
    fn records(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        validate_records(&self.records)?;
        Ok(self.records.clone())
    }
}

/// JSON array of `{"id", "embedding": {"values", "model_version"}}`,
/// re-read on every query.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReferenceStore for JsonStore {
    fn records(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }
        let data = std::fs::read(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let records: Vec<ReferenceRecord> =
            serde_json::from_slice(&data).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        validate_records(&records)?;
        Ok(records)
    }
}

/// SQLite database with a `reference_faces(id, embedding, model_version)`
/// table. Embeddings are little-endian `f32` blobs. Opened read-only.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReferenceStore for SqliteStore {
    fn records(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut stmt = conn.prepare(SQLITE_QUERY)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, blob, model_version) = row?;
            let values = decode_blob(&id, &blob)?;
            let record = ReferenceRecord {
                id,
                embedding: Embedding { values, model_version },
            };
            records.push(record);
        }
        validate_records(&records)?;
        Ok(records)
    }
}

#[cfg(test)]
fn encode_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_blob(id: &str, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidRecord {
            id: id.to_string(),
            message: format!("embedding blob length {} is not a multiple of 4", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn validate_record(record: &ReferenceRecord) -> Result<(), StoreError> {
    let invalid = |message: &str| StoreError::InvalidRecord {
        id: record.id.clone(),
        message: message.to_string(),
    };
    if record.id.trim().is_empty() {
        return Err(invalid("empty identifier"));
    }
    if record.embedding.values.is_empty() {
        return Err(invalid("empty embedding"));
    }
    if record.embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(invalid("embedding contains non-finite values"));
    }
    if record.embedding.norm() == 0.0 {
        return Err(invalid("zero-norm embedding"));
    }
    Ok(())
}

/// Every record must be usable and all records must share one dimension.
fn validate_records(records: &[ReferenceRecord]) -> Result<(), StoreError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let dim = first.embedding.dim();
    for record in records {
        validate_record(record)?;
        if record.embedding.dim() != dim {
            return Err(StoreError::InvalidRecord {
                id: record.id.clone(),
                message: format!(
                    "embedding has {} dimensions, store records have {dim}",
                    record.embedding.dim()
                ),
            });
        }
    }
    Ok(())
}

/// Open a store by file extension: `.db`/`.sqlite`/`.sqlite3` → SQLite, otherwise JSON.
pub fn open_store(path: &Path) -> Arc<dyn ReferenceStore> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("db" | "sqlite" | "sqlite3") => Arc::new(SqliteStore::new(path)),
        _ => Arc::new(JsonStore::new(path)),
    }
}
