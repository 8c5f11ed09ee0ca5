//! Record persistence layer for TouristID

use crate::error::StoreError;
use crate::registration::CanonicalDocument;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::RwLock;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Where a record sits in the store-then-chain protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Written, ledger append not yet confirmed.
    Pending,
    /// Linked into the ledger at `block_index`.
    Committed,
    /// The ledger append never happened; kept for audit only.
    Orphaned,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Committed => "committed",
            RecordStatus::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "committed" => Ok(RecordStatus::Committed),
            "orphaned" => Ok(RecordStatus::Orphaned),
            other => Err(StoreError::Serialization(format!("unknown record status {}", other))),
        }
    }
}

/// A persisted registration. The canonical bytes and digest never change
/// after `put`; only `status` and `block_index` move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub tourist_name: String,
    pub digital_id_expiry: String,
    pub data_hash: String,
    pub raw_data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub block_index: Option<u64>,
}

impl StoredRecord {
    pub fn pending(document: &CanonicalDocument, raw_data: Vec<u8>, data_hash: String) -> Self {
        StoredRecord {
            id: document.id.clone(),
            tourist_name: document.tourist_name.clone(),
            digital_id_expiry: document.digital_id_expiry.clone(),
            data_hash,
            raw_data,
            created_at: Utc::now().trunc_subsecs(6),
            status: RecordStatus::Pending,
            block_index: None,
        }
    }

    pub fn document(&self) -> Result<CanonicalDocument, StoreError> {
        CanonicalDocument::from_canonical_bytes(&self.raw_data)
            .map_err(|e| StoreError::Serialization(format!("Failed to decode stored document: {}", e)))
    }
}

/// Keyed storage of registration records. Backends know nothing about the
/// ledger; the pipeline drives the status transitions.
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` rather than overwrite.
    fn put(&self, record: &StoredRecord) -> Result<(), StoreError>;
    fn get(&self, id: &str) -> Result<StoredRecord, StoreError>;
    fn find_by_digest(&self, data_hash: &str) -> Result<Option<StoredRecord>, StoreError>;
    fn mark_committed(&self, id: &str, block_index: u64) -> Result<(), StoreError>;
    fn mark_orphaned(&self, id: &str) -> Result<(), StoreError>;
    /// Pending records created strictly before `cutoff`, oldest first.
    fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredRecord>, StoreError>;
}

const RECORD_COLUMNS: &str =
    "id, tourist_name, digital_expiry, data_hash, raw_data, created_at, status, block_index";

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let created_at: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let status: String = row.get(6)?;
    let status = RecordStatus::parse(&status)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let block_index: Option<i64> = row.get(7)?;

    Ok(StoredRecord {
        id: row.get(0)?,
        tourist_name: row.get(1)?,
        digital_id_expiry: row.get(2)?,
        data_hash: row.get(3)?,
        raw_data: row.get(4)?,
        created_at,
        status,
        block_index: block_index.map(|i| i as u64),
    })
}

/// SQLite-backed record store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Database(format!("Failed to create data dir {:?}: {}", parent, e))
                    })?;
                }
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Database(format!("Failed to open database: {}", e)))?;

        if path != ":memory:" {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Database(format!("Failed to enable WAL: {}", e)))?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tourist_data (
                id TEXT PRIMARY KEY,
                tourist_name TEXT NOT NULL,
                digital_expiry TEXT NOT NULL,
                data_hash TEXT NOT NULL,
                raw_data BLOB NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                block_index INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tourist_data_hash ON tourist_data(data_hash);
            CREATE INDEX IF NOT EXISTS idx_tourist_data_status ON tourist_data(status, created_at);",
        )
        .map_err(|e| StoreError::Database(format!("Failed to create tourist_data table: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("Mutex poisoned".to_string()))
    }

    fn transition(&self, id: &str, to: RecordStatus, block_index: Option<u64>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tourist_data SET status = ?2, block_index = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, to.as_str(), block_index.map(|i| i as i64)],
            )
            .map_err(|e| StoreError::Database(format!("Failed to update record status: {}", e)))?;
        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row("SELECT status FROM tourist_data WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        match current {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(status) => Err(StoreError::NotPending { id: id.to_string(), status }),
        }
    }
}

impl RecordStore for Database {
    fn put(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO tourist_data ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                RECORD_COLUMNS
            ),
            params![
                record.id,
                record.tourist_name,
                record.digital_id_expiry,
                record.data_hash,
                record.raw_data,
                format_timestamp(&record.created_at),
                record.status.as_str(),
                record.block_index.map(|i| i as i64),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(record.id.clone()))
            }
            Err(e) => Err(StoreError::Database(format!("Failed to save record: {}", e))),
        }
    }

    fn get(&self, id: &str) -> Result<StoredRecord, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM tourist_data WHERE id = ?1", RECORD_COLUMNS),
            params![id],
            record_from_row,
        )
        .optional()
        .map_err(|e| StoreError::Database(format!("Failed to load record: {}", e)))?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find_by_digest(&self, data_hash: &str) -> Result<Option<StoredRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM tourist_data WHERE data_hash = ?1 ORDER BY created_at ASC LIMIT 1",
                RECORD_COLUMNS
            ),
            params![data_hash],
            record_from_row,
        )
        .optional()
        .map_err(|e| StoreError::Database(format!("Failed to query by digest: {}", e)))
    }

    fn mark_committed(&self, id: &str, block_index: u64) -> Result<(), StoreError> {
        self.transition(id, RecordStatus::Committed, Some(block_index))
    }

    fn mark_orphaned(&self, id: &str) -> Result<(), StoreError> {
        self.transition(id, RecordStatus::Orphaned, None)
    }

    fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tourist_data
                 WHERE status = 'pending' AND created_at < ?1
                 ORDER BY created_at ASC",
                RECORD_COLUMNS
            ))
            .map_err(|e| StoreError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![format_timestamp(&cutoff)], record_from_row)
            .map_err(|e| StoreError::Database(format!("Failed to query pending records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| StoreError::Database(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(records)
    }
}

/// Simple in-memory record store useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn transition(&self, id: &str, to: RecordStatus, block_index: Option<u64>) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.status != RecordStatus::Pending {
            return Err(StoreError::NotPending {
                id: id.to_string(),
                status: record.status.as_str().to_string(),
            });
        }
        record.status = to;
        record.block_index = block_index;
        Ok(())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn put(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<StoredRecord, StoreError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find_by_digest(&self, data_hash: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.data_hash == data_hash)
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    fn mark_committed(&self, id: &str, block_index: u64) -> Result<(), StoreError> {
        self.transition(id, RecordStatus::Committed, Some(block_index))
    }

    fn mark_orphaned(&self, id: &str) -> Result<(), StoreError> {
        self.transition(id, RecordStatus::Orphaned, None)
    }

    fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredRecord>, StoreError> {
        let mut pending: Vec<StoredRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.status == RecordStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}
