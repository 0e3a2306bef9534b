//! SQLite-backed symbol store.
//!
//! Each public method opens its own connection so callers never manage
//! connection lifetime, and the store can be shared across threads freely.
//! Records are kept as JSON documents keyed by `(upload_id, ordinal)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{CodemapError, CodemapResult};
use crate::models::{SymbolRecord, UploadId};
use crate::store::{normalize_records, not_analyzed, schema, StoreEntry, SymbolStore};

/// One row of `ingested_uploads`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedUpload {
    pub upload_id: UploadId,
    pub ingested_at: String,
    pub file_count: usize,
}

pub struct SqliteSymbolStore {
    db_path: PathBuf,
}

impl SqliteSymbolStore {
    /// Open the database at `db_path`, creating parent directories and the
    /// schema as needed.
    pub fn open(db_path: impl Into<PathBuf>) -> CodemapResult<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> CodemapResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Set WAL mode, create the base tables, then run pending migrations.
    pub fn init_schema(&self) -> CodemapResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    /// Every ingested upload, most recent first.
    pub fn ingested_uploads(&self) -> CodemapResult<Vec<IngestedUpload>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT upload_id, ingested_at, file_count FROM ingested_uploads \
             ORDER BY ingested_at DESC, upload_id;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut uploads = Vec::new();
        for row in rows {
            let (raw_id, ingested_at, file_count) = row?;
            uploads.push(IngestedUpload {
                upload_id: UploadId::parse(&raw_id)?,
                ingested_at,
                file_count: file_count.max(0) as usize,
            });
        }
        Ok(uploads)
    }

    fn is_ingested(conn: &Connection, upload_id: &UploadId) -> CodemapResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM ingested_uploads WHERE upload_id = ?1;",
                params![upload_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl SymbolStore for SqliteSymbolStore {
    fn ingest(&self, upload_id: &UploadId, records: Vec<SymbolRecord>) -> CodemapResult<StoreEntry> {
        let records = normalize_records(records);
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM symbol_records WHERE upload_id = ?1;",
            params![upload_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM ingested_uploads WHERE upload_id = ?1;",
            params![upload_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO ingested_uploads(upload_id, ingested_at, file_count) VALUES (?1, ?2, ?3);",
            params![
                upload_id.as_str(),
                Utc::now().to_rfc3339(),
                records.len() as i64
            ],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO symbol_records(upload_id, ordinal, path, status, record_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for (ordinal, record) in records.iter().enumerate() {
                insert.execute(params![
                    upload_id.as_str(),
                    ordinal as i64,
                    record.path,
                    record.status.as_str(),
                    serde_json::to_string(record)?,
                ])?;
            }
        }
        tx.commit()?;
        info!(upload_id = %upload_id, records = records.len(), "ingested into sqlite store");

        Ok(StoreEntry {
            upload_id: upload_id.clone(),
            records: Arc::new(records),
        })
    }

    fn get(&self, upload_id: &UploadId) -> CodemapResult<StoreEntry> {
        let conn = self.connect()?;
        if !Self::is_ingested(&conn, upload_id)? {
            return Err(not_analyzed(upload_id));
        }
        let mut stmt = conn.prepare(
            "SELECT record_json FROM symbol_records WHERE upload_id = ?1 ORDER BY ordinal;",
        )?;
        let rows = stmt.query_map(params![upload_id.as_str()], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str::<SymbolRecord>(&row?)?);
        }
        debug!(upload_id = %upload_id, records = records.len(), "loaded from sqlite store");
        Ok(StoreEntry {
            upload_id: upload_id.clone(),
            records: Arc::new(records),
        })
    }

    fn remove(&self, upload_id: &UploadId) -> CodemapResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM symbol_records WHERE upload_id = ?1;",
            params![upload_id.as_str()],
        )?;
        let removed = tx.execute(
            "DELETE FROM ingested_uploads WHERE upload_id = ?1;",
            params![upload_id.as_str()],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn upload_ids(&self) -> CodemapResult<Vec<UploadId>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT upload_id FROM ingested_uploads ORDER BY upload_id;")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(UploadId::parse(&row?)?);
        }
        Ok(ids)
    }

    fn contains(&self, upload_id: &UploadId) -> bool {
        self.connect()
            .and_then(|conn| Self::is_ingested(&conn, upload_id))
            .unwrap_or(false)
    }

    fn get_file(&self, upload_id: &UploadId, path: &str) -> CodemapResult<SymbolRecord> {
        let conn = self.connect()?;
        if !Self::is_ingested(&conn, upload_id)? {
            return Err(not_analyzed(upload_id));
        }
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM symbol_records WHERE upload_id = ?1 AND path = ?2;",
                params![upload_id.as_str(), path],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(CodemapError::NotFound(format!("{path} in upload {upload_id}"))),
        }
    }
}
