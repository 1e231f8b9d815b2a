//! Catalog persistence boundary.
//!
//! The pipeline only needs a narrow contract: look a record up by identity,
//! insert a new one (failing atomically on a duplicate identity), flag a
//! record's blob as missing, and replace a stale blob in place. Uniqueness of
//! the identity key is enforced by the store, which is the sole
//! synchronization point between racing ingestion jobs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::warn;

use super::identity::IdentityKey;
use crate::core::CatalogError;
use crate::domain::{CatalogRecord, RecordStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key     TEXT    NOT NULL UNIQUE,
    blob_ref         TEXT    NOT NULL,
    source_url       TEXT    NOT NULL,
    title            TEXT    NOT NULL,
    artist           TEXT    NOT NULL,
    album            TEXT    NOT NULL DEFAULT '',
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    size_bytes       INTEGER NOT NULL DEFAULT 0,
    status           TEXT    NOT NULL DEFAULT 'active',
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
"#;

const RECORD_COLUMNS: &str = "identity_key, blob_ref, source_url, title, artist, album, \
     duration_seconds, size_bytes, status, created_at, updated_at";

/// Persistence contract consumed by the ingestion pipeline
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Find the record for an identity key
    async fn find_by_identity(&self, identity_key: &str) -> Result<CatalogRecord, CatalogError>;

    /// Insert a record; fails with `DuplicateIdentity` if the key exists
    async fn create(&self, record: CatalogRecord) -> Result<CatalogRecord, CatalogError>;

    /// Flag a record's blob reference as stale. Idempotent.
    async fn mark_missing(&self, identity_key: &str) -> Result<(), CatalogError>;

    /// Update the blob of an existing record in place and reactivate it
    async fn replace_blob(
        &self,
        identity_key: &str,
        blob_ref: &str,
        size_bytes: u64,
        duration_seconds: u32,
    ) -> Result<CatalogRecord, CatalogError>;
}

/// Flag the record for a URL as having a stale blob reference.
///
/// The next ingestion of the same URL re-runs the pipeline and updates the
/// record in place. Fails if the URL was never cataloged.
pub async fn mark_stale(catalog: &dyn Catalog, source_url: &str) -> anyhow::Result<IdentityKey> {
    let identity = IdentityKey::from_url(source_url)?;
    match catalog.mark_missing(identity.as_str()).await {
        Ok(()) => {}
        Err(CatalogError::NotFound(_)) => anyhow::bail!("No record for {}", source_url),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to mark {} missing", source_url))
        }
    }
    warn!(identity = %identity, url = %source_url, "Marked record missing");
    Ok(identity)
}

/// SQLite implementation of `Catalog`
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open or create a catalog database
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create catalog directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Create an in-memory catalog
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply catalog schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CatalogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Storage(anyhow::anyhow!("catalog lock poisoned")))?;
            f(&guard)
        })
        .await
        .map_err(|e| CatalogError::Storage(anyhow::anyhow!("catalog task failed: {}", e)))?
    }

    /// Number of records
    pub async fn count(&self) -> Result<u64, CatalogError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    /// Records whose blob needs re-ingestion, oldest first
    pub async fn list_missing(&self, limit: usize) -> Result<Vec<CatalogRecord>, CatalogError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM records WHERE status = ?1 ORDER BY updated_at ASC LIMIT ?2",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![RecordStatus::Missing.as_str(), limit as i64], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

fn query_record(conn: &Connection, identity_key: &str) -> Result<CatalogRecord, CatalogError> {
    let sql = format!("SELECT {} FROM records WHERE identity_key = ?1", RECORD_COLUMNS);
    conn.query_row(&sql, params![identity_key], row_to_record)
        .optional()?
        .ok_or_else(|| CatalogError::NotFound(identity_key.to_string()))
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CatalogRecord> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(CatalogRecord {
        identity_key: row.get("identity_key")?,
        blob_ref: row.get("blob_ref")?,
        source_url: row.get("source_url")?,
        title: row.get("title")?,
        artist: row.get("artist")?,
        album: row.get("album")?,
        duration_seconds: row.get::<_, i64>("duration_seconds")?.max(0) as u32,
        size_bytes: row.get::<_, i64>("size_bytes")?.max(0) as u64,
        status: status.parse().unwrap_or(RecordStatus::Active),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn find_by_identity(&self, identity_key: &str) -> Result<CatalogRecord, CatalogError> {
        let key = identity_key.to_string();
        self.with_conn(move |conn| query_record(conn, &key)).await
    }

    async fn create(&self, record: CatalogRecord) -> Result<CatalogRecord, CatalogError> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO records (identity_key, blob_ref, source_url, title, artist, album,
                     duration_seconds, size_bytes, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.identity_key,
                    record.blob_ref,
                    record.source_url,
                    record.title,
                    record.artist,
                    record.album,
                    record.duration_seconds as i64,
                    record.size_bytes as i64,
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => Ok(record),
                Err(e) if is_unique_violation(&e) => {
                    Err(CatalogError::DuplicateIdentity(record.identity_key))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn mark_missing(&self, identity_key: &str) -> Result<(), CatalogError> {
        let key = identity_key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE records SET status = ?1, updated_at = ?2 WHERE identity_key = ?3",
                params![RecordStatus::Missing.as_str(), Utc::now().to_rfc3339(), key],
            )?;
            if changed == 0 {
                return Err(CatalogError::NotFound(key));
            }
            Ok(())
        })
        .await
    }

    async fn replace_blob(
        &self,
        identity_key: &str,
        blob_ref: &str,
        size_bytes: u64,
        duration_seconds: u32,
    ) -> Result<CatalogRecord, CatalogError> {
        let key = identity_key.to_string();
        let blob_ref = blob_ref.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE records
                 SET blob_ref = ?1, size_bytes = ?2,
                     duration_seconds = CASE WHEN ?3 > 0 THEN ?3 ELSE duration_seconds END,
                     status = ?4, updated_at = ?5
                 WHERE identity_key = ?6",
                params![
                    blob_ref,
                    size_bytes as i64,
                    duration_seconds as i64,
                    RecordStatus::Active.as_str(),
                    Utc::now().to_rfc3339(),
                    key,
                ],
            )?;
            if changed == 0 {
                return Err(CatalogError::NotFound(key));
            }
            query_record(conn, &key)
        })
        .await
    }
}
