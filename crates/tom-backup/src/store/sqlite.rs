/// SQLite-backed LocationStore.
///
/// One row per record. The record body is MessagePack; the two columns the
/// sweeper filters on are kept next to it and rewritten on every save.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tokio::sync::Mutex;

use super::{apply_observation, LocationStore, NewRecord, StatusUpdate};
use crate::error::BackupError;
use crate::types::{BackupRecord, ContentId, LocationHandle, LocationRef, Observation};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_records (
    content_id TEXT PRIMARY KEY CHECK (length(content_id) = 64),
    record BLOB NOT NULL,
    stalest_validation_at INTEGER NOT NULL,
    unhealthy_locations INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backup_records_sweep
    ON backup_records(stalest_validation_at, unhealthy_locations);
"#;

pub struct SqliteLocationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocationStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackupError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, BackupError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackupError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one IMMEDIATE transaction; commit on `Ok`.
    async fn with_immediate_tx<T, F>(&self, f: F) -> Result<T, BackupError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, BackupError>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn load(conn: &Connection, id: &ContentId) -> Result<Option<BackupRecord>, BackupError> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT record FROM backup_records WHERE content_id = ?1",
            params![id.to_hex()],
            |row| row.get(0),
        )
        .optional()?;
    blob.map(|b| BackupRecord::from_bytes(&b)).transpose()
}

fn load_existing(conn: &Connection, id: &ContentId) -> Result<BackupRecord, BackupError> {
    load(conn, id)?.ok_or(BackupError::NotFound(*id))
}

fn save(conn: &Connection, record: &BackupRecord) -> Result<(), BackupError> {
    conn.execute(
        "INSERT INTO backup_records
            (content_id, record, stalest_validation_at, unhealthy_locations, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(content_id) DO UPDATE SET
            record = excluded.record,
            stalest_validation_at = excluded.stalest_validation_at,
            unhealthy_locations = excluded.unhealthy_locations,
            updated_at = excluded.updated_at",
        params![
            record.content_id.to_hex(),
            record.to_bytes()?,
            record.stalest_validation_at() as i64,
            record.unhealthy_count() as i64,
            record.created_at as i64,
            record.updated_at as i64,
        ],
    )?;
    Ok(())
}

#[async_trait::async_trait]
impl LocationStore for SqliteLocationStore {
    async fn get(&self, id: &ContentId) -> Result<BackupRecord, BackupError> {
        let conn = self.conn.lock().await;
        load_existing(&conn, id)
    }

    async fn create_or_get(
        &self,
        id: ContentId,
        new: NewRecord,
        at: u64,
    ) -> Result<(BackupRecord, bool), BackupError> {
        self.with_immediate_tx(|tx| {
            if let Some(existing) = load(tx, &id)? {
                return Ok((existing, false));
            }
            let record = BackupRecord::new(
                id,
                new.origin,
                new.display_name,
                new.size_bytes,
                new.mime_type,
                at,
            );
            save(tx, &record)?;
            Ok((record, true))
        })
        .await
    }

    async fn append_replica(
        &self,
        id: &ContentId,
        location: LocationHandle,
        at: u64,
    ) -> Result<BackupRecord, BackupError> {
        self.with_immediate_tx(|tx| {
            let mut record = load_existing(tx, id)?;
            if record.push_replica(location, at) {
                save(tx, &record)?;
            }
            Ok(record)
        })
        .await
    }

    async fn mark_location_status(
        &self,
        id: &ContentId,
        location_ref: &LocationRef,
        observation: Observation,
        at: u64,
        failure_threshold: u32,
    ) -> Result<StatusUpdate, BackupError> {
        self.with_immediate_tx(|tx| {
            let mut record = load_existing(tx, id)?;
            let (previous, applied) =
                apply_observation(&mut record, location_ref, observation, at, failure_threshold)?;
            if applied {
                save(tx, &record)?;
            }
            Ok(StatusUpdate {
                record,
                previous,
                applied,
            })
        })
        .await
    }

    async fn sweep_candidates(
        &self,
        stale_before: u64,
        after: Option<ContentId>,
        limit: usize,
    ) -> Result<Vec<ContentId>, BackupError> {
        let cursor = after.map(|id| id.to_hex()).unwrap_or_default();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT content_id FROM backup_records
             WHERE content_id > ?1
               AND (unhealthy_locations > 0 OR stalest_validation_at < ?2)
             ORDER BY content_id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![cursor, stale_before as i64, limit as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.parse::<ContentId>()?);
        }
        Ok(out)
    }

    async fn len(&self) -> Result<usize, BackupError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM backup_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
