// src/fault_tolerance/storage.rs
//! SQLite-backed recovery server
//!
//! Checkpoints and log records are stored as zstd-compressed JSON blobs,
//! indexed by object id (and LSN for log records). One connection behind
//! a mutex; every trait call is one short transaction.

use crate::fault_tolerance::checkpoint::{Checkpoint, LogRecord};
use crate::fault_tolerance::server::{RecoveryServer, ServerResult};
use crate::identity::ObjectId;
use crate::serialization::{CompressionLevel, Compressor};
use crate::utils::errors::{ActiveError, RecoveryError, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

pub struct SqliteRecoveryServer {
    db: Mutex<Connection>,
    compressor: Compressor,
}

impl SqliteRecoveryServer {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ActiveError::StorageFailed(format!("Failed to open database: {}", e)))?;
        let server = Self::with_connection(conn)?;
        info!("Recovery storage initialized at {:?}", path.as_ref());
        Ok(server)
    }

    /// Database living only as long as the server.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ActiveError::StorageFailed(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let server = Self {
            db: Mutex::new(conn),
            compressor: Compressor::new(CompressionLevel::Fast),
        };
        server.init_schema()?;
        Ok(server)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                object_id TEXT PRIMARY KEY,
                epoch INTEGER NOT NULL,
                log_mark INTEGER NOT NULL,
                payload BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS log_records (
                object_id TEXT NOT NULL,
                lsn INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (object_id, lsn)
            );
            CREATE TABLE IF NOT EXISTS crashes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                object_id TEXT NOT NULL,
                crashed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crashes_object ON crashes(object_id);
            "#,
        )
        .map_err(|e| ActiveError::StorageFailed(format!("Schema creation failed: {}", e)))?;
        Ok(())
    }

    /// Number of crashes recorded for `id`.
    pub fn crash_count(&self, id: ObjectId) -> ServerResult<u64> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM crashes WHERE object_id = ?",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage_error)?;
        Ok(count as u64)
    }

    fn pack<T: Serialize>(&self, value: &T) -> ServerResult<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(|e| RecoveryError::Codec(e.to_string()))?;
        self.compressor
            .compress(&json)
            .map_err(|e| RecoveryError::Codec(e.to_string()))
    }

    fn unpack<T: DeserializeOwned>(&self, id: ObjectId, blob: &[u8]) -> ServerResult<T> {
        let json = self.compressor.decompress(blob).map_err(|e| RecoveryError::CorruptLog {
            id,
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&json).map_err(|e| RecoveryError::CorruptLog {
            id,
            reason: e.to_string(),
        })
    }
}

fn storage_error(e: rusqlite::Error) -> RecoveryError {
    RecoveryError::ServerUnavailable(format!("sqlite: {}", e))
}

impl RecoveryServer for SqliteRecoveryServer {
    fn store(&self, checkpoint: Checkpoint) -> ServerResult<()> {
        let id = checkpoint.object_id;
        let payload = self.pack(&checkpoint)?;
        let key = id.to_string();

        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_error)?;
        let stored: Option<i64> = tx
            .query_row("SELECT epoch FROM checkpoints WHERE object_id = ?", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_error)?;
        if let Some(stored) = stored {
            if checkpoint.epoch <= stored as u64 {
                return Err(RecoveryError::StaleCheckpoint {
                    id,
                    stored: stored as u64,
                    proposed: checkpoint.epoch,
                });
            }
        }

        tx.execute(
            r#"
            INSERT OR REPLACE INTO checkpoints (object_id, epoch, log_mark, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                key,
                checkpoint.epoch as i64,
                checkpoint.log_mark as i64,
                payload,
                checkpoint.created_at.timestamp_millis(),
            ],
        )
        .map_err(storage_error)?;
        tx.execute(
            "DELETE FROM log_records WHERE object_id = ? AND lsn <= ?",
            params![key, checkpoint.log_mark as i64],
        )
        .map_err(storage_error)?;
        tx.commit().map_err(storage_error)?;

        debug!("Stored checkpoint {} of {} ({} bytes)", checkpoint.epoch, id, payload.len());
        Ok(())
    }

    fn fetch_latest(&self, id: ObjectId) -> ServerResult<Option<Checkpoint>> {
        let blob: Option<Vec<u8>> = {
            let db = self.db.lock();
            db.query_row(
                "SELECT payload FROM checkpoints WHERE object_id = ?",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error)?
        };
        blob.map(|b| self.unpack(id, &b)).transpose()
    }

    fn append(&self, id: ObjectId, record: LogRecord) -> ServerResult<()> {
        let payload = self.pack(&record)?;
        let db = self.db.lock();
        db.execute(
            "INSERT OR IGNORE INTO log_records (object_id, lsn, kind, payload) VALUES (?, ?, ?, ?)",
            params![id.to_string(), record.lsn() as i64, record.kind(), payload],
        )
        .map_err(storage_error)?;
        Ok(())
    }

    fn fetch_log(&self, id: ObjectId, after: u64) -> ServerResult<Vec<LogRecord>> {
        let blobs: Vec<Vec<u8>> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT payload FROM log_records WHERE object_id = ? AND lsn > ? ORDER BY lsn")
                .map_err(storage_error)?;
            let rows = stmt
                .query_map(params![id.to_string(), after as i64], |row| row.get(0))
                .map_err(storage_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_error)?;
            rows
        };
        blobs.iter().map(|b| self.unpack(id, b)).collect()
    }

    fn notify_crash(&self, id: ObjectId) -> ServerResult<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO crashes (object_id, crashed_at) VALUES (?, ?)",
            params![id.to_string(), chrono::Utc::now().timestamp_millis()],
        )
        .map_err(storage_error)?;
        info!("Crash of {} recorded", id);
        Ok(())
    }

    fn forget(&self, id: ObjectId) -> ServerResult<()> {
        let key = id.to_string();
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_error)?;
        for table in ["checkpoints", "log_records", "crashes"] {
            tx.execute(&format!("DELETE FROM {} WHERE object_id = ?", table), params![key])
                .map_err(storage_error)?;
        }
        tx.commit().map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_tolerance::server::tests::{checkpoint, served};
    use tempfile::tempdir;

    #[test]
    fn test_store_and_fetch() {
        let server = SqliteRecoveryServer::in_memory().unwrap();
        let id = ObjectId::new();
        assert!(server.fetch_latest(id).unwrap().is_none());

        let cp = checkpoint(id, 1, 0);
        server.store(cp.clone()).unwrap();
        assert_eq!(server.fetch_latest(id).unwrap(), Some(cp));
    }

    #[test]
    fn test_log_truncated_by_checkpoint() {
        let server = SqliteRecoveryServer::in_memory().unwrap();
        let id = ObjectId::new();
        for lsn in 1..=5 {
            server.append(id, served(id, lsn)).unwrap();
        }
        server.append(id, served(id, 5)).unwrap();
        server.store(checkpoint(id, 1, 3)).unwrap();

        let lsns: Vec<u64> = server.fetch_log(id, 0).unwrap().iter().map(LogRecord::lsn).collect();
        assert_eq!(lsns, vec![4, 5]);
        assert!(matches!(
            server.store(checkpoint(id, 1, 4)),
            Err(RecoveryError::StaleCheckpoint { .. })
        ));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recovery.db");
        let id = ObjectId::new();
        {
            let server = SqliteRecoveryServer::open(&path).unwrap();
            server.store(checkpoint(id, 3, 0)).unwrap();
            server.append(id, served(id, 1)).unwrap();
            server.notify_crash(id).unwrap();
        }

        let server = SqliteRecoveryServer::open(&path).unwrap();
        assert_eq!(server.fetch_latest(id).unwrap().unwrap().epoch, 3);
        assert_eq!(server.fetch_log(id, 0).unwrap().len(), 1);
        assert_eq!(server.crash_count(id).unwrap(), 1);

        server.forget(id).unwrap();
        assert!(server.fetch_latest(id).unwrap().is_none());
    }
}
