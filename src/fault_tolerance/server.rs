// src/fault_tolerance/server.rs
//! Recovery server: stable storage for checkpoints and message logs
//!
//! The server survives body crashes. It keeps, per object, the latest
//! committed checkpoint and the log records written after it. Storing a
//! checkpoint truncates the log up to the checkpoint's log mark.

use crate::fault_tolerance::checkpoint::{Checkpoint, LogRecord};
use crate::identity::ObjectId;
use crate::utils::errors::RecoveryError;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

pub type ServerResult<T> = std::result::Result<T, RecoveryError>;

/// Stable storage used by fault-tolerant bodies
pub trait RecoveryServer: Send + Sync {
    /// Store a checkpoint. Rejects epochs not above the stored one, then
    /// drops log records covered by the checkpoint.
    fn store(&self, checkpoint: Checkpoint) -> ServerResult<()>;

    fn fetch_latest(&self, id: ObjectId) -> ServerResult<Option<Checkpoint>>;

    fn append(&self, id: ObjectId, record: LogRecord) -> ServerResult<()>;

    /// Log records with an LSN above `after`, in LSN order.
    fn fetch_log(&self, id: ObjectId, after: u64) -> ServerResult<Vec<LogRecord>>;

    /// Record that the object crashed.
    fn notify_crash(&self, id: ObjectId) -> ServerResult<()>;

    /// Drop everything stored for the object.
    fn forget(&self, id: ObjectId) -> ServerResult<()>;
}

/// Operation counters of a recovery server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub checkpoints: u64,
    pub records: u64,
    pub crashes: u64,
    pub rejected: u64,
}

/// Recovery server kept in process memory
///
/// Useful when crashes are injected rather than real, and in tests.
pub struct InMemoryRecoveryServer {
    checkpoints: DashMap<ObjectId, Checkpoint>,
    logs: DashMap<ObjectId, Vec<LogRecord>>,
    crashes: DashMap<ObjectId, u64>,
    available: AtomicBool,
    stored: AtomicU64,
    appended: AtomicU64,
    rejected: AtomicU64,
}

impl InMemoryRecoveryServer {
    pub fn new() -> Self {
        Self {
            checkpoints: DashMap::new(),
            logs: DashMap::new(),
            crashes: DashMap::new(),
            available: AtomicBool::new(true),
            stored: AtomicU64::new(0),
            appended: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        info!("In-memory recovery server available: {}", available);
    }

    pub fn crash_count(&self, id: ObjectId) -> u64 {
        self.crashes.get(&id).map(|c| *c).unwrap_or(0)
    }

    pub fn log_len(&self, id: ObjectId) -> usize {
        self.logs.get(&id).map(|l| l.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            checkpoints: self.stored.load(Ordering::Relaxed),
            records: self.appended.load(Ordering::Relaxed),
            crashes: self.crashes.iter().map(|c| *c.value()).sum(),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> ServerResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RecoveryError::ServerUnavailable("in-memory server is offline".to_string()))
        }
    }
}

impl Default for InMemoryRecoveryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryServer for InMemoryRecoveryServer {
    fn store(&self, checkpoint: Checkpoint) -> ServerResult<()> {
        self.check_available()?;
        let id = checkpoint.object_id;

        if let Some(current) = self.checkpoints.get(&id) {
            if checkpoint.epoch <= current.epoch {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RecoveryError::StaleCheckpoint {
                    id,
                    stored: current.epoch,
                    proposed: checkpoint.epoch,
                });
            }
        }

        let mark = checkpoint.log_mark;
        debug!("Stored checkpoint {} of {} (log mark {})", checkpoint.epoch, id, mark);
        self.checkpoints.insert(id, checkpoint);
        if let Some(mut log) = self.logs.get_mut(&id) {
            log.retain(|r| r.lsn() > mark);
        }
        self.stored.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn fetch_latest(&self, id: ObjectId) -> ServerResult<Option<Checkpoint>> {
        self.check_available()?;
        Ok(self.checkpoints.get(&id).map(|c| c.clone()))
    }

    fn append(&self, id: ObjectId, record: LogRecord) -> ServerResult<()> {
        self.check_available()?;
        let mut log = self.logs.entry(id).or_default();
        if log.iter().any(|r| r.lsn() == record.lsn()) {
            return Ok(());
        }
        let position = log.partition_point(|r| r.lsn() < record.lsn());
        log.insert(position, record);
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn fetch_log(&self, id: ObjectId, after: u64) -> ServerResult<Vec<LogRecord>> {
        self.check_available()?;
        Ok(self
            .logs
            .get(&id)
            .map(|log| log.iter().filter(|r| r.lsn() > after).cloned().collect())
            .unwrap_or_default())
    }

    fn notify_crash(&self, id: ObjectId) -> ServerResult<()> {
        self.check_available()?;
        *self.crashes.entry(id).or_insert(0) += 1;
        info!("Crash of {} recorded", id);
        Ok(())
    }

    fn forget(&self, id: ObjectId) -> ServerResult<()> {
        self.check_available()?;
        self.checkpoints.remove(&id);
        self.logs.remove(&id);
        self.crashes.remove(&id);
        Ok(())
    }
}
