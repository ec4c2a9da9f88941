// src/fault_tolerance/manager.rs
//! Per-body fault-tolerance bookkeeping
//!
//! Owned by the serving thread. Assigns log sequence numbers, writes log
//! records to the recovery server before their effects become visible,
//! and tracks what the next checkpoint must cover.

use crate::fault_tolerance::checkpoint::LogRecord;
use crate::fault_tolerance::policy::{CheckpointProgress, FtPolicy};
use crate::fault_tolerance::server::RecoveryServer;
use crate::fault_tolerance::Checkpoint;
use crate::identity::ObjectId;
use crate::messaging::{Reply, RequestRecord};
use crate::utils::errors::CapacityError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What a checkpoint taken now covers
#[derive(Debug)]
pub(crate) struct CheckpointDraft {
    pub(crate) epoch: u64,
    pub(crate) incarnation: u64,
    pub(crate) log_mark: u64,
    pub(crate) request_log: Vec<RequestRecord>,
    pub(crate) reply_log: Vec<Reply>,
}

/// Bookkeeping carried along by migration
#[derive(Debug, Clone)]
pub(crate) struct FtSnapshot {
    pub(crate) policy: FtPolicy,
    pub(crate) committed_epoch: u64,
    pub(crate) incarnation: u64,
    pub(crate) next_lsn: u64,
    pub(crate) served: Vec<(u64, RequestRecord)>,
    pub(crate) replied: Vec<(u64, Reply)>,
    pub(crate) unshipped: Vec<LogRecord>,
    pub(crate) served_since: u64,
    pub(crate) since_last: Duration,
}

pub(crate) struct FtManager {
    id: ObjectId,
    policy: FtPolicy,
    server: Arc<dyn RecoveryServer>,
    committed_epoch: u64,
    incarnation: u64,
    next_lsn: u64,
    served: Vec<(u64, RequestRecord)>,
    replied: Vec<(u64, Reply)>,
    /// Records the server has not acknowledged yet, in LSN order
    unshipped: VecDeque<LogRecord>,
    served_since: u64,
    last_checkpoint: Instant,
}

impl FtManager {
    pub(crate) fn new(id: ObjectId, policy: FtPolicy, server: Arc<dyn RecoveryServer>) -> Self {
        Self {
            id,
            policy,
            server,
            committed_epoch: 0,
            incarnation: 0,
            next_lsn: 1,
            served: Vec::new(),
            replied: Vec::new(),
            unshipped: VecDeque::new(),
            served_since: 0,
            last_checkpoint: Instant::now(),
        }
    }

    pub(crate) fn from_snapshot(id: ObjectId, snapshot: FtSnapshot, server: Arc<dyn RecoveryServer>) -> Self {
        Self {
            id,
            policy: snapshot.policy,
            server,
            committed_epoch: snapshot.committed_epoch,
            incarnation: snapshot.incarnation,
            next_lsn: snapshot.next_lsn,
            served: snapshot.served,
            replied: snapshot.replied,
            unshipped: snapshot.unshipped.into(),
            served_since: snapshot.served_since,
            last_checkpoint: Instant::now()
                .checked_sub(snapshot.since_last)
                .unwrap_or_else(Instant::now),
        }
    }

    /// Manager of a new incarnation, resuming after `checkpoint` and the
    /// log records written since.
    pub(crate) fn restored(
        id: ObjectId,
        policy: FtPolicy,
        server: Arc<dyn RecoveryServer>,
        checkpoint: &Checkpoint,
        log: &[LogRecord],
    ) -> Self {
        let mut manager = Self::new(id, policy, server);
        manager.committed_epoch = checkpoint.epoch;
        manager.incarnation = checkpoint.incarnation + 1;
        manager.next_lsn = log
            .iter()
            .map(LogRecord::lsn)
            .max()
            .unwrap_or(0)
            .max(checkpoint.log_mark)
            + 1;
        for record in log {
            match record {
                LogRecord::Served { lsn, request, .. } => manager.served.push((*lsn, request.clone())),
                LogRecord::Replied { lsn, reply } => manager.replied.push((*lsn, reply.clone())),
            }
        }
        manager
    }

    pub(crate) fn snapshot(&self) -> FtSnapshot {
        FtSnapshot {
            policy: self.policy.clone(),
            committed_epoch: self.committed_epoch,
            incarnation: self.incarnation,
            next_lsn: self.next_lsn,
            served: self.served.clone(),
            replied: self.replied.clone(),
            unshipped: self.unshipped.iter().cloned().collect(),
            served_since: self.served_since,
            since_last: self.last_checkpoint.elapsed(),
        }
    }

    pub(crate) fn server(&self) -> Arc<dyn RecoveryServer> {
        self.server.clone()
    }

    pub(crate) fn policy(&self) -> &FtPolicy {
        &self.policy
    }

    pub(crate) fn committed_epoch(&self) -> u64 {
        self.committed_epoch
    }

    pub(crate) fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Entries not yet covered by a committed checkpoint
    pub(crate) fn log_len(&self) -> usize {
        self.served.len() + self.replied.len()
    }

    pub(crate) fn unshipped_len(&self) -> usize {
        self.unshipped.len()
    }

    /// Log a dequeued request before it is served.
    pub(crate) fn log_served(&mut self, request: RequestRecord, nested: bool) -> Result<u64, CapacityError> {
        self.check_capacity()?;
        let lsn = self.next_lsn();
        self.served.push((lsn, request.clone()));
        self.append(LogRecord::Served { lsn, request, nested });
        Ok(lsn)
    }

    /// Log a reply before it is delivered.
    pub(crate) fn log_replied(&mut self, reply: &Reply) -> Result<u64, CapacityError> {
        self.check_capacity()?;
        let lsn = self.next_lsn();
        self.replied.push((lsn, reply.clone()));
        self.append(LogRecord::Replied {
            lsn,
            reply: reply.clone(),
        });
        Ok(lsn)
    }

    pub(crate) fn note_served(&mut self) {
        self.served_since += 1;
    }

    fn next_lsn(&mut self) -> u64 {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        lsn
    }

    fn check_capacity(&self) -> Result<(), CapacityError> {
        if self.log_len() >= self.policy.max_log_entries {
            return Err(CapacityError::LogOverflow {
                id: self.id,
                limit: self.policy.max_log_entries,
            });
        }
        Ok(())
    }

    fn append(&mut self, record: LogRecord) {
        if !self.flush() {
            self.unshipped.push_back(record);
            return;
        }
        if let Err(e) = self.server.append(self.id, record.clone()) {
            warn!("Log record {} of {} kept locally: {}", record.lsn(), self.id, e);
            self.unshipped.push_back(record);
        }
    }

    /// Ship queued records; true once nothing is left behind.
    pub(crate) fn flush(&mut self) -> bool {
        while let Some(record) = self.unshipped.front() {
            if let Err(e) = self.server.append(self.id, record.clone()) {
                debug!("Log of {} still unshipped ({} records): {}", self.id, self.unshipped.len(), e);
                return false;
            }
            self.unshipped.pop_front();
        }
        true
    }

    pub(crate) fn progress(&self) -> CheckpointProgress {
        CheckpointProgress {
            served_since: self.served_since,
            since_last: self.last_checkpoint.elapsed(),
            log_entries: self.log_len(),
        }
    }

    /// The trigger fires, or the log is three quarters full.
    pub(crate) fn should_checkpoint(&self) -> bool {
        let progress = self.progress();
        self.policy.should_checkpoint(&progress)
            || progress.log_entries.saturating_mul(4) >= self.policy.max_log_entries.saturating_mul(3)
    }

    /// Describe a checkpoint covering everything logged so far.
    pub(crate) fn prepare(&mut self) -> CheckpointDraft {
        self.served_since = 0;
        self.last_checkpoint = Instant::now();
        CheckpointDraft {
            epoch: self.committed_epoch + 1,
            incarnation: self.incarnation,
            log_mark: self.next_lsn - 1,
            request_log: self.served.iter().map(|(_, r)| r.clone()).collect(),
            reply_log: self.replied.iter().map(|(_, r)| r.clone()).collect(),
        }
    }

    /// Catch up with a checkpoint the server holds but never acknowledged
    /// to this manager, such as a store that timed out and landed later.
    pub(crate) fn adopt(&mut self, stored: &Checkpoint) {
        if stored.epoch <= self.committed_epoch {
            return;
        }
        if stored.incarnation == self.incarnation && stored.log_mark < self.next_lsn {
            self.commit(stored.epoch, stored.log_mark);
        } else {
            self.committed_epoch = stored.epoch;
        }
    }

    /// The server acknowledged checkpoint `epoch` covering LSNs up to `log_mark`.
    pub(crate) fn commit(&mut self, epoch: u64, log_mark: u64) {
        self.committed_epoch = self.committed_epoch.max(epoch);
        self.served.retain(|(lsn, _)| *lsn > log_mark);
        self.replied.retain(|(lsn, _)| *lsn > log_mark);
        self.unshipped.retain(|r| r.lsn() > log_mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_tolerance::policy::{EveryRequests, Never};
    use crate::fault_tolerance::server::tests::served;
    use crate::fault_tolerance::server::InMemoryRecoveryServer;

    fn record(id: ObjectId) -> RequestRecord {
        match served(id, 1) {
            LogRecord::Served { request, .. } => request,
            LogRecord::Replied { .. } => unreachable!(),
        }
    }

    fn manager(server: Arc<InMemoryRecoveryServer>, max: usize) -> (ObjectId, FtManager) {
        let id = ObjectId::new();
        let policy = FtPolicy::default().with_trigger(Never).with_max_log_entries(max);
        (id, FtManager::new(id, policy, server))
    }

    #[test]
    fn test_lsns_and_commit() {
        let server = Arc::new(InMemoryRecoveryServer::new());
        let (id, mut ft) = manager(server.clone(), 100);
        assert_eq!(ft.log_served(record(id), false).unwrap(), 1);
        assert_eq!(ft.log_served(record(id), false).unwrap(), 2);
        assert_eq!(server.log_len(id), 2);

        let draft = ft.prepare();
        assert_eq!(draft.epoch, 1);
        assert_eq!(draft.log_mark, 2);
        assert_eq!(draft.request_log.len(), 2);

        ft.log_served(record(id), false).unwrap();
        ft.commit(draft.epoch, draft.log_mark);
        assert_eq!(ft.committed_epoch(), 1);
        assert_eq!(ft.log_len(), 1);
    }

    #[test]
    fn test_overflow() {
        let server = Arc::new(InMemoryRecoveryServer::new());
        let (id, mut ft) = manager(server, 2);
        ft.log_served(record(id), false).unwrap();
        ft.log_served(record(id), false).unwrap();
        assert!(matches!(
            ft.log_served(record(id), false),
            Err(CapacityError::LogOverflow { limit: 2, .. })
        ));
    }

    #[test]
    fn test_unshipped_records_are_flushed_in_order() {
        let server = Arc::new(InMemoryRecoveryServer::new());
        let (id, mut ft) = manager(server.clone(), 100);
        server.set_available(false);
        ft.log_served(record(id), false).unwrap();
        ft.log_served(record(id), false).unwrap();
        assert_eq!(ft.unshipped_len(), 2);
        assert!(!ft.flush());

        server.set_available(true);
        assert!(ft.flush());
        assert_eq!(ft.unshipped_len(), 0);
        let lsns: Vec<u64> = server.fetch_log(id, 0).unwrap().iter().map(LogRecord::lsn).collect();
        assert_eq!(lsns, vec![1, 2]);
    }

    #[test]
    fn test_adopt_late_checkpoint() {
        let server = Arc::new(InMemoryRecoveryServer::new());
        let (id, mut ft) = manager(server, 100);
        ft.log_served(record(id), false).unwrap();
        let draft = ft.prepare();
        ft.log_served(record(id), false).unwrap();

        let mut stored = crate::fault_tolerance::server::tests::checkpoint(id, draft.epoch, draft.log_mark);
        stored.incarnation = ft.incarnation();
        ft.adopt(&stored);
        assert_eq!(ft.committed_epoch(), 1);
        assert_eq!(ft.log_len(), 1);
        assert_eq!(ft.prepare().epoch, 2);

        ft.adopt(&stored);
        assert_eq!(ft.committed_epoch(), 1);
    }

    #[test]
    fn test_trigger_and_fill_level() {
        let server = Arc::new(InMemoryRecoveryServer::new());
        let id = ObjectId::new();
        let policy = FtPolicy::default().with_trigger(EveryRequests(2)).with_max_log_entries(100);
        let mut ft = FtManager::new(id, policy, server);
        ft.note_served();
        assert!(!ft.should_checkpoint());
        ft.note_served();
        assert!(ft.should_checkpoint());
        ft.prepare();
        assert!(!ft.should_checkpoint());

        let (id, mut small) = manager(Arc::new(InMemoryRecoveryServer::new()), 4);
        for _ in 0..3 {
            small.log_served(record(id), false).unwrap();
        }
        assert!(small.should_checkpoint());
    }
}
