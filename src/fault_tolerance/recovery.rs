// src/fault_tolerance/recovery.rs
//! Crash recovery: restore, replay, resume
//!
//! ```text
//!   latest checkpoint ──► restore state, sequencers, counters
//!   log after mark    ──► replay Served records in LSN order
//!                         ├─ outbound requests suppressed
//!                         └─ replies compared with Replied records
//!                              same      ─► suppressed (already out)
//!                              different ─► ReplayDivergence
//!                              unlogged  ─► delivered now
//!   fresh checkpoint  ──► new incarnation starts serving
//! ```

use crate::body::handle::{BodyHandle, BodyStatus};
use crate::body::mailbox::Mailbox;
use crate::body::policy::ServingPolicy;
use crate::body::serving::{Body, BodyEnv};
use crate::fault_tolerance::checkpoint::{Checkpoint, LogRecord};
use crate::fault_tolerance::manager::FtManager;
use crate::fault_tolerance::FtPolicy;
use crate::identity::{Location, ObjectId, RequestId};
use crate::messaging::{Reply, Request, RequestRecord};
use crate::observability;
use crate::runtime::active_runtime::RuntimeShared;
use crate::utils::errors::{ActiveError, FutureError, RecoveryError, Result, TransportError};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Replay progress of a recovering body
#[derive(Debug, Default)]
pub(crate) struct ReplayState {
    queue: VecDeque<(Request, bool)>,
    served: HashSet<RequestId>,
    recorded: HashMap<RequestId, Reply>,
    undelivered: Vec<Reply>,
    divergence: Option<RequestId>,
    replayed: usize,
    suppressed: usize,
}

impl ReplayState {
    pub(crate) fn new(entries: Vec<(RequestRecord, bool)>, recorded: Vec<Reply>) -> Self {
        Self {
            queue: entries
                .into_iter()
                .map(|(record, nested)| (Request::from_record(record), nested))
                .collect(),
            recorded: recorded.into_iter().map(|r| (r.request_id, r)).collect(),
            ..Default::default()
        }
    }

    /// Next request to re-serve at top level.
    pub(crate) fn next(&mut self) -> Option<Request> {
        let (request, _) = self.queue.pop_front()?;
        self.served.insert(request.id());
        self.replayed += 1;
        Some(request)
    }

    /// Next request if it was originally served nested and matches.
    pub(crate) fn next_if<P>(&mut self, predicate: P) -> Option<Request>
    where
        P: Fn(&Request) -> bool,
    {
        match self.queue.front() {
            Some((request, true)) if predicate(request) => self.next(),
            _ => None,
        }
    }

    /// A reply produced while replaying.
    pub(crate) fn record(&mut self, reply: Reply) {
        match self.recorded.get(&reply.request_id) {
            Some(logged) if logged.same_result(&reply) => self.suppressed += 1,
            Some(_) => {
                warn!("Replay of {} produced a different reply", reply.request_id);
                self.divergence.get_or_insert(reply.request_id);
            }
            None => self.undelivered.push(reply),
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.queue.len()
    }
}

/// What a recovery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub object_id: ObjectId,

    /// Epoch of the fresh checkpoint taken after replay
    pub epoch: u64,
    pub incarnation: u64,
    pub replayed: usize,
    pub suppressed: usize,
    pub delivered: usize,

    /// Callers failed because their request never reached the log
    pub lost: usize,
    pub location: Location,
}

/// Bring a crashed fault-tolerant object back, at `at` or where it was.
pub(crate) fn recover(shared: &Arc<RuntimeShared>, id: ObjectId, at: Option<Location>) -> Result<ReplayReport> {
    let seen = shared.registry.lookup(id).map_or(0, |r| r.epoch);
    let previous = shared.locate(id);
    if let Some((_, handle)) = &previous {
        if !handle.transition(&BodyStatus::Crashed, BodyStatus::Recovering) {
            return Err(RecoveryError::AlreadyActive(id).into());
        }
    }

    let result = restart(shared, id, at, previous.as_ref().map(|(node, _)| node.location().clone()), seen);
    match &result {
        Ok(report) => {
            metrics::counter!(observability::RECOVERIES).increment(1);
            info!(
                "Recovered {} at {} (incarnation {}, {} replayed, {} suppressed, {} delivered, {} lost)",
                id,
                report.location,
                report.incarnation,
                report.replayed,
                report.suppressed,
                report.delivered,
                report.lost
            );
        }
        Err(e) => {
            error!("Recovery of {} failed: {}", id, e);
            if let Some((_, handle)) = &previous {
                handle.transition(&BodyStatus::Recovering, BodyStatus::Crashed);
            }
        }
    }
    result
}

fn restart(
    shared: &Arc<RuntimeShared>,
    id: ObjectId,
    at: Option<Location>,
    crashed_at: Option<Location>,
    seen: u64,
) -> Result<ReplayReport> {
    let policy = shared
        .ft_policies
        .get(&id)
        .map(|p| p.clone())
        .unwrap_or_else(|| FtPolicy::from_config(&shared.config.fault_tolerance));
    let server = shared.recovery.clone();

    let fetch = server.clone();
    let checkpoint = shared
        .maintenance
        .run_bounded(policy.server_timeout, move || fetch.fetch_latest(id))??
        .ok_or(RecoveryError::NoCheckpoint(id))?;
    let fetch = server.clone();
    let mark = checkpoint.log_mark;
    let log = shared
        .maintenance
        .run_bounded(policy.server_timeout, move || fetch.fetch_log(id, mark))??;
    verify_log(id, &checkpoint, &log)?;

    if checkpoint.codec != shared.codec.name() {
        return Err(RecoveryError::Codec(format!(
            "checkpoint encoded with {}, runtime uses {}",
            checkpoint.codec,
            shared.codec.name()
        ))
        .into());
    }
    let state = shared
        .codec
        .decode(&checkpoint.state)
        .map_err(|e| RecoveryError::Codec(e.to_string()))?;
    let object = shared
        .classes
        .restore(&checkpoint.class, state)
        .ok_or_else(|| RecoveryError::UnknownClass(checkpoint.class.clone()))?
        .map_err(|e| RecoveryError::Codec(e.to_string()))?;

    let destination = at
        .or(crashed_at.clone())
        .unwrap_or_else(|| checkpoint.location.clone());
    let node = shared
        .transport
        .node(&destination)
        .filter(|n| n.is_reachable())
        .ok_or_else(|| ActiveError::UnknownNode(destination.clone()))?;

    let (entries, recorded) = replay_input(&checkpoint, &log);
    let mailbox = Arc::new(Mailbox::restore(
        id,
        shared.config.mailbox.capacity,
        ServingPolicy::with_immediate(checkpoint.immediate.iter().cloned()),
        checkpoint.sequencer.clone(),
        Vec::new(),
    ));
    for (record, _) in &entries {
        mailbox.observe(record.id.sender, record.id.sequence);
    }

    let handle = Arc::new(BodyHandle::new(id, checkpoint.class.clone(), mailbox, true));
    handle.set_status(BodyStatus::Recovering);

    let mut env = BodyEnv::new(
        id,
        checkpoint.class.clone(),
        destination.clone(),
        handle.clone(),
        Arc::downgrade(shared),
        shared.config.runtime.idle_tick(),
    );
    env.outbound = checkpoint.outbound.iter().copied().collect();
    env.next_reply_seq = checkpoint.next_reply_seq;
    env.ft = Some(FtManager::restored(id, policy, server, &checkpoint, &log));
    env.replay = Some(ReplayState::new(entries, recorded));

    let mut body = Body::new(object, env);
    debug!("Replaying {} logged requests of {}", body.env.replay.as_ref().map_or(0, ReplayState::remaining), id);
    body.replay()?;

    let replay = body.env.replay.take().unwrap_or_default();
    if let Some(request) = replay.divergence {
        return Err(RecoveryError::ReplayDivergence {
            id,
            request: request.to_string(),
        }
        .into());
    }
    let delivered = replay.undelivered.len();
    for reply in replay.undelivered {
        body.env.emit(reply)?;
    }
    metrics::counter!(observability::REPLIES_SUPPRESSED).increment(replay.suppressed as u64);

    if !handle.begin_checkpoint() {
        return Err(ActiveError::CheckpointInProgress(id));
    }
    let fresh = body
        .env
        .capture_checkpoint(&*body.object, None)
        .and_then(|cp| body.env.store_checkpoint(cp));
    handle.end_checkpoint();
    let epoch = fresh?;
    let incarnation = body.env.ft.as_ref().map_or(0, FtManager::incarnation);

    let lost = fail_lost(shared, id, &replay.served);
    if lost > 0 {
        warn!("{} requests to {} were lost in the crash", lost, id);
    }

    node.host(handle.clone());
    if let Err(e) = shared.registry.relocate(id, destination.clone(), seen) {
        node.evict(id, Some(&handle));
        return Err(e.into());
    }
    if let Some(old) = crashed_at.filter(|old| *old != destination) {
        if let Some(old_node) = shared.transport.node(&old) {
            old_node.evict(id, None);
            old_node
                .forwarders()
                .insert(id, destination.clone(), shared.config.migration.grace_period());
        }
    }
    body.spawn()?;

    Ok(ReplayReport {
        object_id: id,
        epoch,
        incarnation,
        replayed: replay.replayed,
        suppressed: replay.suppressed,
        delivered,
        lost,
        location: destination,
    })
}

/// Fail every future still waiting on `id` for a request the replay did
/// not re-serve: the crashed incarnation accepted it but never logged it.
fn fail_lost(shared: &RuntimeShared, id: ObjectId, replayed: &HashSet<RequestId>) -> usize {
    let error = FutureError::Transport(TransportError::TargetCrashed(id));
    shared
        .transport
        .nodes()
        .iter()
        .map(|node| node.futures().fail_target_except(id, replayed, &error))
        .sum()
}

/// LSNs must be strictly increasing and above the checkpoint's mark.
fn verify_log(id: ObjectId, checkpoint: &Checkpoint, log: &[LogRecord]) -> std::result::Result<(), RecoveryError> {
    let mut last = checkpoint.log_mark;
    for record in log {
        if record.lsn() <= last {
            return Err(RecoveryError::CorruptLog {
                id,
                reason: format!("LSN {} follows {}", record.lsn(), last),
            });
        }
        last = record.lsn();
    }
    Ok(())
}

/// Requests to re-serve, in order, and the replies already logged.
fn replay_input(checkpoint: &Checkpoint, log: &[LogRecord]) -> (Vec<(RequestRecord, bool)>, Vec<Reply>) {
    let logged: HashSet<RequestId> = log
        .iter()
        .filter_map(|r| match r {
            LogRecord::Served { request, .. } => Some(request.id),
            LogRecord::Replied { .. } => None,
        })
        .collect();

    let mut entries = Vec::new();
    if let Some(pending) = checkpoint.pending.as_ref().filter(|p| !logged.contains(&p.id)) {
        entries.push((pending.clone(), false));
    }
    let mut replies = Vec::new();
    for record in log {
        match record {
            LogRecord::Served { request, nested, .. } => entries.push((request.clone(), *nested)),
            LogRecord::Replied { reply, .. } => replies.push(reply.clone()),
        }
    }
    (entries, replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_tolerance::server::tests::{checkpoint, served};
    use serde_json::json;

    fn reply(request_id: RequestId, value: i64) -> Reply {
        Reply {
            request_id,
            from: ObjectId::new(),
            sequence: 1,
            outcome: Ok(json!(value)),
            reply_to: Location::new("localhost", 9000),
        }
    }

    #[test]
    fn test_record_suppresses_matching_replies() {
        let request_id = RequestId::new(ObjectId::new(), 1);
        let mut replay = ReplayState::new(Vec::new(), vec![reply(request_id, 1)]);
        replay.record(reply(request_id, 1));
        assert_eq!(replay.suppressed, 1);
        assert!(replay.divergence.is_none());

        let other = RequestId::new(ObjectId::new(), 1);
        replay.record(reply(other, 5));
        assert_eq!(replay.undelivered.len(), 1);
    }

    #[test]
    fn test_record_detects_divergence() {
        let request_id = RequestId::new(ObjectId::new(), 1);
        let mut replay = ReplayState::new(Vec::new(), vec![reply(request_id, 1)]);
        let mut different = reply(request_id, 1);
        different.outcome = Err(FutureError::Timeout(std::time::Duration::from_secs(1)));
        replay.record(different);
        assert_eq!(replay.divergence, Some(request_id));
    }

    #[test]
    fn test_verify_log_requires_increasing_lsns() {
        let id = ObjectId::new();
        let cp = checkpoint(id, 1, 2);
        assert!(verify_log(id, &cp, &[served(id, 3), served(id, 5)]).is_ok());
        assert!(matches!(
            verify_log(id, &cp, &[served(id, 2)]),
            Err(RecoveryError::CorruptLog { .. })
        ));
        assert!(verify_log(id, &cp, &[served(id, 4), served(id, 4)]).is_err());
    }

    #[test]
    fn test_pending_request_replayed_once() {
        let id = ObjectId::new();
        let mut cp = checkpoint(id, 1, 0);
        let first = served(id, 1);
        let LogRecord::Served { request, .. } = first.clone() else {
            unreachable!()
        };
        cp.pending = Some(request.clone());

        let (entries, _) = replay_input(&cp, &[first]);
        assert_eq!(entries.len(), 1);

        let (entries, _) = replay_input(&cp, &[]);
        assert_eq!(entries, vec![(request, false)]);
    }

    #[test]
    fn test_nested_requests_only_taken_from_inside() {
        let id = ObjectId::new();
        let record = |lsn| match served(id, lsn) {
            LogRecord::Served { request, .. } => request,
            LogRecord::Replied { .. } => unreachable!(),
        };
        let mut replay = ReplayState::new(vec![(record(1), false), (record(2), true)], Vec::new());
        assert!(replay.next_if(|_| true).is_none());
        assert!(replay.next().is_some());
        assert!(replay.next_if(|r| r.method() == "other").is_none());
        assert!(replay.next_if(|_| true).is_some());
        assert_eq!(replay.replayed, 2);
        assert_eq!(replay.served.len(), 2);
        assert_eq!(replay.remaining(), 0);
    }
}
