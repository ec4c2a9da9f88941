// src/body/serving.rs
//! The serving loop
//!
//! One dedicated thread per body owns the object and is the only code that
//! ever touches its state:
//!
//! ```text
//!   loop {
//!       take() ─┬─ control   ─► migrate / checkpoint / continuation / crash ...
//!               ├─ request   ─► [log Served] ─► serve ─► [log Replied] ─► deliver reply
//!               ├─ idle      ─► flush log, maybe checkpoint
//!               └─ closed    ─► exit
//!   }
//! ```
//!
//! A failing or panicking method only fails its own reply. Errors in the
//! body's own bookkeeping (log overflow) are fatal: the mailbox is closed
//! and every queued request is failed back to its sender.

use crate::body::active_object::ErasedObject;
use crate::body::context::ServiceContext;
use crate::body::control::Control;
use crate::body::handle::{BodyHandle, BodyStatus};
use crate::body::mailbox::{CloseReason, Mailbox, Take};
use crate::fault_tolerance::checkpoint::Checkpoint;
use crate::fault_tolerance::manager::FtManager;
use crate::fault_tolerance::recovery::ReplayState;
use crate::fault_tolerance::FtPolicy;
use crate::future::Future;
use crate::identity::{Location, ObjectId, RequestId};
use crate::messaging::{Argument, Outcome, Reply, Request, RequestRecord};
use crate::observability;
use crate::runtime::active_runtime::RuntimeShared;
use crate::runtime::transport::Transport;
use crate::runtime::ActiveRef;
use crate::utils::errors::{
    ActiveError, CapacityError, CodecError, FutureError, InvocationError, MigrationError, RecoveryError,
    Result, TransportError,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Everything a body owns except the object itself
pub(crate) struct BodyEnv {
    pub(crate) id: ObjectId,
    pub(crate) class: String,
    pub(crate) location: Location,
    pub(crate) handle: Arc<BodyHandle>,
    pub(crate) shared: Weak<RuntimeShared>,
    /// Last sequence number used per target
    pub(crate) outbound: HashMap<ObjectId, u64>,
    pub(crate) next_reply_seq: u64,
    pub(crate) ft: Option<FtManager>,
    pub(crate) replay: Option<ReplayState>,
    pub(crate) fatal: Option<CapacityError>,
    /// Replies whose Replied record has not reached the server yet
    pub(crate) held: Vec<Reply>,
    /// Continuations registered through `when_resolved` that have not run
    pub(crate) continuations: usize,
    depth: usize,
    idle_tick: Duration,
}

impl BodyEnv {
    pub(crate) fn new(
        id: ObjectId,
        class: impl Into<String>,
        location: Location,
        handle: Arc<BodyHandle>,
        shared: Weak<RuntimeShared>,
        idle_tick: Duration,
    ) -> Self {
        Self {
            id,
            class: class.into(),
            location,
            handle,
            shared,
            outbound: HashMap::new(),
            next_reply_seq: 1,
            ft: None,
            replay: None,
            fatal: None,
            held: Vec::new(),
            continuations: 0,
            depth: 0,
            idle_tick,
        }
    }

    pub(crate) fn shared(&self) -> Option<Arc<RuntimeShared>> {
        self.shared.upgrade()
    }

    pub(crate) fn mailbox(&self) -> &Arc<Mailbox> {
        self.handle.mailbox()
    }

    pub(crate) fn outbound_snapshot(&self) -> Vec<(ObjectId, u64)> {
        self.outbound.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Serve one request end to end: log it, run it, answer it.
    ///
    /// Only fails with the fatal log-overflow error.
    pub(crate) fn serve(
        &mut self,
        object: &mut dyn ErasedObject,
        request: Request,
    ) -> std::result::Result<(), CapacityError> {
        let request = if self.ft.is_some() {
            let record = request.materialize();
            if self.replay.is_none() {
                if self.depth == 0 {
                    self.maybe_checkpoint(object, Some(&record));
                }
                if let Some(ft) = self.ft.as_mut() {
                    if let Err(e) = ft.log_served(record.clone(), self.depth > 0) {
                        if request.expects_reply() {
                            let error = TransportError::Rejected(e.clone()).into();
                            self.deliver(Reply::failure(request.id(), self.id, request.reply_to().clone(), error));
                        }
                        return Err(e);
                    }
                }
            }
            Request::from_record(record)
        } else {
            request
        };

        debug!("{} serving {} ({})", self.id, request.method(), request.id());
        let outcome = self.execute(object, &request);
        if let Some(ft) = self.ft.as_mut() {
            ft.note_served();
        }
        metrics::counter!(observability::REQUESTS_SERVED).increment(1);

        if request.expects_reply() {
            let reply = Reply {
                request_id: request.id(),
                from: self.id,
                sequence: self.next_reply_seq,
                outcome,
                reply_to: request.reply_to().clone(),
            };
            self.next_reply_seq += 1;
            self.emit(reply)?;
        }
        Ok(())
    }

    fn execute(&mut self, object: &mut dyn ErasedObject, request: &Request) -> Outcome {
        self.depth += 1;
        let result = {
            let mut ctx = ServiceContext::new(self);
            catch_unwind(AssertUnwindSafe(|| object.serve_erased(request, &mut ctx)))
        };
        self.depth -= 1;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                metrics::counter!(observability::REQUESTS_FAILED).increment(1);
                debug!("{} failed {}: {}", self.id, request.method(), e);
                Err(FutureError::Invocation(e))
            }
            Err(panic) => {
                metrics::counter!(observability::REQUESTS_FAILED).increment(1);
                let reason = panic_message(panic.as_ref());
                warn!("{} panicked in {}: {}", self.id, request.method(), reason);
                Err(FutureError::Invocation(InvocationError::Panicked {
                    method: request.method().to_string(),
                    reason,
                }))
            }
        }
    }

    /// Hand a reply to the outside world, honouring output commit.
    pub(crate) fn emit(&mut self, reply: Reply) -> std::result::Result<(), CapacityError> {
        if let Some(replay) = self.replay.as_mut() {
            replay.record(reply);
            return Ok(());
        }
        if let Some(ft) = self.ft.as_mut() {
            ft.log_replied(&reply)?;
            if ft.unshipped_len() > 0 {
                debug!("Holding reply {} until the log of {} is shipped", reply.request_id, self.id);
                self.held.push(reply);
                return Ok(());
            }
        }
        self.deliver(reply);
        Ok(())
    }

    /// Deliver held replies once their records are on the server, or
    /// unconditionally when the object will never be recovered.
    pub(crate) fn release_held(&mut self, force: bool) {
        let shipped = self.ft.as_mut().map_or(true, FtManager::flush);
        if self.held.is_empty() || !(shipped || force) {
            return;
        }
        for reply in std::mem::take(&mut self.held) {
            self.deliver(reply);
        }
    }

    pub(crate) fn deliver(&self, reply: Reply) {
        let Some(shared) = self.shared() else {
            warn!("Runtime gone, dropping reply {}", reply.request_id);
            return;
        };
        let request_id = reply.request_id;
        match shared.transport.deliver(reply) {
            Ok(()) => {
                metrics::counter!(observability::REPLIES_DELIVERED).increment(1);
            }
            Err(e) => warn!("Reply {} from {} undeliverable: {}", request_id, self.id, e),
        }
    }

    /// Next immediate-service request: from the replay queue while
    /// replaying, from the mailbox otherwise.
    pub(crate) fn next_immediate(&mut self) -> Option<Request> {
        match self.replay.as_mut() {
            Some(replay) => {
                let policy = self.handle.mailbox().policy();
                replay.next_if(|r| policy.is_immediate(r.method()))
            }
            None => self.handle.mailbox().try_take_immediate(),
        }
    }

    pub(crate) fn send_request(
        &mut self,
        target: &ActiveRef,
        method: &str,
        args: Vec<Argument>,
        one_way: bool,
    ) -> Future {
        let last = self.outbound.get(&target.id()).copied().unwrap_or(0);
        let sequence = last.max(self.sequence_floor()) + 1;
        let id = RequestId::new(self.id, sequence);
        let built = if one_way {
            Request::one_way(id, target.id(), method, args, self.location.clone())
        } else {
            Request::call(id, target.id(), method, args, self.location.clone())
        };
        let request = match built {
            Ok(request) => request,
            Err(e) => return Future::failed(InvocationError::failed(method, e.to_string())),
        };

        if self.replay.is_some() {
            self.outbound.insert(target.id(), sequence);
            debug!("Suppressed {} from {} during replay", request.id(), self.id);
            return if one_way {
                Future::ready(Value::Null)
            } else {
                Future::failed(TransportError::SuppressedDuringReplay)
            };
        }

        let Some(shared) = self.shared() else {
            return Future::failed(TransportError::Unreachable(self.location.clone()));
        };
        let Some(home) = shared.transport.node(&self.location) else {
            return Future::failed(TransportError::Unreachable(self.location.clone()));
        };

        let future = if one_way {
            Future::ready(Value::Null)
        } else {
            home.futures().register(id, target.id())
        };
        let hint = shared
            .registry
            .lookup(target.id())
            .map(|r| r.location)
            .unwrap_or_else(|| target.location().clone());

        self.outbound.insert(target.id(), sequence);
        match shared.dispatch(request, &hint) {
            Ok(_) => future,
            Err(e) if one_way => Future::failed(e),
            Err(e) => {
                home.futures().fail(id, e.into());
                future
            }
        }
    }

    /// Outbound sequences of incarnation `n` start above `n << 32`. A
    /// recovered body never reuses a number its predecessor may have sent
    /// after the last checkpoint; replay runs with the old floor.
    fn sequence_floor(&self) -> u64 {
        let Some(ft) = self.ft.as_ref() else {
            return 0;
        };
        let incarnation = if self.replay.is_some() {
            ft.incarnation().saturating_sub(1)
        } else {
            ft.incarnation()
        };
        incarnation << 32
    }

    /// Capture a checkpoint of `object` and this body's bookkeeping.
    pub(crate) fn capture_checkpoint(
        &mut self,
        object: &dyn ErasedObject,
        pending: Option<RequestRecord>,
    ) -> Result<Checkpoint> {
        let shared = self
            .shared()
            .ok_or_else(|| ActiveError::RuntimeError("runtime is shutting down".to_string()))?;

        let prior = self.handle.status();
        self.handle.set_status(BodyStatus::Checkpointing);
        let state = object.capture().and_then(|v| shared.codec.encode(&v));
        self.handle.set_status(prior);
        let state = state?;

        let sequencer = self.mailbox().sequencer();
        let immediate = self.mailbox().policy().immediate_methods();
        let outbound = self.outbound_snapshot();
        let ft = self
            .ft
            .as_mut()
            .ok_or_else(|| ActiveError::InvalidRequest(format!("{} is not fault tolerant", self.id)))?;
        let draft = ft.prepare();

        Ok(Checkpoint {
            object_id: self.id,
            class: self.class.clone(),
            epoch: draft.epoch,
            incarnation: draft.incarnation,
            log_mark: draft.log_mark,
            state,
            codec: shared.codec.name().to_string(),
            request_log: draft.request_log,
            reply_log: draft.reply_log,
            pending,
            sequencer,
            outbound,
            next_reply_seq: self.next_reply_seq,
            immediate,
            location: self.location.clone(),
            created_at: Utc::now(),
        })
    }

    /// Store a checkpoint and wait for the server, within the server timeout.
    pub(crate) fn store_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<u64> {
        let shared = self
            .shared()
            .ok_or_else(|| ActiveError::RuntimeError("runtime is shutting down".to_string()))?;
        let (server, timeout) = match self.ft.as_ref() {
            Some(ft) => (ft.server(), ft.policy().server_timeout),
            None => return Err(ActiveError::InvalidRequest(format!("{} is not fault tolerant", self.id))),
        };
        let store = |checkpoint: Checkpoint| {
            let server = server.clone();
            shared
                .maintenance
                .run_bounded(timeout, move || server.store(checkpoint))
                .and_then(|stored| stored)
        };

        let (epoch, log_mark) = (checkpoint.epoch, checkpoint.log_mark);
        let result = match store(checkpoint.clone()) {
            Err(e) if self.catch_up(&e) => {
                let epoch = self.ft.as_ref().map_or(epoch, |ft| ft.committed_epoch() + 1);
                debug!("Retrying checkpoint of {} as epoch {}", self.id, epoch);
                store(Checkpoint { epoch, ..checkpoint }).map(|()| epoch)
            }
            other => other.map(|()| epoch),
        };

        match (result, self.ft.as_mut()) {
            (Ok(epoch), Some(ft)) => {
                ft.commit(epoch, log_mark);
                metrics::counter!(observability::CHECKPOINTS_COMMITTED).increment(1);
                info!("Checkpoint {} of {} committed (log mark {})", epoch, self.id, log_mark);
                Ok(epoch)
            }
            (Ok(epoch), None) => Ok(epoch),
            (Err(e), _) => {
                metrics::counter!(observability::CHECKPOINTS_FAILED).increment(1);
                warn!("Checkpoint {} of {} failed: {}", epoch, self.id, e);
                Err(e.into())
            }
        }
    }

    /// The server refused a checkpoint because it already holds that
    /// epoch, usually a write that timed out here and landed later. Fetch
    /// what it holds and continue from there. True if caught up.
    fn catch_up(&mut self, error: &RecoveryError) -> bool {
        if !matches!(error, RecoveryError::StaleCheckpoint { .. }) {
            return false;
        }
        let id = self.id;
        let Some(shared) = self.shared() else {
            return false;
        };
        let Some(ft) = self.ft.as_mut() else {
            return false;
        };

        let server = ft.server();
        let latest = shared
            .maintenance
            .run_bounded(ft.policy().server_timeout, move || server.fetch_latest(id))
            .and_then(|fetched| fetched);
        match latest {
            Ok(Some(stored)) => {
                ft.adopt(&stored);
                info!("{} caught up with checkpoint {} held by the server", id, stored.epoch);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Could not fetch the latest checkpoint of {}: {}", id, e);
                false
            }
        }
    }

    /// Start an asynchronous checkpoint if the trigger says so and none is
    /// in flight.
    fn maybe_checkpoint(&mut self, object: &dyn ErasedObject, pending: Option<&RequestRecord>) {
        let due = self.ft.as_ref().map(FtManager::should_checkpoint).unwrap_or(false);
        if !due || !self.handle.begin_checkpoint() {
            return;
        }

        let checkpoint = match self.capture_checkpoint(object, pending.cloned()) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Could not capture checkpoint of {}: {}", self.id, e);
                self.handle.end_checkpoint();
                return;
            }
        };

        match (self.shared(), self.ft.as_ref()) {
            (Some(shared), Some(ft)) => {
                debug!("Shipping checkpoint {} of {}", checkpoint.epoch, self.id);
                shared.maintenance.ship_checkpoint(
                    ft.server(),
                    checkpoint,
                    ft.policy().server_timeout,
                    self.mailbox().clone(),
                );
            }
            _ => self.handle.end_checkpoint(),
        }
    }

    fn on_checkpoint_shipped(&mut self, epoch: u64, log_mark: u64, result: std::result::Result<(), RecoveryError>) {
        self.handle.end_checkpoint();
        let Some(ft) = self.ft.as_mut() else {
            return;
        };
        match result {
            Ok(()) => {
                ft.commit(epoch, log_mark);
                metrics::counter!(observability::CHECKPOINTS_COMMITTED).increment(1);
                info!("Checkpoint {} of {} committed (log mark {})", epoch, self.id, log_mark);
            }
            Err(e) => {
                metrics::counter!(observability::CHECKPOINTS_FAILED).increment(1);
                warn!(
                    "Checkpoint {} of {} failed, {} log entries kept: {}",
                    epoch,
                    self.id,
                    ft.log_len(),
                    e
                );
                self.catch_up(&e);
            }
        }
    }

    /// Answer every queued request with a transport failure.
    fn fail_queued(&self, requests: Vec<Request>, error: TransportError) {
        for request in requests.into_iter().filter(Request::expects_reply) {
            self.deliver(Reply::failure(
                request.id(),
                self.id,
                request.reply_to().clone(),
                FutureError::Transport(error.clone()),
            ));
        }
    }

    /// Answer control messages that will never be handled.
    fn reject_controls(&self, controls: Vec<Control>) {
        for control in controls {
            match control {
                Control::Migrate(ticket) => ticket.finish(Err(MigrationError::NotActive(self.id))),
                Control::Checkpoint(tx) => {
                    let _ = tx.send(Err(TransportError::Terminated(self.id).into()));
                }
                Control::EnableFaultTolerance { respond, .. } => {
                    let _ = respond.send(Err(TransportError::Terminated(self.id).into()));
                }
                Control::Snapshot(tx) => {
                    let _ = tx.send(Err(CodecError::Encode(format!("{} has stopped", self.id))));
                }
                other => debug!("Dropped {:?} for stopped body {}", other, self.id),
            }
        }
    }
}

/// A body: its object plus everything around it
pub(crate) struct Body {
    pub(crate) object: Box<dyn ErasedObject>,
    pub(crate) env: BodyEnv,
}

impl Body {
    pub(crate) fn new(object: Box<dyn ErasedObject>, env: BodyEnv) -> Self {
        Self { object, env }
    }

    /// Start the serving thread.
    pub(crate) fn spawn(self) -> Result<Arc<BodyHandle>> {
        let handle = self.env.handle.clone();
        let name = format!("body-{}", self.env.id);
        handle.set_status(BodyStatus::Active);

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| ActiveError::RuntimeError(format!("Failed to spawn serving thread: {}", e)))?;
        handle.attach_thread(thread);
        Ok(handle)
    }

    fn run(mut self) {
        info!(
            "Body {} ({}) serving at {}",
            self.env.id, self.env.class, self.env.location
        );

        loop {
            let flow = match self.env.mailbox().take(self.env.idle_tick) {
                Take::Control(control) => self.handle_control(control),
                Take::Request(request) => self.handle_request(request),
                Take::Idle => {
                    self.on_idle();
                    Flow::Continue
                }
                Take::Closed => {
                    self.env.release_held(true);
                    if !self.env.handle.status().is_final() {
                        self.env.handle.set_status(BodyStatus::Terminated);
                    }
                    Flow::Stop
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }

        info!("Body {} stopped ({})", self.env.id, self.env.handle.status());
    }

    /// Re-execute the replay queue; the body is not running yet.
    pub(crate) fn replay(&mut self) -> std::result::Result<(), CapacityError> {
        loop {
            let next = self.env.replay.as_mut().and_then(ReplayState::next);
            let Some(request) = next else {
                return Ok(());
            };
            self.env.mailbox().observe(request.sender(), request.sequence());
            self.env.serve(&mut *self.object, request)?;
        }
    }

    fn handle_request(&mut self, request: Request) -> Flow {
        let result = self.env.serve(&mut *self.object, request);
        match result.err().or_else(|| self.env.fatal.take()) {
            Some(e) => self.fail(e),
            None => Flow::Continue,
        }
    }

    fn handle_control(&mut self, control: Control) -> Flow {
        debug!("{} handling {:?}", self.env.id, control);
        match control {
            Control::Migrate(ticket) => crate::migration::manager::depart(self, ticket),
            Control::Checkpoint(respond) => {
                let result = self.checkpoint_now();
                let _ = respond.send(result);
                Flow::Continue
            }
            Control::CheckpointShipped {
                epoch,
                log_mark,
                result,
            } => {
                self.env.on_checkpoint_shipped(epoch, log_mark, result);
                Flow::Continue
            }
            Control::EnableFaultTolerance { policy, respond } => {
                let result = self.enable_fault_tolerance(policy);
                let _ = respond.send(result);
                Flow::Continue
            }
            Control::Continuation(continuation) => {
                self.env.continuations = self.env.continuations.saturating_sub(1);
                let object = &mut *self.object;
                let mut ctx = ServiceContext::new(&mut self.env);
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| continuation(object, &mut ctx))) {
                    warn!("Continuation panicked: {}", panic_message(panic.as_ref()));
                }
                match self.env.fatal.take() {
                    Some(e) => self.fail(e),
                    None => Flow::Continue,
                }
            }
            Control::Crash => self.stop(CloseReason::Crashed),
            Control::Terminate => self.stop(CloseReason::Terminated),
            Control::Snapshot(respond) => {
                let _ = respond.send(self.object.capture());
                Flow::Continue
            }
        }
    }

    fn on_idle(&mut self) {
        self.env.release_held(false);
        if self.env.ft.is_some() {
            self.env.maybe_checkpoint(&*self.object, None);
        }
    }

    fn checkpoint_now(&mut self) -> Result<u64> {
        if self.env.ft.is_none() {
            return Err(ActiveError::InvalidRequest(format!(
                "{} is not fault tolerant",
                self.env.id
            )));
        }
        if !self.env.handle.begin_checkpoint() {
            return Err(ActiveError::CheckpointInProgress(self.env.id));
        }
        let result = self
            .env
            .capture_checkpoint(&*self.object, None)
            .and_then(|checkpoint| self.env.store_checkpoint(checkpoint));
        self.env.handle.end_checkpoint();
        result
    }

    fn enable_fault_tolerance(&mut self, policy: FtPolicy) -> Result<u64> {
        if let Some(ft) = self.env.ft.as_ref() {
            return Ok(ft.committed_epoch());
        }
        if self.env.continuations > 0 {
            return Err(ActiveError::InvalidRequest(format!(
                "{} has {} continuations pending, which cannot be replayed",
                self.env.id, self.env.continuations
            )));
        }
        let shared = self
            .env
            .shared()
            .ok_or_else(|| ActiveError::RuntimeError("runtime is shutting down".to_string()))?;

        self.env.ft = Some(FtManager::new(self.env.id, policy, shared.recovery.clone()));
        self.env.handle.set_fault_tolerant(true);

        let result = self.checkpoint_now();
        match &result {
            Ok(epoch) => info!("Fault tolerance enabled for {} (epoch {})", self.env.id, epoch),
            Err(e) => {
                warn!("Could not enable fault tolerance for {}: {}", self.env.id, e);
                self.env.ft = None;
                self.env.handle.set_fault_tolerant(false);
            }
        }
        result
    }

    /// Leave immediately: crash or immediate termination.
    fn stop(&mut self, reason: CloseReason) -> Flow {
        let (status, error) = match &reason {
            CloseReason::Crashed => (BodyStatus::Crashed, TransportError::TargetCrashed(self.env.id)),
            _ => (BodyStatus::Terminated, TransportError::Terminated(self.env.id)),
        };
        match reason {
            CloseReason::Crashed => warn!("Body {} crashed", self.env.id),
            _ => info!("Body {} terminated", self.env.id),
        }
        // Uncommitted replies die with a crashed body.
        if matches!(reason, CloseReason::Crashed) {
            self.env.held.clear();
        } else {
            self.env.release_held(true);
        }

        let (requests, controls) = self.env.mailbox().close(reason);
        self.env.fail_queued(requests, error);
        self.env.reject_controls(controls);
        self.env.handle.set_status(status);
        Flow::Stop
    }

    /// Fatal body-management failure.
    fn fail(&mut self, error: CapacityError) -> Flow {
        error!("Body {} failed: {}", self.env.id, error);
        self.env.release_held(true);
        let (requests, controls) = self.env.mailbox().close(CloseReason::Failed(error.clone()));
        self.env.fail_queued(requests, TransportError::Rejected(error.clone()));
        self.env.reject_controls(controls);
        self.env.handle.set_status(BodyStatus::Failed(error.to_string()));
        Flow::Stop
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::policy::ServingPolicy;
    use crate::fault_tolerance::server::tests::checkpoint;
    use crate::fault_tolerance::InMemoryRecoveryServer;

    fn env() -> BodyEnv {
        let id = ObjectId::new();
        let mailbox = Arc::new(Mailbox::new(id, 8, ServingPolicy::fifo()));
        let handle = Arc::new(BodyHandle::new(id, "Counter", mailbox, false));
        BodyEnv::new(
            id,
            "Counter",
            Location::new("localhost", 9000),
            handle,
            Weak::new(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_sequence_floor_moves_with_incarnation() {
        let mut env = env();
        assert_eq!(env.sequence_floor(), 0);

        let server = Arc::new(InMemoryRecoveryServer::new());
        env.ft = Some(FtManager::new(env.id, FtPolicy::default(), server.clone()));
        assert_eq!(env.sequence_floor(), 0);

        let cp = checkpoint(env.id, 1, 0);
        env.ft = Some(FtManager::restored(env.id, FtPolicy::default(), server, &cp, &[]));
        assert_eq!(env.sequence_floor(), 1 << 32);

        env.replay = Some(ReplayState::default());
        assert_eq!(env.sequence_floor(), 0);
    }

    #[test]
    fn test_send_without_runtime_fails_the_future() {
        let mut env = env();
        let target = ActiveRef::new(ObjectId::new(), "Counter", Location::new("localhost", 9000));
        let future = env.send_request(&target, "get", Vec::new(), false);
        assert!(matches!(
            future.outcome(),
            Some(Err(FutureError::Transport(TransportError::Unreachable(_))))
        ));
        assert!(env.outbound.is_empty());
    }
}
