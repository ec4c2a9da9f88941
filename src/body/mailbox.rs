// src/body/mailbox.rs
//! Multi-producer, single-consumer mailbox of a body
//!
//! Three lanes, served in priority order:
//!
//! ```text
//!   push_control ──► [ control   ] ─┐
//!   push (immediate method) ─► [ immediate ] ─┼─► take() ──► serving loop
//!   push (other methods)    ─► [ normal    ] ─┘
//! ```
//!
//! Requests are deduplicated per sender: a request whose sequence number
//! is not above the highest one accepted from that sender is dropped,
//! which makes at-least-once delivery safe. Requests from one sender are
//! appended in arrival order, so per sender-target FIFO holds as long as
//! the sender sends one request at a time.

use crate::body::control::Control;
use crate::body::policy::ServingPolicy;
use crate::identity::{Location, ObjectId};
use crate::messaging::Request;
use crate::observability;
use crate::utils::errors::{CapacityError, TransportError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a mailbox stopped accepting requests
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    Moved(Location),
    Terminated,
    Crashed,
    Failed(CapacityError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MailboxMode {
    /// Accepting and serving
    Open,

    /// Accepting; state is being shipped elsewhere
    Transferring,

    /// Rejecting new requests; queued ones are still served
    Draining,

    /// Rejecting everything
    Closed(CloseReason),
}

/// Outcome of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Queued,
    Duplicate,
}

/// What the serving loop gets from [`Mailbox::take`]
#[derive(Debug)]
pub(crate) enum Take {
    Control(Control),
    Request(Request),
    Idle,
    Closed,
}

struct Lanes {
    control: VecDeque<Control>,
    immediate: VecDeque<Request>,
    normal: VecDeque<Request>,
    sequencer: HashMap<ObjectId, u64>,
    mode: MailboxMode,
}

impl Lanes {
    fn queued(&self) -> usize {
        self.immediate.len() + self.normal.len()
    }

    fn drain_requests(&mut self) -> Vec<Request> {
        self.immediate.drain(..).chain(self.normal.drain(..)).collect()
    }
}

/// Mailbox of one body
pub struct Mailbox {
    id: ObjectId,
    capacity: usize,
    lanes: Mutex<Lanes>,
    ready: Condvar,
    policy: RwLock<ServingPolicy>,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    taken: AtomicU64,
}

impl Mailbox {
    pub fn new(id: ObjectId, capacity: usize, policy: ServingPolicy) -> Self {
        Self {
            id,
            capacity,
            lanes: Mutex::new(Lanes {
                control: VecDeque::new(),
                immediate: VecDeque::new(),
                normal: VecDeque::new(),
                sequencer: HashMap::new(),
                mode: MailboxMode::Open,
            }),
            ready: Condvar::new(),
            policy: RwLock::new(policy),
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }

    /// Rebuild a mailbox that arrived by migration or from a checkpoint.
    pub fn restore(
        id: ObjectId,
        capacity: usize,
        policy: ServingPolicy,
        sequencer: Vec<(ObjectId, u64)>,
        requests: Vec<Request>,
    ) -> Self {
        let mailbox = Self::new(id, capacity, policy);
        {
            let mut lanes = mailbox.lanes.lock();
            lanes.sequencer = sequencer.into_iter().collect();
            let policy = mailbox.policy.read();
            for request in requests {
                if policy.is_immediate(request.method()) {
                    lanes.immediate.push_back(request);
                } else {
                    lanes.normal.push_back(request);
                }
            }
        }
        mailbox
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Enqueue a request from any thread.
    pub fn push(&self, request: Request) -> Result<Accepted, TransportError> {
        let mut lanes = self.lanes.lock();
        match &lanes.mode {
            MailboxMode::Open | MailboxMode::Transferring => {}
            MailboxMode::Draining | MailboxMode::Closed(CloseReason::Terminated) => {
                return Err(TransportError::Terminated(self.id))
            }
            MailboxMode::Closed(CloseReason::Moved(to)) => {
                return Err(TransportError::Moved(self.id, to.clone()))
            }
            MailboxMode::Closed(CloseReason::Crashed) => {
                return Err(TransportError::TargetCrashed(self.id))
            }
            MailboxMode::Closed(CloseReason::Failed(e)) => return Err(TransportError::Rejected(e.clone())),
        }

        let sender = request.sender();
        let last = lanes.sequencer.get(&sender).copied().unwrap_or(0);
        if request.sequence() <= last {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(observability::DUPLICATES_DROPPED).increment(1);
            debug!("Dropped duplicate request {} for {}", request.id(), self.id);
            return Ok(Accepted::Duplicate);
        }

        if lanes.queued() >= self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("Mailbox of {} is full, rejecting {}", self.id, request.id());
            return Err(TransportError::Rejected(CapacityError::MailboxFull {
                id: self.id,
                capacity: self.capacity,
            }));
        }

        lanes.sequencer.insert(sender, request.sequence());
        if self.policy.read().is_immediate(request.method()) {
            lanes.immediate.push_back(request);
        } else {
            lanes.normal.push_back(request);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(observability::REQUESTS_ACCEPTED).increment(1);
        drop(lanes);

        self.ready.notify_one();
        Ok(Accepted::Queued)
    }

    /// Enqueue a control message; hands it back if the mailbox is closed.
    pub(crate) fn push_control(&self, control: Control) -> Result<(), Control> {
        let mut lanes = self.lanes.lock();
        if let MailboxMode::Closed(_) = lanes.mode {
            return Err(control);
        }
        lanes.control.push_back(control);
        drop(lanes);

        self.ready.notify_one();
        Ok(())
    }

    /// Next item for the serving loop, waiting at most `wait`.
    pub(crate) fn take(&self, wait: Duration) -> Take {
        let deadline = Instant::now() + wait;
        let mut lanes = self.lanes.lock();
        let mut timed_out = false;
        loop {
            if let Some(control) = lanes.control.pop_front() {
                return Take::Control(control);
            }
            if let MailboxMode::Closed(_) = lanes.mode {
                return Take::Closed;
            }
            if let Some(request) = lanes.immediate.pop_front().or_else(|| lanes.normal.pop_front()) {
                self.taken.fetch_add(1, Ordering::Relaxed);
                return Take::Request(request);
            }
            if lanes.mode == MailboxMode::Draining {
                return Take::Closed;
            }
            if timed_out {
                return Take::Idle;
            }
            timed_out = self.ready.wait_until(&mut lanes, deadline).timed_out();
        }
    }

    /// Next queued immediate-service request, without waiting.
    pub fn try_take_immediate(&self) -> Option<Request> {
        let request = self.lanes.lock().immediate.pop_front();
        if request.is_some() {
            self.taken.fetch_add(1, Ordering::Relaxed);
        }
        request
    }

    /// Keep accepting while state is captured for migration.
    pub fn set_transferring(&self) {
        let mut lanes = self.lanes.lock();
        if lanes.mode == MailboxMode::Open {
            lanes.mode = MailboxMode::Transferring;
        }
    }

    /// Back to normal service after an aborted migration.
    pub fn reopen(&self) {
        let mut lanes = self.lanes.lock();
        if lanes.mode == MailboxMode::Transferring {
            lanes.mode = MailboxMode::Open;
        }
    }

    /// Hand every queued request plus the sequencer to `ship`, holding the
    /// mailbox lock so nothing can be enqueued in between. On success the
    /// mailbox is closed as moved and the leftover control messages are
    /// returned; on failure it is reopened untouched.
    pub(crate) fn transfer_out<E, F>(&self, ship: F) -> Result<Vec<Control>, E>
    where
        F: FnOnce(Vec<Request>, Vec<(ObjectId, u64)>) -> Result<Location, E>,
    {
        let mut lanes = self.lanes.lock();
        let requests: Vec<Request> = lanes.immediate.iter().chain(lanes.normal.iter()).cloned().collect();
        let sequencer: Vec<(ObjectId, u64)> = lanes.sequencer.iter().map(|(k, v)| (*k, *v)).collect();

        match ship(requests, sequencer) {
            Ok(to) => {
                lanes.immediate.clear();
                lanes.normal.clear();
                lanes.mode = MailboxMode::Closed(CloseReason::Moved(to));
                Ok(lanes.control.drain(..).collect())
            }
            Err(e) => {
                if lanes.mode == MailboxMode::Transferring {
                    lanes.mode = MailboxMode::Open;
                }
                Err(e)
            }
        }
    }

    /// Stop accepting anything; returns what was still queued.
    pub(crate) fn close(&self, reason: CloseReason) -> (Vec<Request>, Vec<Control>) {
        let mut lanes = self.lanes.lock();
        lanes.mode = MailboxMode::Closed(reason);
        let requests = lanes.drain_requests();
        let controls = lanes.control.drain(..).collect();
        drop(lanes);

        self.ready.notify_all();
        (requests, controls)
    }

    /// Reject new requests but let the queued ones be served.
    pub fn close_gracefully(&self) {
        let mut lanes = self.lanes.lock();
        if matches!(lanes.mode, MailboxMode::Open | MailboxMode::Transferring) {
            lanes.mode = MailboxMode::Draining;
        }
        drop(lanes);
        self.ready.notify_all();
    }

    /// Highest accepted sequence number per sender
    pub fn sequencer(&self) -> Vec<(ObjectId, u64)> {
        self.lanes.lock().sequencer.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Record a sequence number seen outside `push` (replayed requests).
    pub fn observe(&self, sender: ObjectId, sequence: u64) {
        let mut lanes = self.lanes.lock();
        let last = lanes.sequencer.entry(sender).or_insert(0);
        if sequence > *last {
            *last = sequence;
        }
    }

    pub fn mode(&self) -> MailboxMode {
        self.lanes.lock().mode.clone()
    }

    pub fn policy(&self) -> ServingPolicy {
        self.policy.read().clone()
    }

    pub fn set_immediate(&self, method: &str, enabled: bool) -> bool {
        self.policy.write().set_immediate(method, enabled)
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().queued()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            queued: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Mailbox statistics
#[derive(Debug, Clone)]
pub struct MailboxStats {
    /// Requests accepted into a lane
    pub accepted: u64,

    /// Requests dropped as duplicates
    pub duplicates: u64,

    /// Requests rejected because the mailbox was full
    pub rejected: u64,

    /// Requests handed to the serving loop
    pub taken: u64,

    /// Requests currently queued
    pub queued: usize,

    /// Mailbox capacity
    pub capacity: usize,
}

impl MailboxStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.queued as f64 / self.capacity as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RequestId;

    fn request(sender: ObjectId, target: ObjectId, seq: u64, method: &str) -> Request {
        Request::call(
            RequestId::new(sender, seq),
            target,
            method,
            vec![],
            Location::new("localhost", 1),
        )
        .unwrap()
    }

    fn take_request(mailbox: &Mailbox) -> Request {
        match mailbox.take(Duration::from_millis(10)) {
            Take::Request(r) => r,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[test]
    fn test_fifo_and_duplicates() {
        let id = ObjectId::new();
        let sender = ObjectId::new();
        let mailbox = Mailbox::new(id, 8, ServingPolicy::fifo());

        assert_eq!(mailbox.push(request(sender, id, 1, "a")).unwrap(), Accepted::Queued);
        assert_eq!(mailbox.push(request(sender, id, 2, "b")).unwrap(), Accepted::Queued);
        assert_eq!(mailbox.push(request(sender, id, 2, "b")).unwrap(), Accepted::Duplicate);

        assert_eq!(take_request(&mailbox).method(), "a");
        assert_eq!(take_request(&mailbox).method(), "b");
        assert!(matches!(mailbox.take(Duration::from_millis(5)), Take::Idle));
        assert_eq!(mailbox.stats().duplicates, 1);
    }

    #[test]
    fn test_immediate_lane_first() {
        let id = ObjectId::new();
        let sender = ObjectId::new();
        let mailbox = Mailbox::new(id, 8, ServingPolicy::with_immediate(["status"]));

        mailbox.push(request(sender, id, 1, "slow")).unwrap();
        mailbox.push(request(sender, id, 2, "status")).unwrap();

        assert_eq!(take_request(&mailbox).method(), "status");
        assert_eq!(take_request(&mailbox).method(), "slow");
    }

    #[test]
    fn test_control_overtakes_requests() {
        let id = ObjectId::new();
        let mailbox = Mailbox::new(id, 8, ServingPolicy::fifo());
        mailbox.push(request(ObjectId::new(), id, 1, "a")).unwrap();
        mailbox.push_control(Control::Crash).unwrap();

        assert!(matches!(mailbox.take(Duration::from_millis(5)), Take::Control(Control::Crash)));
    }

    #[test]
    fn test_capacity_rejects() {
        let id = ObjectId::new();
        let sender = ObjectId::new();
        let mailbox = Mailbox::new(id, 1, ServingPolicy::fifo());
        mailbox.push(request(sender, id, 1, "a")).unwrap();

        let err = mailbox.push(request(sender, id, 2, "a")).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected(CapacityError::MailboxFull { capacity: 1, .. })
        ));
        // the rejected sequence number was not consumed
        take_request(&mailbox);
        assert_eq!(mailbox.push(request(sender, id, 2, "a")).unwrap(), Accepted::Queued);
    }

    #[test]
    fn test_graceful_close_drains() {
        let id = ObjectId::new();
        let sender = ObjectId::new();
        let mailbox = Mailbox::new(id, 8, ServingPolicy::fifo());
        mailbox.push(request(sender, id, 1, "a")).unwrap();
        mailbox.close_gracefully();

        assert!(matches!(
            mailbox.push(request(sender, id, 2, "a")),
            Err(TransportError::Terminated(_))
        ));
        take_request(&mailbox);
        assert!(matches!(mailbox.take(Duration::from_millis(5)), Take::Closed));
    }

    #[test]
    fn test_transfer_out_failure_keeps_requests() {
        let id = ObjectId::new();
        let sender = ObjectId::new();
        let mailbox = Mailbox::new(id, 8, ServingPolicy::fifo());
        mailbox.push(request(sender, id, 1, "a")).unwrap();
        mailbox.set_transferring();

        let result: Result<Vec<Control>, &str> = mailbox.transfer_out(|requests, sequencer| {
            assert_eq!(requests.len(), 1);
            assert_eq!(sequencer, vec![(sender, 1)]);
            Err("unreachable")
        });
        assert!(result.is_err());
        assert_eq!(mailbox.mode(), MailboxMode::Open);
        assert_eq!(mailbox.len(), 1);

        let to = Location::new("elsewhere", 2);
        let target = to.clone();
        let leftovers: Result<Vec<Control>, &str> = mailbox.transfer_out(move |_, _| Ok(target));
        assert!(leftovers.unwrap().is_empty());
        assert!(matches!(
            mailbox.push(request(sender, id, 2, "a")),
            Err(TransportError::Moved(_, loc)) if loc == to
        ));
    }
}
