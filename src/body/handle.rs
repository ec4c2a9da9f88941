// src/body/handle.rs
//! Shared handle on a running body
//!
//! The serving thread owns the object; everybody else talks to the body
//! through this handle: its mailbox, its published status and a few flags
//! guarding migration and checkpointing.

use crate::body::control::Control;
use crate::body::mailbox::Mailbox;
use crate::identity::{Location, ObjectId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

/// Lifecycle of a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyStatus {
    Created,
    Active,
    MigratingOut,
    Checkpointing,
    Moved(Location),
    Crashed,
    Recovering,
    Terminated,
    /// Stopped by a fatal body-management error
    Failed(String),
}

impl BodyStatus {
    /// Will never serve again at this handle.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BodyStatus::Moved(_) | BodyStatus::Terminated | BodyStatus::Failed(_)
        )
    }
}

impl fmt::Display for BodyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyStatus::Moved(to) => write!(f, "moved to {}", to),
            BodyStatus::Failed(reason) => write!(f, "failed: {}", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

pub struct BodyHandle {
    id: ObjectId,
    class: String,
    mailbox: Arc<Mailbox>,
    status: RwLock<BodyStatus>,
    thread: Mutex<Option<JoinHandle<()>>>,
    fault_tolerant: AtomicBool,
    checkpoint_in_flight: AtomicBool,
    migrating: AtomicBool,
}

impl BodyHandle {
    pub(crate) fn new(id: ObjectId, class: impl Into<String>, mailbox: Arc<Mailbox>, fault_tolerant: bool) -> Self {
        Self {
            id,
            class: class.into(),
            mailbox,
            status: RwLock::new(BodyStatus::Created),
            thread: Mutex::new(None),
            fault_tolerant: AtomicBool::new(fault_tolerant),
            checkpoint_in_flight: AtomicBool::new(false),
            migrating: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn status(&self) -> BodyStatus {
        self.status.read().clone()
    }

    pub(crate) fn set_status(&self, status: BodyStatus) {
        *self.status.write() = status;
    }

    /// Switch `from -> to` atomically; false if the status was something else.
    pub(crate) fn transition(&self, from: &BodyStatus, to: BodyStatus) -> bool {
        let mut status = self.status.write();
        if *status == *from {
            *status = to;
            true
        } else {
            false
        }
    }

    pub fn is_fault_tolerant(&self) -> bool {
        self.fault_tolerant.load(Ordering::Acquire)
    }

    pub(crate) fn set_fault_tolerant(&self, enabled: bool) {
        self.fault_tolerant.store(enabled, Ordering::Release);
    }

    pub fn checkpoint_in_flight(&self) -> bool {
        self.checkpoint_in_flight.load(Ordering::Acquire)
    }

    /// Claim the single checkpoint slot; false if one is already in flight.
    pub(crate) fn begin_checkpoint(&self) -> bool {
        self.checkpoint_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_checkpoint(&self) {
        self.checkpoint_in_flight.store(false, Ordering::Release);
    }

    /// Claim the migration slot; false if a migration is already running.
    pub(crate) fn begin_migration(&self) -> bool {
        self.migrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_migration(&self) {
        self.migrating.store(false, Ordering::Release);
    }

    pub(crate) fn send_control(&self, control: Control) -> Result<(), Control> {
        self.mailbox.push_control(control)
    }

    pub(crate) fn attach_thread(&self, thread: JoinHandle<()>) {
        *self.thread.lock() = Some(thread);
    }

    /// Wait for the serving thread to exit.
    pub fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() == std::thread::current().id() {
                warn!("Body {} asked to join its own serving thread", self.id);
                return;
            }
            if thread.join().is_err() {
                warn!("Serving thread of {} panicked", self.id);
            }
        }
    }
}

impl fmt::Debug for BodyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyHandle")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::policy::ServingPolicy;

    fn handle() -> BodyHandle {
        let id = ObjectId::new();
        BodyHandle::new(id, "Test", Arc::new(Mailbox::new(id, 4, ServingPolicy::fifo())), false)
    }

    #[test]
    fn test_single_checkpoint_slot() {
        let handle = handle();
        assert!(handle.begin_checkpoint());
        assert!(!handle.begin_checkpoint());
        handle.end_checkpoint();
        assert!(handle.begin_checkpoint());
    }

    #[test]
    fn test_transition() {
        let handle = handle();
        handle.set_status(BodyStatus::Crashed);
        assert!(handle.transition(&BodyStatus::Crashed, BodyStatus::Recovering));
        assert!(!handle.transition(&BodyStatus::Crashed, BodyStatus::Recovering));
        assert_eq!(handle.status(), BodyStatus::Recovering);
    }
}
