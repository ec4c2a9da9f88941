// src/body/control.rs
//! Control-lane messages
//!
//! Everything that must touch a body's state from outside the serving
//! loop is sent as a [`Control`] message and executed by the loop itself,
//! between two requests. Control messages overtake queued requests.

use crate::body::active_object::ErasedObject;
use crate::body::context::ServiceContext;
use crate::fault_tolerance::FtPolicy;
use crate::migration::MigrationTicket;
use crate::utils::errors::{ActiveError, CodecError, RecoveryError};
use crossbeam_channel::Sender;
use serde_json::Value;
use std::fmt;

/// Code to run against the object on its serving thread.
pub(crate) type Continuation = Box<dyn FnOnce(&mut dyn ErasedObject, &mut ServiceContext<'_>) + Send>;

pub(crate) enum Control {
    /// Move to the ticket's destination.
    Migrate(MigrationTicket),

    /// Take and store a checkpoint now; answers with the committed epoch.
    Checkpoint(Sender<Result<u64, ActiveError>>),

    /// An asynchronous checkpoint write finished.
    CheckpointShipped {
        epoch: u64,
        log_mark: u64,
        result: Result<(), RecoveryError>,
    },

    /// Start logging and checkpointing; answers with the first epoch.
    EnableFaultTolerance {
        policy: FtPolicy,
        respond: Sender<Result<u64, ActiveError>>,
    },

    /// A future the object waited on resolved.
    Continuation(Continuation),

    /// Stop abruptly without answering queued requests (fault injection).
    Crash,

    /// Stop now, failing queued requests.
    Terminate,

    /// Capture the current state.
    Snapshot(Sender<Result<Value, CodecError>>),
}

impl Control {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Control::Migrate(_) => "migrate",
            Control::Checkpoint(_) => "checkpoint",
            Control::CheckpointShipped { .. } => "checkpoint-shipped",
            Control::EnableFaultTolerance { .. } => "enable-ft",
            Control::Continuation(_) => "continuation",
            Control::Crash => "crash",
            Control::Terminate => "terminate",
            Control::Snapshot(_) => "snapshot",
        }
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Control::{}", self.kind())
    }
}
