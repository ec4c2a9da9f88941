// src/utils/errors.rs
//! Error taxonomy for the active-object runtime
//!
//! Each failure kind gets its own enum so it can travel where it belongs:
//! invocation and transport failures end up inside a failed [`Future`],
//! migration failures go back to the migration caller, recovery failures
//! are fatal for the object being recovered. [`ActiveError`] aggregates
//! them for the public runtime surface.
//!
//! [`Future`]: crate::future::Future

use crate::identity::{Location, ObjectId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A user method failed while serving a request.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InvocationError {
    #[error("class {class} has no method {method}")]
    NoSuchMethod { class: String, method: String },

    #[error("bad argument #{index}: {reason}")]
    BadArgument { index: usize, reason: String },

    #[error("method {method} failed: {reason}")]
    Failed { method: String, reason: String },

    #[error("method {method} panicked: {reason}")]
    Panicked { method: String, reason: String },

    #[error("cannot construct {class}: {reason}")]
    Construction { class: String, reason: String },
}

impl InvocationError {
    /// Shorthand for a user-level failure of `method`.
    pub fn failed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// A message could not reach its destination.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportError {
    #[error("location {0} is unreachable")]
    Unreachable(Location),

    #[error("object {id} is not hosted at {location}")]
    UnknownObject { id: ObjectId, location: Location },

    #[error("object {0} has terminated")]
    Terminated(ObjectId),

    #[error("object {0} crashed before serving the request")]
    TargetCrashed(ObjectId),

    #[error("too many forwarding hops while routing to {0}")]
    TooManyHops(ObjectId),

    #[error("request rejected: {0}")]
    Rejected(CapacityError),

    #[error("outbound message suppressed during replay")]
    SuppressedDuringReplay,

    /// Redirect signal: the object now lives at the given location.
    #[error("object {0} moved to {1}")]
    Moved(ObjectId, Location),
}

/// Unbounded growth was refused.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapacityError {
    #[error("mailbox of {id} is full ({capacity} requests)")]
    MailboxFull { id: ObjectId, capacity: usize },

    #[error("message log of {id} exceeded {limit} entries without a checkpoint")]
    LogOverflow { id: ObjectId, limit: usize },
}

/// The failure stored in a failed future.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FutureError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Only returned to a timed waiter, never stored in the future.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Migration failed; the object stays where it was.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MigrationError {
    #[error("a migration of {0} is already in progress")]
    InProgress(ObjectId),

    #[error("{0} has a checkpoint write in flight")]
    CheckpointInProgress(ObjectId),

    #[error("destination {0} is unreachable")]
    DestinationUnreachable(Location),

    #[error("state serialization failed: {0}")]
    Serialization(String),

    #[error("migration handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("object {0} is not hosted by any known node")]
    NotLocal(ObjectId),

    #[error("object {0} is not active")]
    NotActive(ObjectId),
}

/// Recovery failed; fatal for the object.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecoveryError {
    #[error("no checkpoint stored for {0}")]
    NoCheckpoint(ObjectId),

    #[error("message log of {id} is corrupted: {reason}")]
    CorruptLog { id: ObjectId, reason: String },

    #[error("replay of {id} diverged at request {request}")]
    ReplayDivergence { id: ObjectId, request: String },

    #[error("class {0} is not registered")]
    UnknownClass(String),

    #[error("recovery server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("checkpoint epoch {proposed} of {id} is not newer than stored epoch {stored}")]
    StaleCheckpoint { id: ObjectId, stored: u64, proposed: u64 },

    #[error("checkpoint codec failed: {0}")]
    Codec(String),

    #[error("object {0} is not crashed")]
    AlreadyActive(ObjectId),
}

/// Location registry update rejected.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryError {
    #[error("object {0} is already registered")]
    AlreadyRegistered(ObjectId),

    #[error("object {0} is not registered")]
    NotRegistered(ObjectId),

    #[error("stale epoch {proposed} for {id} (current {current})")]
    StaleEpoch { id: ObjectId, current: u64, proposed: u64 },
}

/// State encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Runtime-level errors
#[derive(Error, Debug)]
pub enum ActiveError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Future(#[from] FutureError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Unknown node: {0}")]
    UnknownNode(Location),

    #[error("Checkpoint already in flight for {0}")]
    CheckpointInProgress(ObjectId),

    #[error("Storage failed: {0}")]
    StorageFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<config::ConfigError> for ActiveError {
    fn from(e: config::ConfigError) -> Self {
        ActiveError::ConfigError(e.to_string())
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, ActiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_error_wraps_transport() {
        let id = ObjectId::new();
        let err: FutureError = TransportError::Terminated(id).into();
        assert!(matches!(err, FutureError::Transport(TransportError::Terminated(x)) if x == id));
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn test_errors_survive_serialization() {
        let err = FutureError::Invocation(InvocationError::failed("get", "boom"));
        let json = serde_json::to_string(&err).unwrap();
        let back: FutureError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn test_active_error_from_recovery() {
        let id = ObjectId::new();
        let err: ActiveError = RecoveryError::NoCheckpoint(id).into();
        assert!(matches!(err, ActiveError::Recovery(RecoveryError::NoCheckpoint(_))));
    }
}
