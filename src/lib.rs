// src/lib.rs
//! Proxima Active-Object Runtime Library
//!
//! An active object owns private state and a mailbox of requests served one
//! at a time by its own thread. Callers get a [`Future`] back immediately
//! and synchronize on it later. Objects can move between nodes without
//! invalidating references, and fault-tolerant objects are checkpointed and
//! replayed after a crash without repeating replies callers already saw.
//!
//! # Architecture
//!
//! The runtime is structured into several key modules:
//!
//! - **identity**: object ids, locations and the versioned location registry
//! - **messaging**: immutable requests and replies
//! - **future**: placeholders, wait-by-necessity, groups and liveness monitoring
//! - **body**: the per-object mailbox, serving loop and serving policy
//! - **migration**: relocation handshake and forwarders
//! - **fault_tolerance**: message log, checkpoints, recovery servers and replay
//! - **runtime**: nodes, the in-process transport and the public facade
//! - **serialization**: state codecs and compression
//! - **observability**: tracing subscriber and metrics
//! - **utils**: errors and configuration

// Public module exports
pub mod body;
pub mod fault_tolerance;
pub mod future;
pub mod identity;
pub mod messaging;
pub mod migration;
pub mod observability;
pub mod runtime;
pub mod serialization;
pub mod utils;

// Re-export commonly used types
pub use body::{ActiveObject, ServiceContext};
pub use fault_tolerance::FtPolicy;
pub use future::Future;
pub use identity::{Location, ObjectId};
pub use messaging::{Argument, Outcome, Value};
pub use runtime::{ActiveRef, ActiveRuntime};
pub use utils::config::RuntimeConfig;
pub use utils::errors::{ActiveError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
