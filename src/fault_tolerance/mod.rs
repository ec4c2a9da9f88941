// src/fault_tolerance/mod.rs
//! Checkpoint / message-log fault tolerance
//!
//! - **Checkpoint**: encoded state plus serving bookkeeping, taken between
//!   two requests
//! - **Message log**: pessimistic; every served request and every emitted
//!   reply is written to the [`RecoveryServer`] before it takes effect
//! - **Triggers**: decide when a checkpoint is due
//! - **Recovery**: restore the latest checkpoint, replay the log, suppress
//!   replies that already went out

pub mod checkpoint;
pub(crate) mod manager;
pub mod policy;
pub mod recovery;
pub mod server;
pub mod storage;

pub use checkpoint::{Checkpoint, LogRecord};
pub use policy::{AnyOf, CheckpointProgress, CheckpointTrigger, EveryRequests, FtPolicy, Never, Periodic};
pub use recovery::ReplayReport;
pub use server::{InMemoryRecoveryServer, RecoveryServer, ServerResult, ServerStats};
pub use storage::SqliteRecoveryServer;
