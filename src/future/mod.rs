// src/future/mod.rs
//! Futures: caller-side placeholders for asynchronous results
//!
//! - **Future**: write-once cell with blocking, timed and continuation-based
//!   synchronization
//! - **Groups**: `wait_any` / `wait_all` over sets of futures
//! - **FutureRegistry**: per-node table resolving futures from replies
//! - **FutureMonitor**: fails futures whose target died
//!
//! # Wait-by-necessity
//!
//! A future may be passed as a request argument before it resolves. The
//! receiving method blocks only when it reads that argument.

pub mod cell;
pub mod group;
pub mod monitor;
pub mod registry;

pub use cell::Future;
pub use group::{all_awaited, wait_all, wait_all_timeout, wait_any, wait_any_timeout};
pub use monitor::{FutureMonitor, Liveness};
pub use registry::{FutureRegistry, FutureStats};
