// src/messaging/mod.rs
//! Request/reply messages
//!
//! Requests are immutable once built and carry their own return address
//! (`reply_to`), so replies reach the caller wherever the target has moved.

pub mod reply;
pub mod request;

pub use reply::{Outcome, Reply};
pub use request::{Argument, Request, RequestRecord};
pub use serde_json::Value;
