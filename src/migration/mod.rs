// src/migration/mod.rs
//! Object migration
//!
//! An object moves between two requests, on its own serving thread. Its
//! state, queued requests and sequencers travel together in a
//! [`MigrationPacket`]; the origin keeps a forwarder for a grace period
//! and the location registry gets a new epoch.

pub mod forwarder;
pub(crate) mod manager;
pub mod packet;

pub use forwarder::{ForwardEntry, ForwardingTable};
pub(crate) use manager::MigrationTicket;
pub use packet::MigrationPacket;
