// src/identity/mod.rs
//! Identity and location registry
//!
//! - **ObjectId**: location-independent identity of an active object
//! - **RequestId**: sender identity plus per-target sequence number
//! - **Location**: host and port of a node
//! - **LocationRegistry**: versioned `ObjectId -> Location` map consulted
//!   by callers and updated by migration and recovery

pub mod ids;
pub mod location;
pub mod registry;

pub use ids::{ObjectId, RequestId};
pub use location::Location;
pub use registry::{LocationRecord, LocationRegistry};
