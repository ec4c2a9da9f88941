// src/runtime/mod.rs
//! Active-object runtime
//!
//! - **ActiveRuntime**: facade owning nodes, registries and the recovery server
//! - **Node**: bodies, forwarders and pending futures at one location
//! - **Transport**: moves requests, replies and migrating bodies between nodes
//! - **Caller / ActiveRef**: location-transparent invocation
//! - **Maintenance**: periodic sweeps, failure detection, bounded server calls
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── ActiveRuntime ────────────────────────────┐
//! │  LocationRegistry    ClassRegistry    RecoveryServer    Maintenance    │
//! │                                                                        │
//! │   Node A                          Node B                               │
//! │   ├─ bodies ──► [mailbox]─thread  ├─ bodies ──► [mailbox]─thread       │
//! │   ├─ forwarders (A ─► B)          ├─ forwarders                        │
//! │   └─ futures                      └─ futures                           │
//! │            ▲                                ▲                          │
//! │            └────────── LocalTransport ──────┘                          │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod active_runtime;
pub(crate) mod maintenance;
pub mod node;
pub mod proxy;
pub mod transport;

pub use active_runtime::{ActiveRuntime, ActiveRuntimeBuilder};
pub use node::Node;
pub use proxy::{ActiveRef, Caller};
pub use transport::{LocalTransport, Transport, TransportStats};
