// src/migration/packet.rs
//! What travels when an object moves

use crate::body::policy::ServingPolicy;
use crate::fault_tolerance::manager::FtSnapshot;
use crate::identity::{Location, ObjectId};
use crate::messaging::{Reply, Request};
use bytes::Bytes;

/// Body of a migrating object: encoded state plus everything queued
#[derive(Debug, Clone)]
pub struct MigrationPacket {
    pub object_id: ObjectId,
    pub class: String,

    /// Object state, encoded by the runtime's codec
    pub state: Bytes,

    /// Requests still queued at departure, in service order
    pub requests: Vec<Request>,

    /// Highest accepted sequence number per sender
    pub sequencer: Vec<(ObjectId, u64)>,

    /// Last sequence number used per target
    pub outbound: Vec<(ObjectId, u64)>,

    pub next_reply_seq: u64,
    pub policy: ServingPolicy,
    pub(crate) ft: Option<FtSnapshot>,

    /// Replies still waiting for their log record to be shipped
    pub(crate) held: Vec<Reply>,

    /// Continuations registered but not yet run
    pub(crate) continuations: usize,
    pub origin: Location,
}

impl MigrationPacket {
    pub fn is_fault_tolerant(&self) -> bool {
        self.ft.is_some()
    }

    pub fn state_size(&self) -> usize {
        self.state.len()
    }
}
