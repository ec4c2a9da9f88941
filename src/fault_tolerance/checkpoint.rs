// src/fault_tolerance/checkpoint.rs
//! Checkpoints and message-log records
//!
//! A checkpoint is a self-contained image of a body between two requests:
//! the encoded object state plus everything the serving loop needs to
//! carry on (sequencers, output counters, serving policy). The message
//! log then records what happened after it.

use crate::identity::{Location, ObjectId};
use crate::messaging::{Reply, RequestRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub object_id: ObjectId,
    pub class: String,

    /// Strictly increasing per object across incarnations
    pub epoch: u64,
    pub incarnation: u64,

    /// Highest log sequence number covered by this checkpoint
    pub log_mark: u64,

    /// Object state, encoded by the named codec
    pub state: Vec<u8>,
    pub codec: String,

    /// Requests served since the previous checkpoint
    pub request_log: Vec<RequestRecord>,

    /// Replies emitted since the previous checkpoint
    pub reply_log: Vec<Reply>,

    /// Request dequeued but not yet served when the checkpoint was taken
    pub pending: Option<RequestRecord>,

    /// Highest accepted sequence number per sender
    pub sequencer: Vec<(ObjectId, u64)>,

    /// Last sequence number used per target
    pub outbound: Vec<(ObjectId, u64)>,

    pub next_reply_seq: u64,
    pub immediate: Vec<String>,
    pub location: Location,
    pub created_at: DateTime<Utc>,
}

/// One entry of the pessimistic message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A request was dequeued for service. `nested` marks immediate
    /// services served from inside another request.
    Served {
        lsn: u64,
        request: RequestRecord,
        #[serde(default)]
        nested: bool,
    },

    /// A reply was emitted
    Replied { lsn: u64, reply: Reply },
}

impl LogRecord {
    pub fn lsn(&self) -> u64 {
        match self {
            LogRecord::Served { lsn, .. } | LogRecord::Replied { lsn, .. } => *lsn,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Served { .. } => "served",
            LogRecord::Replied { .. } => "replied",
        }
    }
}
