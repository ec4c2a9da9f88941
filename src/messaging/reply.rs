// src/messaging/reply.rs
//! Replies

use crate::identity::{Location, ObjectId, RequestId};
use crate::utils::errors::FutureError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a request produced: a value or the failure stored in the future.
pub type Outcome = std::result::Result<Value, FutureError>;

/// "The result of request `request_id` is `outcome`"
///
/// `sequence` is the position in the replying body's output stream;
/// failures generated by the runtime itself on a body's behalf carry 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub request_id: RequestId,
    pub from: ObjectId,
    pub sequence: u64,
    pub outcome: Outcome,
    pub reply_to: Location,
}

impl Reply {
    /// Runtime-generated failure for a request that will never be served.
    pub fn failure(request_id: RequestId, from: ObjectId, reply_to: Location, error: FutureError) -> Self {
        Self {
            request_id,
            from,
            sequence: 0,
            outcome: Err(error),
            reply_to,
        }
    }

    /// Two replies carry the same observable result.
    pub fn same_result(&self, other: &Reply) -> bool {
        self.request_id == other.request_id
            && self.sequence == other.sequence
            && self.outcome == other.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::TransportError;
    use serde_json::json;

    #[test]
    fn test_same_result_ignores_address() {
        let id = RequestId::new(ObjectId::new(), 1);
        let from = ObjectId::new();
        let a = Reply {
            request_id: id,
            from,
            sequence: 3,
            outcome: Ok(json!(1)),
            reply_to: Location::new("a", 1),
        };
        let mut b = a.clone();
        b.reply_to = Location::new("b", 2);
        assert!(a.same_result(&b));

        b.outcome = Ok(json!(2));
        assert!(!a.same_result(&b));
    }

    #[test]
    fn test_failure_reply() {
        let id = RequestId::new(ObjectId::new(), 1);
        let target = ObjectId::new();
        let reply = Reply::failure(
            id,
            target,
            Location::new("a", 1),
            TransportError::TargetCrashed(target).into(),
        );
        assert_eq!(reply.sequence, 0);
        assert!(reply.outcome.is_err());
    }
}
