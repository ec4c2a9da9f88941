// src/body/policy.rs
//! Serving policy
//!
//! Strict FIFO by default. Methods named as immediate services jump to a
//! priority lane and are served before queued normal requests, and from
//! inside a long request that calls
//! [`ServiceContext::serve_immediates`](crate::body::ServiceContext::serve_immediates).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingPolicy {
    immediate: BTreeSet<String>,
}

impl ServingPolicy {
    /// Plain arrival order
    pub fn fifo() -> Self {
        Self::default()
    }

    pub fn with_immediate<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            immediate: methods.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_immediate(&self, method: &str) -> bool {
        self.immediate.contains(method)
    }

    /// Returns whether the set changed.
    pub fn set_immediate(&mut self, method: &str, enabled: bool) -> bool {
        if enabled {
            self.immediate.insert(method.to_string())
        } else {
            self.immediate.remove(method)
        }
    }

    pub fn immediate_methods(&self) -> Vec<String> {
        self.immediate.iter().cloned().collect()
    }

    pub fn is_fifo(&self) -> bool {
        self.immediate.is_empty()
    }
}
