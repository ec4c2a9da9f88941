// src/future/registry.rs
//! Per-node table of pending futures
//!
//! Replies are addressed to the node that issued the request. The node
//! looks the request up here and resolves the waiting future. An entry is
//! removed on its first resolution, so a reply delivered twice by an
//! at-least-once transport is counted and dropped.

use crate::future::Future;
use crate::identity::{ObjectId, RequestId};
use crate::messaging::Reply;
use crate::utils::errors::FutureError;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

struct PendingFuture {
    future: Future,
    target: ObjectId,
    created_at: Instant,
}

/// Pending futures of one node
#[derive(Default)]
pub struct FutureRegistry {
    pending: DashMap<RequestId, PendingFuture>,
    completed: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request to `target` and hand back its future.
    ///
    /// Must happen before the request is sent, or a fast reply would find
    /// nothing to resolve.
    pub fn register(&self, id: RequestId, target: ObjectId) -> Future {
        let future = Future::pending();
        self.pending.insert(
            id,
            PendingFuture {
                future: future.clone(),
                target,
                created_at: Instant::now(),
            },
        );
        future
    }

    /// Resolve the future a reply answers. Returns `false` for a reply
    /// nobody is waiting for (duplicate or unknown).
    pub fn complete(&self, reply: &Reply) -> bool {
        match self.pending.remove(&reply.request_id) {
            Some((_, entry)) => {
                if reply.outcome.is_err() {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    "Reply for {} after {:?}",
                    reply.request_id,
                    entry.created_at.elapsed()
                );
                entry.future.resolve(reply.outcome.clone())
            }
            None => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped reply for unknown request {}", reply.request_id);
                false
            }
        }
    }

    /// Fail one pending future.
    pub fn fail(&self, id: RequestId, error: FutureError) -> bool {
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                entry.future.resolve(Err(error))
            }
            None => false,
        }
    }

    /// Fail every future waiting on `target`. Returns how many were failed.
    pub fn fail_target(&self, target: ObjectId, error: &FutureError) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|e| e.value().target == target)
            .map(|e| *e.key())
            .collect();

        ids.into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count()
    }

    /// Fail every future waiting on `target` except those in `keep`.
    pub fn fail_target_except(&self, target: ObjectId, keep: &HashSet<RequestId>, error: &FutureError) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|e| e.value().target == target && !keep.contains(e.key()))
            .map(|e| *e.key())
            .collect();

        ids.into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count()
    }

    /// Distinct targets that pending futures wait on
    pub fn pending_targets(&self) -> Vec<ObjectId> {
        let mut targets: Vec<ObjectId> = self.pending.iter().map(|e| e.value().target).collect();
        targets.sort();
        targets.dedup();
        targets
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> FutureStats {
        FutureStats {
            pending: self.pending.len(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Future registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureStats {
    /// Futures still waiting
    pub pending: usize,

    /// Futures resolved with a value
    pub completed: u64,

    /// Futures resolved with an error
    pub failed: u64,

    /// Replies that matched no pending future
    pub duplicates: u64,
}
