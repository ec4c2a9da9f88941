// src/future/monitor.rs
//! Failing futures whose target is gone
//!
//! A pending future only resolves if its target eventually replies. The
//! monitor probes every target that still has waiters and fails the
//! futures of targets that can never answer. A crashed fault-tolerant
//! target awaiting recovery is still considered alive.

use crate::future::FutureRegistry;
use crate::identity::ObjectId;
use crate::utils::errors::{FutureError, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Result of probing a target
#[derive(Debug, Clone, PartialEq)]
pub enum Liveness {
    /// Serving, or about to serve again
    Alive,

    /// Will never reply
    Dead(TransportError),
}

/// Periodic scanner over a node's pending futures
#[derive(Debug, Default)]
pub struct FutureMonitor {
    scans: AtomicU64,
    failed: AtomicU64,
}

impl FutureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe each pending target once; returns the number of futures failed.
    pub fn scan<P>(&self, registry: &FutureRegistry, probe: P) -> usize
    where
        P: Fn(ObjectId) -> Liveness,
    {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let mut failed = 0;
        for target in registry.pending_targets() {
            if let Liveness::Dead(reason) = probe(target) {
                let count = registry.fail_target(target, &FutureError::Transport(reason.clone()));
                if count > 0 {
                    warn!("Failed {} pending future(s) on {}: {}", count, target, reason);
                }
                failed += count;
            }
        }

        if failed > 0 {
            self.failed.fetch_add(failed as u64, Ordering::Relaxed);
            info!("Future monitor failed {} future(s)", failed);
        }
        failed
    }

    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
