// src/fault_tolerance/policy.rs
//! When to checkpoint
//!
//! Checkpoints can only be taken between two requests, so a trigger is
//! consulted right before a request is served and on idle ticks. It sees
//! how much happened since the last checkpoint and decides.

use crate::utils::config::FaultToleranceSection;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Progress since the last committed checkpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointProgress {
    pub served_since: u64,
    pub since_last: Duration,
    pub log_entries: usize,
}

/// Decides whether a checkpoint is due
pub trait CheckpointTrigger: Send + Sync + fmt::Debug {
    fn should_checkpoint(&self, progress: &CheckpointProgress) -> bool;
}

/// Every `n` served requests
#[derive(Debug, Clone, Copy)]
pub struct EveryRequests(pub u64);

impl CheckpointTrigger for EveryRequests {
    fn should_checkpoint(&self, progress: &CheckpointProgress) -> bool {
        self.0 > 0 && progress.served_since >= self.0
    }
}

/// Once the time to checkpoint has elapsed, if anything was served
#[derive(Debug, Clone, Copy)]
pub struct Periodic(pub Duration);

impl CheckpointTrigger for Periodic {
    fn should_checkpoint(&self, progress: &CheckpointProgress) -> bool {
        progress.served_since > 0 && progress.since_last >= self.0
    }
}

/// Fires when any inner trigger fires
#[derive(Debug, Clone)]
pub struct AnyOf(pub Vec<Arc<dyn CheckpointTrigger>>);

impl CheckpointTrigger for AnyOf {
    fn should_checkpoint(&self, progress: &CheckpointProgress) -> bool {
        self.0.iter().any(|t| t.should_checkpoint(progress))
    }
}

/// Only explicit checkpoints
#[derive(Debug, Clone, Copy)]
pub struct Never;

impl CheckpointTrigger for Never {
    fn should_checkpoint(&self, _progress: &CheckpointProgress) -> bool {
        false
    }
}

/// Fault-tolerance settings of one object
#[derive(Debug, Clone)]
pub struct FtPolicy {
    pub trigger: Arc<dyn CheckpointTrigger>,

    /// Log entries tolerated without a committed checkpoint
    pub max_log_entries: usize,

    /// Bound on a single exchange with the recovery server
    pub server_timeout: Duration,
}

impl FtPolicy {
    pub fn from_config(config: &FaultToleranceSection) -> Self {
        let mut triggers: Vec<Arc<dyn CheckpointTrigger>> = Vec::new();
        if config.every_requests > 0 {
            triggers.push(Arc::new(EveryRequests(config.every_requests)));
        }
        if config.ttc_ms > 0 {
            triggers.push(Arc::new(Periodic(Duration::from_millis(config.ttc_ms))));
        }
        let trigger: Arc<dyn CheckpointTrigger> = match triggers.len() {
            0 => Arc::new(Never),
            1 => triggers.remove(0),
            _ => Arc::new(AnyOf(triggers)),
        };

        Self {
            trigger,
            max_log_entries: config.max_log_entries,
            server_timeout: config.server_timeout(),
        }
    }

    pub fn with_trigger(mut self, trigger: impl CheckpointTrigger + 'static) -> Self {
        self.trigger = Arc::new(trigger);
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    pub fn should_checkpoint(&self, progress: &CheckpointProgress) -> bool {
        self.trigger.should_checkpoint(progress)
    }
}

impl Default for FtPolicy {
    fn default() -> Self {
        Self::from_config(&FaultToleranceSection::default())
    }
}
