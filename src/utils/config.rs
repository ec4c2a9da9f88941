// src/utils/config.rs
//! Layered runtime configuration
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults ([`RuntimeConfig::default`])
//! 2. An optional `proxima.{toml,yaml,json}` file
//! 3. `PROXIMA__<SECTION>__<KEY>` environment variables
//!
//! Durations are expressed in milliseconds.

use crate::identity::Location;
use crate::utils::errors::{ActiveError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Node defaults and body loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Host of the default node
    pub host: String,

    /// Port of the default node
    pub port: u16,

    /// How long an idle body waits before running idle work
    pub idle_tick_ms: u64,

    /// Maximum forwarding hops followed while routing a request
    pub max_hops: usize,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7700,
            idle_tick_ms: 50,
            max_hops: 8,
        }
    }
}

impl NodeSection {
    pub fn location(&self) -> Location {
        Location::new(self.host.clone(), self.port)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxSection {
    /// Queued requests per body before new ones are rejected
    pub capacity: usize,
}

impl Default for MailboxSection {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutureSection {
    /// Fail pending futures whose target died
    pub monitoring: bool,

    /// Period of the future monitor
    pub monitor_period_ms: u64,
}

impl Default for FutureSection {
    fn default() -> Self {
        Self {
            monitoring: true,
            monitor_period_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSection {
    /// Bound on the whole migration handshake
    pub timeout_ms: u64,

    /// How long the old location keeps forwarding
    pub grace_period_ms: u64,

    /// Period of the expired-forwarder sweep
    pub sweep_interval_ms: u64,
}

impl Default for MigrationSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            grace_period_ms: 30_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl MigrationSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultToleranceSection {
    /// Bound on a single exchange with the recovery server
    pub server_timeout_ms: u64,

    /// Checkpoint after this many served requests (0 disables)
    pub every_requests: u64,

    /// Time to checkpoint (0 disables)
    pub ttc_ms: u64,

    /// Local log entries tolerated without a committed checkpoint
    pub max_log_entries: usize,

    /// Recover crashed bodies without being asked
    pub auto_recover: bool,

    /// Period of the failure detector
    pub detector_period_ms: u64,
}

impl Default for FaultToleranceSection {
    fn default() -> Self {
        Self {
            server_timeout_ms: 2_000,
            every_requests: 0,
            ttc_ms: 30_000,
            max_log_entries: 100_000,
            auto_recover: false,
            detector_period_ms: 250,
        }
    }
}

impl FaultToleranceSection {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime: NodeSection,
    #[serde(default)]
    pub mailbox: MailboxSection,
    #[serde(default)]
    pub futures: FutureSection,
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub fault_tolerance: FaultToleranceSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl RuntimeConfig {
    /// Load from defaults, `./proxima.*` and the environment.
    pub fn load() -> Result<Self> {
        Self::build(File::with_name("proxima").required(false))
    }

    /// Load with an explicit configuration file, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(Config::try_from(&RuntimeConfig::default())?)
            .add_source(file)
            .add_source(Environment::with_prefix("PROXIMA").separator("__"))
            .build()?;

        let config: RuntimeConfig = settings.try_deserialize()?;
        config.validate()?;
        debug!("Loaded runtime configuration: {:?}", config);
        Ok(config)
    }

    /// Reject values that would make the runtime hang or spin.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.mailbox.capacity == 0, "mailbox.capacity must be positive"),
            (self.runtime.idle_tick_ms == 0, "runtime.idle_tick_ms must be positive"),
            (self.runtime.max_hops == 0, "runtime.max_hops must be positive"),
            (self.migration.timeout_ms == 0, "migration.timeout_ms must be positive"),
            (
                self.migration.sweep_interval_ms == 0,
                "migration.sweep_interval_ms must be positive",
            ),
            (
                self.fault_tolerance.server_timeout_ms == 0,
                "fault_tolerance.server_timeout_ms must be positive",
            ),
            (
                self.fault_tolerance.max_log_entries == 0,
                "fault_tolerance.max_log_entries must be positive",
            ),
            (
                self.fault_tolerance.detector_period_ms == 0,
                "fault_tolerance.detector_period_ms must be positive",
            ),
            (
                self.futures.monitor_period_ms == 0,
                "futures.monitor_period_ms must be positive",
            ),
        ];

        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, reason)) => Err(ActiveError::ConfigError(reason.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.location(), Location::new("localhost", 7700));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = RuntimeConfig::default();
        config.mailbox.capacity = 0;
        assert!(matches!(config.validate(), Err(ActiveError::ConfigError(_))));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[mailbox]\ncapacity = 16\n\n[fault_tolerance]\nevery_requests = 3").unwrap();

        let config = RuntimeConfig::load_from(file.path()).unwrap();
        assert_eq!(config.mailbox.capacity, 16);
        assert_eq!(config.fault_tolerance.every_requests, 3);
        assert_eq!(config.migration.timeout_ms, 5_000);
    }
}
