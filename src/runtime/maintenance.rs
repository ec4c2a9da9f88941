// src/runtime/maintenance.rs
//! Background maintenance on a small tokio runtime
//!
//! Bodies run on their own threads; everything periodic or bounded in
//! time runs here:
//!
//! - forwarder sweep
//! - future monitor
//! - failure detector (automatic recovery)
//! - asynchronous checkpoint shipping
//! - recovery-server calls with a timeout

use crate::body::control::Control;
use crate::body::mailbox::Mailbox;
use crate::fault_tolerance::recovery;
use crate::fault_tolerance::{Checkpoint, RecoveryServer};
use crate::runtime::active_runtime::RuntimeShared;
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{ActiveError, RecoveryError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

pub(crate) struct Maintenance {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    closed: AtomicBool,
}

impl Maintenance {
    pub(crate) fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("proxima-maintenance")
            .enable_all()
            .build()
            .map_err(|e| ActiveError::RuntimeError(format!("Failed to start maintenance runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            closed: AtomicBool::new(false),
        })
    }

    /// Start the periodic tasks. They stop once the runtime is gone.
    pub(crate) fn start(&self, shared: Weak<RuntimeShared>, config: &RuntimeConfig) {
        let sweep_every = Duration::from_millis(config.migration.sweep_interval_ms);
        let weak = shared.clone();
        self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                shared.sweep_forwarders();
            }
        });

        if config.futures.monitoring {
            let period = Duration::from_millis(config.futures.monitor_period_ms);
            let weak = shared.clone();
            self.handle.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let Some(shared) = weak.upgrade() else { break };
                    shared.monitor_futures();
                }
            });
        }

        if config.fault_tolerance.auto_recover {
            let period = Duration::from_millis(config.fault_tolerance.detector_period_ms);
            let weak = shared;
            self.handle.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let Some(shared) = weak.upgrade() else { break };
                    for id in shared.crashed_fault_tolerant() {
                        info!("Failure detector recovering {}", id);
                        let shared = shared.clone();
                        let outcome = tokio::task::spawn_blocking(move || recovery::recover(&shared, id, None)).await;
                        match outcome {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!("Automatic recovery of {} failed: {}", id, e),
                            Err(e) => warn!("Automatic recovery of {} aborted: {}", id, e),
                        }
                    }
                }
            });
        }

        info!("Maintenance tasks started");
    }

    /// Store `checkpoint` in the background and report to the body's
    /// control lane when done.
    pub(crate) fn ship_checkpoint(
        &self,
        server: Arc<dyn RecoveryServer>,
        checkpoint: Checkpoint,
        timeout: Duration,
        mailbox: Arc<Mailbox>,
    ) {
        let (epoch, log_mark) = (checkpoint.epoch, checkpoint.log_mark);
        if self.closed.load(Ordering::Acquire) {
            let result = Err(RecoveryError::ServerUnavailable("maintenance runtime stopped".to_string()));
            let _ = mailbox.push_control(Control::CheckpointShipped { epoch, log_mark, result });
            return;
        }

        self.handle.spawn(async move {
            let stored = tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || server.store(checkpoint))).await;
            let result = match stored {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(RecoveryError::ServerUnavailable(format!("store task failed: {}", e))),
                Err(_) => Err(RecoveryError::ServerUnavailable(format!("no answer within {:?}", timeout))),
            };
            if mailbox.push_control(Control::CheckpointShipped { epoch, log_mark, result }).is_err() {
                debug!("Checkpoint {} finished after its body stopped", epoch);
            }
        });
    }

    /// Run blocking `f` on the maintenance runtime, giving up after `timeout`.
    ///
    /// Must not be called from inside an async task.
    pub(crate) fn run_bounded<T, F>(&self, timeout: Duration, f: F) -> std::result::Result<T, RecoveryError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecoveryError::ServerUnavailable("maintenance runtime stopped".to_string()));
        }
        let outcome = self
            .handle
            .block_on(async move { tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await });
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RecoveryError::ServerUnavailable(format!("task failed: {}", e))),
            Err(_) => Err(RecoveryError::ServerUnavailable(format!("no answer within {:?}", timeout))),
        }
    }

    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            info!("Maintenance runtime stopped");
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_bounded() {
        let maintenance = Maintenance::new().unwrap();
        assert_eq!(maintenance.run_bounded(Duration::from_secs(1), || 21 * 2), Ok(42));

        let slow = maintenance.run_bounded(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
        });
        assert!(matches!(slow, Err(RecoveryError::ServerUnavailable(_))));

        maintenance.shutdown();
        assert!(maintenance.run_bounded(Duration::from_secs(1), || ()).is_err());
    }
}
