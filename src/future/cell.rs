// src/future/cell.rs
//! Write-once future cell
//!
//! A [`Future`] starts pending and is resolved exactly once, either with a
//! value or with a [`FutureError`]. Any number of threads may wait on it.
//! Continuations registered with [`Future::on_resolve`] run once, in
//! registration order, right after the transition. They run on whatever
//! thread resolves the future, often a body's serving thread, so a
//! panicking continuation is caught and logged there.
//!
//! ```text
//!   resolve() ──► lock ──► store outcome ──► flag = true ──► notify_all
//!                                │
//!                                └─► take continuations ──► unlock ──► run them
//! ```

use crate::messaging::Outcome;
use crate::utils::errors::FutureError;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

type Continuation = Box<dyn FnOnce(&Outcome) + Send + 'static>;

/// Key of a registered continuation, for [`Future::unlisten`]
pub(crate) type ListenerKey = u64;

struct Slot {
    outcome: Option<Outcome>,
    next_key: ListenerKey,
    continuations: Vec<(ListenerKey, Continuation)>,
}

struct Inner {
    slot: Mutex<Slot>,
    ready: Condvar,
    resolved: AtomicBool,
}

/// Placeholder for the result of an asynchronous request
#[derive(Clone)]
pub struct Future {
    inner: Arc<Inner>,
}

impl Future {
    /// A future nobody has resolved yet
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    outcome: None,
                    next_key: 0,
                    continuations: Vec::new(),
                }),
                ready: Condvar::new(),
                resolved: AtomicBool::new(false),
            }),
        }
    }

    /// An already resolved future
    pub fn ready(value: Value) -> Self {
        let future = Self::pending();
        future.resolve(Ok(value));
        future
    }

    /// An already failed future
    pub fn failed(error: impl Into<FutureError>) -> Self {
        let future = Self::pending();
        future.resolve(Err(error.into()));
        future
    }

    /// Non-blocking check
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Store the outcome. Returns `false` if the future was already resolved,
    /// in which case the new outcome is discarded.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let continuations = {
            let mut slot = self.inner.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome.clone());
            self.inner.resolved.store(true, Ordering::Release);
            std::mem::take(&mut slot.continuations)
        };
        self.inner.ready.notify_all();

        for (_, continuation) in continuations {
            run_continuation(continuation, &outcome);
        }
        true
    }

    /// Block until resolved.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            self.inner.ready.wait(&mut slot);
        }
    }

    /// Block until resolved or until `timeout` elapses.
    ///
    /// A timeout only ends this wait; the request stays in flight and a
    /// later reply still resolves the future for other waiters.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                return match &slot.outcome {
                    Some(outcome) => outcome.clone(),
                    None => Err(FutureError::Timeout(timeout)),
                };
            }
        }
    }

    /// Register `f` to run once the future resolves. Runs immediately, on
    /// the calling thread, if it already has.
    pub fn on_resolve<F>(&self, f: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.listen(f);
    }

    /// Like [`on_resolve`](Self::on_resolve), returning a key that can
    /// withdraw the continuation while the future is still pending. `None`
    /// means it already ran.
    pub(crate) fn listen<F>(&self, f: F) -> Option<ListenerKey>
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match &slot.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    let key = slot.next_key;
                    slot.next_key += 1;
                    slot.continuations.push((key, Box::new(f)));
                    return Some(key);
                }
            }
        };
        run_continuation(Box::new(f), &outcome);
        None
    }

    /// Drop a continuation that has not run yet.
    pub(crate) fn unlisten(&self, key: ListenerKey) -> bool {
        let mut slot = self.inner.slot.lock();
        let before = slot.continuations.len();
        slot.continuations.retain(|(k, _)| *k != key);
        slot.continuations.len() != before
    }

    /// Continuations waiting for the outcome
    pub fn listeners(&self) -> usize {
        self.inner.slot.lock().continuations.len()
    }

    /// Peek at the outcome without blocking.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.slot.lock().outcome.clone()
    }

    /// Whether two handles refer to the same cell.
    pub fn same_as(&self, other: &Future) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn run_continuation(continuation: Continuation, outcome: &Outcome) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| continuation(outcome))) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!("Future continuation panicked: {}", reason);
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::InvocationError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_resolves_once() {
        let future = Future::pending();
        assert!(!future.is_resolved());
        assert!(future.resolve(Ok(json!(1))));
        assert!(!future.resolve(Ok(json!(2))));
        assert_eq!(future.wait().unwrap(), json!(1));
    }

    #[test]
    fn test_failure_is_reraised() {
        let future = Future::failed(InvocationError::failed("get", "nope"));
        assert!(matches!(future.wait(), Err(FutureError::Invocation(_))));
    }

    #[test]
    fn test_many_waiters_see_same_value() {
        let future = Future::pending();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let f = future.clone();
                thread::spawn(move || f.wait().unwrap())
            })
            .collect();

        future.resolve(Ok(json!("done")));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), json!("done"));
        }
    }

    #[test]
    fn test_timeout_does_not_cancel() {
        let future = Future::pending();
        let err = future.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, FutureError::Timeout(Duration::from_millis(10)));

        future.resolve(Ok(json!(5)));
        assert_eq!(future.wait_timeout(Duration::from_millis(10)).unwrap(), json!(5));
    }

    #[test]
    fn test_continuations_run_in_order() {
        let future = Future::pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            future.on_resolve(move |_| order.lock().push(i));
        }
        future.resolve(Ok(Value::Null));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_continuation_is_contained() {
        let future = Future::pending();
        let hits = Arc::new(AtomicUsize::new(0));
        future.on_resolve(|_| panic!("listener exploded"));
        let h = hits.clone();
        future.on_resolve(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.resolve(Ok(json!(1))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(future.wait().unwrap(), json!(1));
    }

    #[test]
    fn test_unlisten() {
        let future = Future::pending();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let key = future
            .listen(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(future.listeners(), 1);
        assert!(future.unlisten(key));
        assert!(!future.unlisten(key));
        assert_eq!(future.listeners(), 0);

        future.resolve(Ok(Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(future.listen(|_| {}).is_none());
    }

    #[test]
    fn test_late_continuation_runs_immediately() {
        let future = Future::ready(json!(3));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        future.on_resolve(move |outcome| {
            assert_eq!(outcome.as_ref().unwrap(), &json!(3));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
