// src/future/group.rs
//! Waiting on sets of futures
//!
//! `wait_any` registers a continuation on every member that signals a
//! shared slot, so a member resolving between the caller's checks and its
//! block is never missed. The continuations are withdrawn when the wait
//! ends, so polling long-pending futures does not pile them up.

use crate::future::cell::ListenerKey;
use crate::future::Future;
use crate::messaging::Outcome;
use crate::utils::errors::FutureError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Signal {
    first: Mutex<Option<usize>>,
    ready: Condvar,
}

/// Continuations armed on a set of futures, withdrawn on drop
struct Armed<'a> {
    signal: Arc<Signal>,
    keys: Vec<(&'a Future, ListenerKey)>,
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        for (future, key) in self.keys.drain(..) {
            future.unlisten(key);
        }
    }
}

fn arm(futures: &[Future]) -> Armed<'_> {
    let signal = Arc::new(Signal {
        first: Mutex::new(None),
        ready: Condvar::new(),
    });

    let mut keys = Vec::with_capacity(futures.len());
    for (index, future) in futures.iter().enumerate() {
        let signal = signal.clone();
        let key = future.listen(move |_| {
            let mut first = signal.first.lock();
            if first.is_none() {
                *first = Some(index);
                signal.ready.notify_all();
            }
        });
        if let Some(key) = key {
            keys.push((future, key));
        }
    }
    Armed { signal, keys }
}

fn first_resolved(futures: &[Future]) -> Option<usize> {
    futures.iter().position(Future::is_resolved)
}

/// Block until at least one member is resolved and return its index.
/// Returns `None` only for an empty set.
pub fn wait_any(futures: &[Future]) -> Option<usize> {
    if futures.is_empty() {
        return None;
    }
    if let Some(index) = first_resolved(futures) {
        return Some(index);
    }

    let armed = arm(futures);
    let signal = armed.signal.clone();
    let mut first = signal.first.lock();
    while first.is_none() {
        signal.ready.wait(&mut first);
    }
    let index = *first;
    drop(first);
    drop(armed);
    index
}

/// Like [`wait_any`], giving up after `timeout`.
pub fn wait_any_timeout(futures: &[Future], timeout: Duration) -> Result<usize, FutureError> {
    if futures.is_empty() {
        return Err(FutureError::Timeout(timeout));
    }
    if let Some(index) = first_resolved(futures) {
        return Ok(index);
    }

    let deadline = Instant::now() + timeout;
    let armed = arm(futures);
    let signal = armed.signal.clone();
    let mut first = signal.first.lock();
    while first.is_none() {
        if signal.ready.wait_until(&mut first, deadline).timed_out() {
            break;
        }
    }
    let index = *first;
    drop(first);
    drop(armed);
    index.ok_or(FutureError::Timeout(timeout))
}

/// Block until every member is resolved; outcomes keep the input order.
pub fn wait_all(futures: &[Future]) -> Vec<Outcome> {
    futures.iter().map(Future::wait).collect()
}

/// Like [`wait_all`] with one deadline for the whole set.
pub fn wait_all_timeout(futures: &[Future], timeout: Duration) -> Result<Vec<Outcome>, FutureError> {
    let deadline = Instant::now() + timeout;
    let mut outcomes = Vec::with_capacity(futures.len());
    for future in futures {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match future.wait_timeout(remaining) {
            Err(FutureError::Timeout(_)) => return Err(FutureError::Timeout(timeout)),
            outcome => outcomes.push(outcome),
        }
    }
    Ok(outcomes)
}

/// True when every member is resolved.
pub fn all_awaited(futures: &[Future]) -> bool {
    futures.iter().all(Future::is_resolved)
}
