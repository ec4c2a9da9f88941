// src/runtime/proxy.rs
//! References to active objects and the callers that use them
//!
//! An [`ActiveRef`] is a plain, copyable name: identity, class and the last
//! location it was seen at. It never goes stale in a way callers notice:
//! moved objects are found through forwarders or the location registry.
//!
//! A [`Caller`] is a non-active sender (the main program, a test) with its
//! own identity and home node. It keeps per-target sequence numbers, so
//! requests from one caller to one target are served in send order.

use crate::future::Future;
use crate::identity::{Location, ObjectId, RequestId};
use crate::messaging::{Argument, Request};
use crate::runtime::active_runtime::RuntimeShared;
use crate::utils::errors::{InvocationError, TransportError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Location-transparent reference to an active object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveRef {
    id: ObjectId,
    class: String,
    location: Location,
}

impl ActiveRef {
    pub fn new(id: ObjectId, class: impl Into<String>, location: Location) -> Self {
        Self {
            id,
            class: class.into(),
            location,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Last known location; a hint, not a guarantee
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub(crate) fn relocated(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }
}

impl fmt::Display for ActiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})@{}", self.class, self.id, self.location)
    }
}

#[derive(Debug, Default)]
struct Outbound {
    last_sequence: u64,
    last_known: Option<Location>,
}

/// A non-active sender with its own identity and home node
pub struct Caller {
    id: ObjectId,
    home: Location,
    shared: Weak<RuntimeShared>,
    targets: DashMap<ObjectId, Arc<Mutex<Outbound>>>,
}

impl Caller {
    pub(crate) fn new(home: Location, shared: Weak<RuntimeShared>) -> Self {
        Self {
            id: ObjectId::new(),
            home,
            shared,
            targets: DashMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Node replies are delivered to
    pub fn home(&self) -> &Location {
        &self.home
    }

    /// Asynchronous call; the future resolves with the reply.
    pub fn invoke(&self, target: &ActiveRef, method: &str, args: Vec<Argument>) -> Future {
        let Some(shared) = self.shared.upgrade() else {
            return Future::failed(TransportError::Unreachable(self.home.clone()));
        };
        let Some(home) = shared.transport.node(&self.home) else {
            return Future::failed(TransportError::Unreachable(self.home.clone()));
        };

        let outbound = self.outbound(target.id());
        let mut outbound = outbound.lock();
        let sequence = outbound.last_sequence + 1;
        let id = RequestId::new(self.id, sequence);
        let request = match Request::call(id, target.id(), method, args, self.home.clone()) {
            Ok(request) => request,
            Err(e) => return Future::failed(InvocationError::failed(method, e.to_string())),
        };

        let future = home.futures().register(id, target.id());
        let hint = outbound.last_known.clone().unwrap_or_else(|| target.location().clone());
        // A failed send may still have been delivered; never reuse its number.
        outbound.last_sequence = sequence;
        match shared.dispatch(request, &hint) {
            Ok(at) => outbound.last_known = Some(at),
            Err(e) => {
                debug!("Request {} to {} not sent: {}", id, target.id(), e);
                home.futures().fail(id, e.into());
            }
        }
        future
    }

    /// One-way call; only reports whether the request was accepted.
    pub fn send(&self, target: &ActiveRef, method: &str, args: Vec<Argument>) -> Result<(), TransportError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| TransportError::Unreachable(self.home.clone()))?;

        let outbound = self.outbound(target.id());
        let mut outbound = outbound.lock();
        let sequence = outbound.last_sequence + 1;
        let request = Request::one_way(
            RequestId::new(self.id, sequence),
            target.id(),
            method,
            args,
            self.home.clone(),
        )
        .map_err(|_| TransportError::UnknownObject {
            id: target.id(),
            location: target.location().clone(),
        })?;

        let hint = outbound.last_known.clone().unwrap_or_else(|| target.location().clone());
        outbound.last_sequence = sequence;
        let at = shared.dispatch(request, &hint)?;
        outbound.last_known = Some(at);
        Ok(())
    }

    /// Sequence number of the last request sent to `target`, delivered or not
    pub(crate) fn last_sequence(&self, target: ObjectId) -> u64 {
        self.targets.get(&target).map_or(0, |o| o.lock().last_sequence)
    }

    fn outbound(&self, target: ObjectId) -> Arc<Mutex<Outbound>> {
        self.targets.entry(target).or_default().clone()
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("id", &self.id)
            .field("home", &self.home)
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_display_and_relocate() {
        let id = ObjectId::new();
        let r = ActiveRef::new(id, "Counter", Location::new("a", 1));
        assert!(r.to_string().starts_with("Counter("));

        let moved = r.relocated(Location::new("b", 2));
        assert_eq!(moved.id(), id);
        assert_eq!(moved.location(), &Location::new("b", 2));
    }

    #[test]
    fn test_ref_serde() {
        let r = ActiveRef::new(ObjectId::new(), "Counter", Location::new("a", 1));
        let text = serde_json::to_string(&r).unwrap();
        let back: ActiveRef = serde_json::from_str(&text).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_detached_caller_fails_fast() {
        let caller = Caller::new(Location::new("a", 1), Weak::new());
        let target = ActiveRef::new(ObjectId::new(), "Counter", Location::new("a", 1));
        let outcome = caller.invoke(&target, "get", Vec::new()).wait();
        assert!(matches!(
            outcome,
            Err(crate::utils::errors::FutureError::Transport(TransportError::Unreachable(_)))
        ));
        assert!(caller.send(&target, "get", Vec::new()).is_err());
    }
}
