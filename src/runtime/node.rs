// src/runtime/node.rs
//! A node: bodies hosted at one location
//!
//! Each node owns the bodies living at its location, the forwarders left
//! behind by those that moved away and the futures of requests sent from
//! it. Nodes can be marked unreachable to simulate partitions.

use crate::body::handle::{BodyHandle, BodyStatus};
use crate::body::mailbox::Accepted;
use crate::future::{FutureRegistry, Liveness};
use crate::identity::{Location, ObjectId};
use crate::messaging::Request;
use crate::migration::{ForwardingTable, MigrationPacket};
use crate::runtime::active_runtime::RuntimeShared;
use crate::utils::errors::{MigrationError, TransportError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub struct Node {
    location: Location,
    reachable: AtomicBool,
    bodies: DashMap<ObjectId, Arc<BodyHandle>>,
    forwarders: ForwardingTable,
    futures: FutureRegistry,
    shared: Weak<RuntimeShared>,
}

impl Node {
    pub(crate) fn new(location: Location, shared: Weak<RuntimeShared>) -> Self {
        Self {
            location,
            reachable: AtomicBool::new(true),
            bodies: DashMap::new(),
            forwarders: ForwardingTable::new(),
            futures: FutureRegistry::new(),
            shared,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
        info!("Node {} reachable: {}", self.location, reachable);
    }

    pub fn forwarders(&self) -> &ForwardingTable {
        &self.forwarders
    }

    /// Futures of requests sent from this node
    pub fn futures(&self) -> &FutureRegistry {
        &self.futures
    }

    pub fn body(&self, id: ObjectId) -> Option<Arc<BodyHandle>> {
        self.bodies.get(&id).map(|b| b.clone())
    }

    pub fn bodies(&self) -> Vec<Arc<BodyHandle>> {
        self.bodies.iter().map(|b| b.value().clone()).collect()
    }

    /// Route an incoming request to the mailbox of its target.
    pub fn accept(&self, request: Request) -> Result<Accepted, TransportError> {
        let id = request.target();
        if let Some(handle) = self.body(id) {
            return handle.mailbox().push(request);
        }
        match self.forwarders.lookup(id) {
            Some(to) => Err(TransportError::Moved(id, to)),
            None => Err(TransportError::UnknownObject {
                id,
                location: self.location.clone(),
            }),
        }
    }

    /// Start hosting a body, replacing any earlier handle for the same id.
    pub(crate) fn host(&self, handle: Arc<BodyHandle>) {
        let id = handle.id();
        self.forwarders.remove(id);
        self.bodies.insert(id, handle);
        debug!("Node {} hosts {}", self.location, id);
    }

    /// Stop hosting `id`, only if it is still `expected` when given.
    pub(crate) fn evict(&self, id: ObjectId, expected: Option<&Arc<BodyHandle>>) -> bool {
        self.bodies
            .remove_if(&id, |_, current| expected.map_or(true, |e| Arc::ptr_eq(e, current)))
            .is_some()
    }

    /// Receive a migrating body.
    pub(crate) fn install(self: &Arc<Self>, packet: MigrationPacket) -> Result<(), MigrationError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or(MigrationError::DestinationUnreachable(self.location.clone()))?;
        crate::migration::manager::arrive(&shared, self, packet)
    }

    pub fn ping(&self, id: ObjectId) -> Liveness {
        let Some(handle) = self.body(id) else {
            return match self.forwarders.lookup(id) {
                Some(_) => Liveness::Alive,
                None => Liveness::Dead(TransportError::UnknownObject {
                    id,
                    location: self.location.clone(),
                }),
            };
        };
        match handle.status() {
            BodyStatus::Crashed | BodyStatus::Recovering if handle.is_fault_tolerant() => Liveness::Alive,
            BodyStatus::Crashed => Liveness::Dead(TransportError::TargetCrashed(id)),
            BodyStatus::Terminated | BodyStatus::Failed(_) => Liveness::Dead(TransportError::Terminated(id)),
            _ => Liveness::Alive,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("location", &self.location)
            .field("reachable", &self.is_reachable())
            .field("bodies", &self.bodies.len())
            .field("forwarders", &self.forwarders.len())
            .field("pending_futures", &self.futures.len())
            .finish()
    }
}
