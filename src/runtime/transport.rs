// src/runtime/transport.rs
//! Moving messages between nodes
//!
//! The [`Transport`] trait is the seam between the runtime and the wire.
//! [`LocalTransport`] connects nodes living in the same process; it
//! follows forwarder redirects up to a hop limit.

use crate::body::mailbox::Accepted;
use crate::future::Liveness;
use crate::identity::{Location, ObjectId};
use crate::messaging::{Reply, Request};
use crate::migration::MigrationPacket;
use crate::runtime::node::Node;
use crate::utils::errors::{MigrationError, TransportError};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub trait Transport: Send + Sync {
    /// Hand a request to the body of its target; returns where it was accepted.
    fn send(&self, request: Request, to: &Location) -> Result<Location, TransportError>;

    /// Deliver a reply to the node named in its `reply_to`.
    fn deliver(&self, reply: Reply) -> Result<(), TransportError>;

    /// Install a migrating body at `to`.
    fn transfer(&self, packet: MigrationPacket, to: &Location) -> Result<(), MigrationError>;

    /// Is `id` alive at `at`?
    fn ping(&self, id: ObjectId, at: &Location) -> Liveness;
}

/// Counters of a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub sent: u64,
    pub duplicates: u64,
    pub forwarded: u64,
    pub replies: u64,
    pub transfers: u64,
}

/// In-process transport between nodes of one runtime
pub struct LocalTransport {
    nodes: DashMap<Location, Arc<Node>>,
    max_hops: usize,
    sent: AtomicU64,
    duplicates: AtomicU64,
    forwarded: AtomicU64,
    replies: AtomicU64,
    transfers: AtomicU64,
}

impl LocalTransport {
    pub fn new(max_hops: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            max_hops,
            sent: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            replies: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
        }
    }

    /// Attach a node; false if one already lives at that location.
    pub fn add_node(&self, node: Arc<Node>) -> bool {
        let location = node.location().clone();
        if self.nodes.contains_key(&location) {
            return false;
        }
        info!("Node {} attached", location);
        self.nodes.insert(location, node);
        true
    }

    pub fn node(&self, location: &Location) -> Option<Arc<Node>> {
        self.nodes.get(location).map(|n| n.clone())
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }

    fn reachable(&self, location: &Location) -> Option<Arc<Node>> {
        self.node(location).filter(|n| n.is_reachable())
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            sent: self.sent.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
        }
    }
}

impl Transport for LocalTransport {
    fn send(&self, request: Request, to: &Location) -> Result<Location, TransportError> {
        let target = request.target();
        let mut location = to.clone();

        for _ in 0..=self.max_hops {
            let node = self
                .reachable(&location)
                .ok_or_else(|| TransportError::Unreachable(location.clone()))?;
            match node.accept(request.clone()) {
                Ok(accepted) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    if accepted == Accepted::Duplicate {
                        self.duplicates.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(location);
                }
                Err(TransportError::Moved(_, next)) => {
                    debug!("{} moved from {} to {}", target, location, next);
                    self.forwarded.fetch_add(1, Ordering::Relaxed);
                    location = next;
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransportError::TooManyHops(target))
    }

    fn deliver(&self, reply: Reply) -> Result<(), TransportError> {
        let node = self
            .reachable(&reply.reply_to)
            .ok_or_else(|| TransportError::Unreachable(reply.reply_to.clone()))?;
        self.replies.fetch_add(1, Ordering::Relaxed);
        if !node.futures().complete(&reply) {
            debug!("Reply {} had no waiting future", reply.request_id);
        }
        Ok(())
    }

    fn transfer(&self, packet: MigrationPacket, to: &Location) -> Result<(), MigrationError> {
        let node = self
            .reachable(to)
            .ok_or_else(|| MigrationError::DestinationUnreachable(to.clone()))?;
        node.install(packet)?;
        self.transfers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn ping(&self, id: ObjectId, at: &Location) -> Liveness {
        match self.reachable(at) {
            Some(node) => node.ping(id),
            None => Liveness::Dead(TransportError::Unreachable(at.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RequestId;

    #[test]
    fn test_unknown_locations_are_unreachable() {
        let transport = LocalTransport::new(4);
        let nowhere = Location::new("nowhere", 1);
        let target = ObjectId::new();
        let request = Request::call(
            RequestId::new(ObjectId::new(), 1),
            target,
            "get",
            Vec::new(),
            nowhere.clone(),
        )
        .unwrap();

        assert_eq!(
            transport.send(request, &nowhere),
            Err(TransportError::Unreachable(nowhere.clone()))
        );
        assert!(matches!(transport.ping(target, &nowhere), Liveness::Dead(_)));
        assert_eq!(transport.stats(), TransportStats::default());
        assert!(transport.nodes().is_empty());
    }
}
