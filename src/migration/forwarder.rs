// src/migration/forwarder.rs
//! Forwarders left behind by migrating objects
//!
//! When an object leaves a node, the node keeps an entry pointing at the
//! new location for a grace period. Requests arriving in the meantime are
//! answered with a redirect instead of an "unknown object" failure.

use crate::identity::{Location, ObjectId};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ForwardEntry {
    pub to: Location,
    pub expires_at: Instant,
}

/// Per-node map of departed objects
#[derive(Debug, Default)]
pub struct ForwardingTable {
    entries: DashMap<ObjectId, ForwardEntry>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `id` at `to` for `grace`. Replaces any earlier entry.
    pub fn insert(&self, id: ObjectId, to: Location, grace: Duration) {
        debug!("Forwarder {} -> {} for {:?}", id, to, grace);
        self.entries.insert(
            id,
            ForwardEntry {
                to,
                expires_at: Instant::now() + grace,
            },
        );
    }

    /// Where `id` went, unless the entry expired.
    pub fn lookup(&self, id: ObjectId) -> Option<Location> {
        let expired = match self.entries.get(&id) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.to.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&id);
        }
        None
    }

    pub fn remove(&self, id: ObjectId) -> Option<Location> {
        self.entries.remove(&id).map(|(_, e)| e.to)
    }

    /// Drop expired entries; returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            info!("Swept {} expired forwarders", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lookup_and_expiry() {
        let table = ForwardingTable::new();
        let id = ObjectId::new();
        let to = Location::new("node-b", 9001);

        table.insert(id, to.clone(), Duration::from_millis(30));
        assert_eq!(table.lookup(id), Some(to));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(table.lookup(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep() {
        let table = ForwardingTable::new();
        table.insert(ObjectId::new(), Location::new("a", 1), Duration::from_millis(0));
        table.insert(ObjectId::new(), Location::new("b", 2), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(5));
        assert_eq!(table.sweep(), 1);
        assert_eq!(table.len(), 1);
    }
}
