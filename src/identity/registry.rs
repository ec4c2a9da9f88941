// src/identity/registry.rs
//! Versioned location registry
//!
//! Maps an [`ObjectId`] to the location currently hosting it. Every update
//! must carry an epoch strictly greater than the stored one, so a writer
//! that raced with another migration or recovery sees
//! [`RegistryError::StaleEpoch`] instead of silently overwriting.

use crate::identity::{Location, ObjectId};
use crate::utils::errors::RegistryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Current location of an object plus its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location: Location,
    pub epoch: u64,
}

/// Registry shared by every node of a runtime
#[derive(Debug, Default)]
pub struct LocationRegistry {
    records: DashMap<ObjectId, LocationRecord>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created object at epoch 0.
    pub fn register(&self, id: ObjectId, location: Location) -> Result<LocationRecord, RegistryError> {
        match self.records.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                let record = LocationRecord { location, epoch: 0 };
                slot.insert(record.clone());
                debug!("Registered {} at {}", id, record.location);
                Ok(record)
            }
        }
    }

    pub fn lookup(&self, id: ObjectId) -> Option<LocationRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    /// Move `id` to `location`, provided `epoch` is newer than the stored one.
    pub fn update(
        &self,
        id: ObjectId,
        location: Location,
        epoch: u64,
    ) -> Result<LocationRecord, RegistryError> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotRegistered(id))?;

        if epoch <= entry.epoch {
            warn!(
                "Rejected stale location update for {} (epoch {} <= {})",
                id, epoch, entry.epoch
            );
            return Err(RegistryError::StaleEpoch {
                id,
                current: entry.epoch,
                proposed: epoch,
            });
        }

        entry.location = location;
        entry.epoch = epoch;
        debug!("{} now at {} (epoch {})", id, entry.location, epoch);
        Ok(entry.clone())
    }

    /// Move `id` to `location` on behalf of a writer that read epoch
    /// `seen` before it started. Fails with [`RegistryError::StaleEpoch`]
    /// if anybody else moved the object in between.
    pub fn relocate(&self, id: ObjectId, location: Location, seen: u64) -> Result<LocationRecord, RegistryError> {
        self.update(id, location, seen + 1)
    }

    pub fn remove(&self, id: ObjectId) -> Option<LocationRecord> {
        self.records.remove(&id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
