//! Staged multi-table writes.
//!
//! A [`WriteBatch`] collects rows in memory; [`crate::StateStore::apply`]
//! commits all of them in one redb write transaction. Staging uses maps
//! keyed like the tables, so a row staged twice is written once.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::*;

/// Rows waiting to be committed.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub(crate) observations: BTreeMap<(InstanceZoneId, i64), SpotPriceObservation>,
    pub(crate) instance_zones: BTreeSet<InstanceZone>,
    pub(crate) regions: BTreeSet<String>,
    pub(crate) product_descriptions: BTreeSet<String>,
    pub(crate) instance_types: BTreeSet<String>,
}

/// What a committed batch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Observation rows written (new or restated).
    pub observations_written: usize,
    /// Observation rows whose key did not exist before.
    pub observations_new: usize,
    /// Reference rows written across all reference tables.
    pub reference_rows_written: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an observation; a later one with the same key replaces it.
    pub fn put_observation(&mut self, obs: SpotPriceObservation) {
        self.observations
            .insert((obs.instance_zone_id.clone(), obs.timestamp), obs);
    }

    pub fn put_instance_zone(&mut self, iz: InstanceZone) {
        self.instance_zones.insert(iz);
    }

    pub fn put_region(&mut self, name: impl Into<String>) {
        self.regions.insert(name.into());
    }

    pub fn put_product_description(&mut self, name: impl Into<String>) {
        self.product_descriptions.insert(name.into());
    }

    pub fn put_instance_type(&mut self, name: impl Into<String>) {
        self.instance_types.insert(name.into());
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn reference_count(&self) -> usize {
        self.instance_zones.len()
            + self.regions.len()
            + self.product_descriptions.len()
            + self.instance_types.len()
    }

    pub fn len(&self) -> usize {
        self.observation_count() + self.reference_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
