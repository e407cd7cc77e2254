//! Reference data gathered during a cycle.
//!
//! Each region fills its own [`RegionHarvest`]; finished harvests are
//! merged into the cycle's [`PendingReferences`], which is committed once
//! every region succeeded. If the cycle bails out first, dropping the
//! guard discards whatever was staged.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use spotprice_state::{
    BatchOutcome, InstanceZone, SpotPriceRecord, StateResult, StateStore, WriteBatch,
};

/// Distinct reference values seen in one region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionHarvest {
    pub region: String,
    pub product_descriptions: BTreeSet<String>,
    pub instance_types: BTreeSet<String>,
    pub instance_zones: BTreeSet<InstanceZone>,
    pub records: usize,
    pub pages: usize,
    /// Observation rows that did not exist before this cycle.
    pub observations_new: usize,
}

impl RegionHarvest {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, rec: &SpotPriceRecord) {
        self.product_descriptions
            .insert(rec.product_description.clone());
        self.instance_types.insert(rec.instance_type.clone());
        self.instance_zones.insert(rec.to_instance_zone());
        self.records += 1;
    }
}

/// Scoped accumulator for the cycle's reference rows.
pub struct PendingReferences {
    state: StateStore,
    batch: Option<WriteBatch>,
    regions: usize,
}

impl PendingReferences {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            batch: Some(WriteBatch::new()),
            regions: 0,
        }
    }

    /// Stage everything a finished region observed.
    pub fn merge(&mut self, harvest: RegionHarvest) {
        let Some(batch) = self.batch.as_mut() else {
            return;
        };
        batch.put_region(harvest.region);
        for name in harvest.product_descriptions {
            batch.put_product_description(name);
        }
        for name in harvest.instance_types {
            batch.put_instance_type(name);
        }
        for iz in harvest.instance_zones {
            batch.put_instance_zone(iz);
        }
        self.regions += 1;
    }

    /// Write every staged row in one batch.
    pub fn commit(mut self) -> StateResult<BatchOutcome> {
        let batch = self.batch.take().unwrap_or_default();
        let outcome = self.state.apply(batch)?;
        debug!(
            regions = self.regions,
            rows = outcome.reference_rows_written,
            "reference tables flushed"
        );
        Ok(outcome)
    }
}

impl Drop for PendingReferences {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            if !batch.is_empty() {
                warn!(
                    regions = self.regions,
                    rows = batch.reference_count(),
                    "discarding reference rows of an aborted cycle"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn rec(itype: &str, zone: &str) -> SpotPriceRecord {
        SpotPriceRecord {
            product_description: "Linux/UNIX".into(),
            instance_type: itype.into(),
            availability_zone: zone.into(),
            timestamp: 1_704_067_200,
            price: Decimal::new(67, 4),
        }
    }

    #[test]
    fn harvest_deduplicates() {
        let mut h = RegionHarvest::new("us-east-1");
        h.record(&rec("t1.micro", "us-east-1a"));
        h.record(&rec("t1.micro", "us-east-1a"));
        h.record(&rec("m1.large", "us-east-1b"));

        assert_eq!(h.records, 3);
        assert_eq!(h.instance_types.len(), 2);
        assert_eq!(h.product_descriptions.len(), 1);
        assert_eq!(h.instance_zones.len(), 2);
    }

    #[test]
    fn commit_writes_union() {
        let state = StateStore::open_in_memory().unwrap();
        let mut pending = PendingReferences::new(state.clone());

        let mut a = RegionHarvest::new("us-east-1");
        a.record(&rec("t1.micro", "us-east-1a"));
        a.record(&rec("m1.large", "us-east-1a"));
        let mut b = RegionHarvest::new("eu-west-1");
        b.record(&rec("t1.micro", "eu-west-1b"));
        pending.merge(a);
        pending.merge(b);
        pending.commit().unwrap();

        let types: Vec<_> = state
            .list_instance_types()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(types, vec!["m1.large", "t1.micro"]);
        assert_eq!(state.list_regions().unwrap().len(), 2);
    }

    #[test]
    fn dropped_guard_writes_nothing() {
        let state = StateStore::open_in_memory().unwrap();
        {
            let mut pending = PendingReferences::new(state.clone());
            let mut h = RegionHarvest::new("us-east-1");
            h.record(&rec("t1.micro", "us-east-1a"));
            pending.merge(h);
        }
        assert!(state.list_regions().unwrap().is_empty());
        assert!(state.list_instance_types().unwrap().is_empty());
    }
}
