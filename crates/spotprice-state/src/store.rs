//! StateStore — redb-backed persistence for spotprice.
//!
//! Provides batched upserts over every table, point and range reads for
//! the query service, and the collector checkpoint. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::batch::{BatchOutcome, WriteBatch};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode<T: serde::Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SPOT_PRICES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_ZONES).map_err(map_err!(Table))?;
        txn.open_table(REGIONS).map_err(map_err!(Table))?;
        txn.open_table(PRODUCT_DESCRIPTIONS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_TYPES).map_err(map_err!(Table))?;
        txn.open_table(PROGRESS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Batched writes ─────────────────────────────────────────────

    /// Commit every staged row in one write transaction.
    ///
    /// All writes are upserts: an observation whose key already exists is
    /// restated, reference rows are rewritten. Nothing is ever deleted.
    pub fn apply(&self, batch: WriteBatch) -> StateResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SPOT_PRICES).map_err(map_err!(Table))?;
            for ((zone_id, ts), obs) in &batch.observations {
                let value = encode(obs)?;
                let previous = table
                    .insert((zone_id.as_str(), *ts), value.as_slice())
                    .map_err(map_err!(Write))?;
                if previous.is_none() {
                    outcome.observations_new += 1;
                }
                outcome.observations_written += 1;
            }
        }
        {
            let mut table = txn.open_table(INSTANCE_ZONES).map_err(map_err!(Table))?;
            for iz in &batch.instance_zones {
                let value = encode(iz)?;
                table
                    .insert((iz.instance_id.as_str(), iz.zone.as_str()), value.as_slice())
                    .map_err(map_err!(Write))?;
                outcome.reference_rows_written += 1;
            }
        }
        outcome.reference_rows_written += put_named(&txn, REGIONS, &batch.regions, |name| {
            encode(&Region { name: name.to_string() })
        })?;
        outcome.reference_rows_written +=
            put_named(&txn, PRODUCT_DESCRIPTIONS, &batch.product_descriptions, |name| {
                encode(&ProductDescription { name: name.to_string() })
            })?;
        outcome.reference_rows_written +=
            put_named(&txn, INSTANCE_TYPES, &batch.instance_types, |name| {
                encode(&InstanceType { name: name.to_string() })
            })?;
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            observations = outcome.observations_written,
            new = outcome.observations_new,
            references = outcome.reference_rows_written,
            "batch committed"
        );
        Ok(outcome)
    }

    // ── Observations ───────────────────────────────────────────────

    /// Get a single observation by its key.
    pub fn get_spot_price(
        &self,
        instance_zone_id: &str,
        timestamp: i64,
    ) -> StateResult<Option<SpotPriceObservation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPOT_PRICES).map_err(map_err!(Table))?;
        match table
            .get((instance_zone_id, timestamp))
            .map_err(map_err!(Read))?
        {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Observations of one instance-zone with `since <= timestamp <= until`,
    /// oldest first.
    pub fn list_spot_prices(
        &self,
        instance_zone_id: &str,
        since: i64,
        until: i64,
    ) -> StateResult<Vec<SpotPriceObservation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPOT_PRICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        if since > until {
            return Ok(results);
        }
        for entry in table
            .range((instance_zone_id, since)..=(instance_zone_id, until))
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Total number of stored observations.
    pub fn count_spot_prices(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPOT_PRICES).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    // ── Reference tables ───────────────────────────────────────────

    /// All zones an instance/product combination was observed in.
    pub fn list_instance_zones(&self, instance_id: &str) -> StateResult<Vec<InstanceZone>> {
        self.list_zones_in_region(instance_id, "")
    }

    /// Zones of an instance/product combination whose name begins with
    /// `region` (e.g. `us-east-1` matches `us-east-1a`, `us-east-1b`).
    pub fn list_zones_in_region(
        &self,
        instance_id: &str,
        region: &str,
    ) -> StateResult<Vec<InstanceZone>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_ZONES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range((instance_id, region)..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let (id, zone) = key.value();
            if id != instance_id || !zone.starts_with(region) {
                break;
            }
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    pub fn list_regions(&self) -> StateResult<Vec<Region>> {
        self.list_named(REGIONS)
    }

    pub fn list_product_descriptions(&self) -> StateResult<Vec<ProductDescription>> {
        self.list_named(PRODUCT_DESCRIPTIONS)
    }

    pub fn list_instance_types(&self) -> StateResult<Vec<InstanceType>> {
        self.list_named(INSTANCE_TYPES)
    }

    fn list_named<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Checkpoint ─────────────────────────────────────────────────

    /// Get a progress row by name.
    pub fn get_progress(&self, name: &str) -> StateResult<Option<CollectorProgress>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROGRESS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// The collector checkpoint, if one was ever written.
    pub fn checkpoint(&self) -> StateResult<Option<i64>> {
        Ok(self
            .get_progress(CHECKPOINT_NAME)?
            .and_then(|p| p.timestamp))
    }

    /// Move the checkpoint to `timestamp`.
    ///
    /// Fails with [`StateError::CheckpointRegression`] if that would move it
    /// backwards; rewriting the current value is allowed.
    pub fn advance_checkpoint(&self, timestamp: i64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROGRESS).map_err(map_err!(Table))?;
            let current = match table.get(CHECKPOINT_NAME).map_err(map_err!(Read))? {
                Some(guard) => decode::<CollectorProgress>(guard.value())?.timestamp,
                None => None,
            };
            if let Some(current) = current {
                if timestamp < current {
                    return Err(StateError::CheckpointRegression {
                        current,
                        proposed: timestamp,
                    });
                }
            }
            let value = encode(&CollectorProgress {
                name: CHECKPOINT_NAME.to_string(),
                timestamp: Some(timestamp),
            })?;
            table
                .insert(CHECKPOINT_NAME, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(timestamp, "checkpoint advanced");
        Ok(())
    }
}

/// Upsert a set of name-keyed reference rows, returning how many were written.
fn put_named(
    txn: &redb::WriteTransaction,
    def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
    names: &std::collections::BTreeSet<String>,
    to_value: impl Fn(&str) -> StateResult<Vec<u8>>,
) -> StateResult<usize> {
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    for name in names {
        let value = to_value(name)?;
        table
            .insert(name.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(names.len())
}
