//! Record types for the spotprice state store.
//!
//! `SpotPriceRecord` is the normalized shape a price source hands to the
//! collector; the remaining types are what actually lands in the tables.
//! Prices are `rust_decimal::Decimal` end to end and serialize as decimal
//! strings, so a stored `0.0067` reads back as exactly `0.0067`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Name of the single checkpoint row in the progress table.
pub const CHECKPOINT_NAME: &str = "end_time";

/// `{product_description}:{instance_type}`.
pub type InstanceId = String;

/// `{product_description}:{instance_type}:{availability_zone}`.
pub type InstanceZoneId = String;

/// Join product description and instance type into an instance id.
pub fn instance_id(product_description: &str, instance_type: &str) -> InstanceId {
    format!("{product_description}:{instance_type}")
}

/// Join product description, instance type and zone into an instance-zone id.
pub fn instance_zone_id(
    product_description: &str,
    instance_type: &str,
    availability_zone: &str,
) -> InstanceZoneId {
    format!("{product_description}:{instance_type}:{availability_zone}")
}

// ── Source records ─────────────────────────────────────────────────

/// One spot price point as reported by a price source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotPriceRecord {
    /// e.g. `Linux/UNIX`.
    pub product_description: String,
    /// e.g. `t1.micro`.
    pub instance_type: String,
    /// e.g. `us-east-1a`.
    pub availability_zone: String,
    /// Unix timestamp (seconds) of the price change.
    pub timestamp: i64,
    pub price: Decimal,
}

impl SpotPriceRecord {
    pub fn instance_id(&self) -> InstanceId {
        instance_id(&self.product_description, &self.instance_type)
    }

    pub fn instance_zone_id(&self) -> InstanceZoneId {
        instance_zone_id(
            &self.product_description,
            &self.instance_type,
            &self.availability_zone,
        )
    }

    /// The observation row this record is stored as.
    pub fn to_observation(&self) -> SpotPriceObservation {
        SpotPriceObservation {
            instance_zone_id: self.instance_zone_id(),
            timestamp: self.timestamp,
            price: self.price,
        }
    }

    /// The instance-zone association this record proves.
    pub fn to_instance_zone(&self) -> InstanceZone {
        InstanceZone {
            instance_id: self.instance_id(),
            zone: self.availability_zone.clone(),
        }
    }
}

// ── Stored rows ────────────────────────────────────────────────────

/// A persisted price point, unique per `(instance_zone_id, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotPriceObservation {
    pub instance_zone_id: InstanceZoneId,
    pub timestamp: i64,
    pub price: Decimal,
}

/// A zone in which an instance/product combination has been observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceZone {
    pub instance_id: InstanceId,
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Region {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductDescription {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceType {
    pub name: String,
}

/// Collector checkpoint row.
///
/// `timestamp` is the end of the last fully completed ingestion window
/// (Unix seconds), or `None` if the row exists but was never advanced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectorProgress {
    pub name: String,
    pub timestamp: Option<i64>,
}
