//! redb table definitions for the spotprice state store.
//!
//! Values are JSON-serialized records. Keys that combine two parts use
//! redb tuple keys rather than joined strings, because product
//! descriptions such as `Linux/UNIX` and instance-zone ids already contain
//! separator characters.

use redb::TableDefinition;

/// Spot price observations keyed by `(instance_zone_id, timestamp)`.
pub const SPOT_PRICES: TableDefinition<(&str, i64), &[u8]> = TableDefinition::new("spot_price");

/// Instance-zone associations keyed by `(instance_id, zone)`.
pub const INSTANCE_ZONES: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("instance_zone");

/// Regions keyed by region name.
pub const REGIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("region");

/// Product descriptions keyed by name.
pub const PRODUCT_DESCRIPTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("product_description");

/// Instance types keyed by name.
pub const INSTANCE_TYPES: TableDefinition<&str, &[u8]> = TableDefinition::new("instance_type");

/// Collector progress rows keyed by name (only `end_time` today).
pub const PROGRESS: TableDefinition<&str, &[u8]> = TableDefinition::new("progress");
