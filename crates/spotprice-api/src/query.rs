//! Price series queries.
//!
//! Shared by the JSON endpoint and the chart page: resolve the zones of
//! the requested region, read each zone's observations inside the window
//! and group them per zone as `[timestamp, price]` pairs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use thiserror::Error;

use spotprice_state::{StateError, StateStore, instance_id, instance_zone_id};

/// Windows (in days) the query surface accepts.
pub const WINDOWS: [u32; 6] = [1, 3, 8, 15, 30, 60];

pub const DEFAULT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX";
pub const DEFAULT_INSTANCE_TYPE: &str = "t1.micro";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_WINDOW: u32 = 3;

const DAY: i64 = 86_400;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("window must be one of 1, 3, 8, 15, 30 or 60 days, got {0}")]
    InvalidWindow(u32),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Query-string parameters. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PriceQuery {
    pub product_description: String,
    #[serde(alias = "type")]
    pub instance_type: String,
    pub region: String,
    /// Days of history.
    pub window: u32,
}

impl Default for PriceQuery {
    fn default() -> Self {
        Self {
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            region: DEFAULT_REGION.to_string(),
            window: DEFAULT_WINDOW,
        }
    }
}

impl PriceQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        if WINDOWS.contains(&self.window) {
            Ok(())
        } else {
            Err(QueryError::InvalidWindow(self.window))
        }
    }
}

/// `[timestamp, price]`, serialized as a two-element JSON array.
pub type PricePoint = (String, f64);

/// Zone name → points, oldest first.
pub type PriceSeries = BTreeMap<String, Vec<PricePoint>>;

/// Read the series for `query` over the `window` days before `now`.
pub fn price_series(
    store: &StateStore,
    query: &PriceQuery,
    now: i64,
) -> Result<PriceSeries, QueryError> {
    query.validate()?;

    // Strictly newer than `now - window`.
    let since = now - i64::from(query.window) * DAY + 1;
    let instance = instance_id(&query.product_description, &query.instance_type);

    let mut series = PriceSeries::new();
    for iz in store.list_zones_in_region(&instance, &query.region)? {
        let id = instance_zone_id(&query.product_description, &query.instance_type, &iz.zone);
        let points: Vec<PricePoint> = store
            .list_spot_prices(&id, since, i64::MAX)?
            .into_iter()
            .filter_map(|obs| Some((format_timestamp(obs.timestamp)?, obs.price.to_f64()?)))
            .collect();
        if !points.is_empty() {
            series.insert(iz.zone, points);
        }
    }
    Ok(series)
}

/// `%Y-%m-%dT%H:%M:%SZ`.
pub fn format_timestamp(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use spotprice_state::{SpotPriceRecord, WriteBatch};

    const NOW: i64 = 1_704_844_800; // 2024-01-10T00:00:00Z

    fn store_with(records: &[(&str, &str, i64, &str)]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        for (itype, zone, ts, price) in records {
            let rec = SpotPriceRecord {
                product_description: "Linux/UNIX".into(),
                instance_type: itype.to_string(),
                availability_zone: zone.to_string(),
                timestamp: *ts,
                price: Decimal::from_str_exact(price).unwrap(),
            };
            batch.put_observation(rec.to_observation());
            batch.put_instance_zone(rec.to_instance_zone());
        }
        store.apply(batch).unwrap();
        store
    }

    #[test]
    fn defaults_match_chart_page() {
        let q = PriceQuery::default();
        assert_eq!(q.product_description, "Linux/UNIX");
        assert_eq!(q.instance_type, "t1.micro");
        assert_eq!(q.region, "us-east-1");
        assert_eq!(q.window, 3);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_window() {
        let q = PriceQuery {
            window: 7,
            ..PriceQuery::default()
        };
        assert!(matches!(q.validate(), Err(QueryError::InvalidWindow(7))));
        let store = StateStore::open_in_memory().unwrap();
        assert!(price_series(&store, &q, NOW).is_err());
    }

    #[test]
    fn groups_by_zone_within_region_and_window() {
        let store = store_with(&[
            ("t1.micro", "us-east-1a", NOW - 3600, "0.0067"),
            ("t1.micro", "us-east-1a", NOW - 7200, "0.0070"),
            ("t1.micro", "us-east-1b", NOW - 3600, "0.0080"),
            ("t1.micro", "eu-west-1a", NOW - 3600, "0.0090"),
            ("m1.large", "us-east-1a", NOW - 3600, "0.0260"),
            // Outside the 3-day window.
            ("t1.micro", "us-east-1a", NOW - 4 * DAY, "0.0100"),
        ]);

        let series = price_series(&store, &PriceQuery::default(), NOW).unwrap();
        assert_eq!(series.keys().collect::<Vec<_>>(), vec!["us-east-1a", "us-east-1b"]);
        assert_eq!(
            series["us-east-1a"],
            vec![
                ("2024-01-09T22:00:00Z".to_string(), 0.0070),
                ("2024-01-09T23:00:00Z".to_string(), 0.0067),
            ]
        );
    }

    #[test]
    fn window_start_is_exclusive() {
        let store = store_with(&[
            ("t1.micro", "us-east-1a", NOW - DAY, "0.0067"),
            ("t1.micro", "us-east-1a", NOW - DAY + 1, "0.0068"),
        ]);
        let q = PriceQuery {
            window: 1,
            ..PriceQuery::default()
        };
        let series = price_series(&store, &q, NOW).unwrap();
        assert_eq!(series["us-east-1a"].len(), 1);
    }

    #[test]
    fn decimal_price_reads_back_exactly() {
        let store = store_with(&[("t1.micro", "us-east-1a", NOW - 60, "0.0067")]);
        let series = price_series(&store, &PriceQuery::default(), NOW).unwrap();
        let json = serde_json::to_string(&series).unwrap();
        assert!(json.contains("0.0067"), "{json}");
        assert!(!json.contains("0.006700000"), "{json}");
    }

    #[test]
    fn type_alias_is_accepted() {
        let q: PriceQuery = serde_json::from_str(r#"{"type":"m1.large"}"#).unwrap();
        assert_eq!(q.instance_type, "m1.large");
        assert_eq!(q.region, "us-east-1");
    }
}
