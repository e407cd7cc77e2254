//! spotprice-state — storage model for collected spot prices.
//!
//! Backed by [redb](https://docs.rs/redb), holds the observation time
//! series, the reference tables derived from it (regions, product
//! descriptions, instance types, instance-zone pairs) and the collector
//! checkpoint.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Observations use a `(instance_zone_id, timestamp)` tuple key so a
//! single range scan yields one zone's series in time order; instance
//! zones use `(instance_id, zone)` so all zones of an instance are
//! contiguous and a region prefix narrows them further.
//!
//! Writes go through [`WriteBatch`], staged in memory and committed in one
//! write transaction by [`StateStore::apply`]. Every write is an upsert,
//! which is what makes re-ingesting an overlapping window harmless.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared between the collector and the query service.

pub mod batch;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use batch::{BatchOutcome, WriteBatch};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
