//! spotprice-collector — the ingestion loop.
//!
//! One [`Collector::run_cycle`] loads the checkpoint, fixes the window end,
//! pages through every region's price history, upserts observations page
//! by page, flushes the reference tables and finally advances the
//! checkpoint. Any failure before that last write leaves the checkpoint
//! where it was, so the next cycle re-covers the same window.
//!
//! [`Collector::run`] wraps cycles in a sleep loop with a shutdown signal;
//! [`Collector::run_once`] is for external schedulers.

pub mod backoff;
pub mod collector;
pub mod error;
pub mod harvest;

pub use backoff::Backoff;
pub use collector::{Collector, CollectorSettings, CycleReport};
pub use error::{CollectError, CollectResult};
pub use harvest::{PendingReferences, RegionHarvest};
