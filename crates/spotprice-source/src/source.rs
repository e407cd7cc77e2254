//! The price source contract.

use async_trait::async_trait;

use spotprice_state::SpotPriceRecord;

use crate::error::SourceResult;

/// One request for a page of price history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub region: String,
    /// Unix seconds, inclusive.
    pub start_time: i64,
    /// Unix seconds, inclusive. `None` asks for everything up to now.
    pub end_time: Option<i64>,
    /// Continuation token from the previous page.
    pub next_token: Option<String>,
}

impl HistoryQuery {
    pub fn new(region: impl Into<String>, start_time: i64, end_time: Option<i64>) -> Self {
        Self {
            region: region.into(),
            start_time,
            end_time,
            next_token: None,
        }
    }

    /// The same query, continued from `token`.
    pub fn continued(&self, token: Option<String>) -> Self {
        Self {
            next_token: token,
            ..self.clone()
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PricePage {
    pub records: Vec<SpotPriceRecord>,
    /// `None` on the last page.
    pub next_token: Option<String>,
}

/// A provider of spot price history.
///
/// Callers page through [`PriceSource::fetch_price_history`] by feeding
/// each returned `next_token` back in until it is `None`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// All regions to collect from, with excluded regions already removed.
    async fn list_regions(&self) -> SourceResult<Vec<String>>;

    /// Fetch one page of history for `query.region`.
    async fn fetch_price_history(&self, query: &HistoryQuery) -> SourceResult<PricePage>;
}

/// Region exclusion policy.
///
/// Restricted partitions (China, GovCloud) are visible in region listings
/// but reject ordinary credentials, so they are filtered by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionFilter {
    excluded_prefixes: Vec<String>,
}

impl RegionFilter {
    pub fn new<I, S>(excluded_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_prefixes: excluded_prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, region: &str) -> bool {
        !self
            .excluded_prefixes
            .iter()
            .any(|prefix| region.starts_with(prefix.as_str()))
    }

    /// Drop excluded regions, keeping the input order.
    pub fn apply(&self, regions: Vec<String>) -> Vec<String> {
        regions.into_iter().filter(|r| self.allows(r)).collect()
    }
}
