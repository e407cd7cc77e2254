//! Collector — drives ingestion cycles against a [`PriceSource`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use spotprice_core::CollectorConfig;
use spotprice_source::{HistoryQuery, PricePage, PriceSource, SourceError, SourceResult};
use spotprice_state::{StateStore, WriteBatch};

use crate::backoff::Backoff;
use crate::error::{CollectError, CollectResult};
use crate::harvest::{PendingReferences, RegionHarvest};

/// Cycle tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Look-back used when no checkpoint exists yet.
    pub initial_window: Duration,
    /// Retries per request after a rate-limit response.
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl From<&CollectorConfig> for CollectorSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            initial_window: Duration::from_secs(u64::from(config.initial_window_hours) * 3600),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            retry_max: Duration::from_millis(config.retry_max_ms),
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from(&CollectorConfig::default())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Window start, Unix seconds.
    pub start_time: i64,
    /// Window end, Unix seconds. The checkpoint now holds this value.
    pub end_time: i64,
    pub regions: usize,
    pub pages: usize,
    pub records: usize,
    pub observations_new: usize,
    pub reference_rows: usize,
    /// The window was empty and nothing was fetched.
    pub skipped: bool,
    pub duration: Duration,
}

/// Why a retried request did not produce a value.
enum RetryFailure {
    Failed(SourceError),
    Exhausted { attempts: u32, source: SourceError },
    Cancelled,
}

/// Fetches price history for every region and persists it.
pub struct Collector {
    source: Arc<dyn PriceSource>,
    state: StateStore,
    settings: CollectorSettings,
}

impl Collector {
    pub fn new(source: Arc<dyn PriceSource>, state: StateStore, settings: CollectorSettings) -> Self {
        Self {
            source,
            state,
            settings,
        }
    }

    /// Run one cycle ending now.
    pub async fn run_cycle(&self) -> CollectResult<CycleReport> {
        self.run_cycle_at(Utc::now().timestamp()).await
    }

    /// Run one cycle whose window ends at `now` (Unix seconds).
    pub async fn run_cycle_at(&self, now: i64) -> CollectResult<CycleReport> {
        self.cycle(now, None).await
    }

    /// One-shot mode: run a single cycle and hand any failure to the caller.
    pub async fn run_once(&self) -> CollectResult<CycleReport> {
        match self.run_cycle().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "collection cycle failed");
                Err(e)
            }
        }
    }

    /// Daemon mode: run a cycle, sleep `interval`, repeat until `shutdown`
    /// flips to `true`.
    ///
    /// A failed cycle is logged and retried after the next sleep. Errors that
    /// cannot clear on their own (rejected credentials, bad configuration)
    /// end the loop and are returned.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> CollectResult<()> {
        info!(interval_secs = interval.as_secs(), "collector started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cycle(Utc::now().timestamp(), Some(&shutdown)).await {
                Ok(_) => {}
                Err(CollectError::Cancelled) => {
                    info!("in-flight cycle cancelled, checkpoint untouched");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "collector stopping, retrying cannot help");
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_secs = interval.as_secs(),
                        "collection cycle failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("collector shutting down");
        Ok(())
    }

    async fn cycle(
        &self,
        now: i64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> CollectResult<CycleReport> {
        let started = Instant::now();

        // The window end is fixed once so every region covers the same span.
        let end_time = now;
        let start_time = match self.state.checkpoint()? {
            Some(ts) => ts,
            None => now.saturating_sub(self.settings.initial_window.as_secs() as i64),
        };
        let mut report = CycleReport {
            start_time,
            end_time,
            ..CycleReport::default()
        };

        if end_time <= start_time {
            warn!(
                start = %iso(start_time),
                end = %iso(end_time),
                "empty collection window, clock behind checkpoint; skipping cycle"
            );
            report.skipped = true;
            report.duration = started.elapsed();
            return Ok(report);
        }

        info!(start = %iso(start_time), end = %iso(end_time), "collection cycle started");

        let regions = self.list_regions(shutdown).await?;
        let mut pending = PendingReferences::new(self.state.clone());

        for region in &regions {
            let harvest = self
                .collect_region(region, start_time, end_time, shutdown)
                .await?;
            report.pages += harvest.pages;
            report.records += harvest.records;
            report.observations_new += harvest.observations_new;
            pending.merge(harvest);
        }

        if is_cancelled(shutdown) {
            return Err(CollectError::Cancelled);
        }

        report.reference_rows = pending.commit()?.reference_rows_written;
        self.state.advance_checkpoint(end_time)?;

        report.regions = regions.len();
        report.duration = started.elapsed();
        info!(
            regions = report.regions,
            pages = report.pages,
            records = report.records,
            new = report.observations_new,
            references = report.reference_rows,
            elapsed_ms = report.duration.as_millis() as u64,
            checkpoint = %iso(end_time),
            "collection cycle complete"
        );
        Ok(report)
    }

    async fn list_regions(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> CollectResult<Vec<String>> {
        let regions = self
            .with_retry("listing regions", shutdown, || self.source.list_regions())
            .await
            .map_err(|failure| match failure {
                RetryFailure::Failed(e) | RetryFailure::Exhausted { source: e, .. } => {
                    CollectError::Regions(e)
                }
                RetryFailure::Cancelled => CollectError::Cancelled,
            })?;
        debug!(count = regions.len(), ?regions, "regions to collect");
        Ok(regions)
    }

    /// Page through one region, storing each page as it arrives.
    async fn collect_region(
        &self,
        region: &str,
        start_time: i64,
        end_time: i64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> CollectResult<RegionHarvest> {
        let mut harvest = RegionHarvest::new(region);
        let query = HistoryQuery::new(region, start_time, Some(end_time));
        let mut token: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if is_cancelled(shutdown) {
                return Err(CollectError::Cancelled);
            }

            let page_no = harvest.pages;
            let page = self
                .fetch_page(&query.continued(token.clone()), page_no, shutdown)
                .await?;
            harvest.pages += 1;

            let mut batch = WriteBatch::new();
            for rec in &page.records {
                harvest.record(rec);
                batch.put_observation(rec.to_observation());
            }
            let outcome = self.state.apply(batch)?;
            harvest.observations_new += outcome.observations_new;

            debug!(
                region,
                page = page_no,
                records = page.records.len(),
                new = outcome.observations_new,
                "page stored"
            );

            match page.next_token {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(CollectError::Source {
                        region: region.to_string(),
                        page: page_no,
                        source: SourceError::InvalidResponse(format!(
                            "continuation token {next:?} repeated"
                        )),
                    });
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(
            region,
            pages = harvest.pages,
            records = harvest.records,
            "region complete"
        );
        Ok(harvest)
    }

    async fn fetch_page(
        &self,
        query: &HistoryQuery,
        page: usize,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> CollectResult<PricePage> {
        self.with_retry("fetching price history", shutdown, || {
            self.source.fetch_price_history(query)
        })
        .await
        .map_err(|failure| match failure {
            RetryFailure::Failed(source) => CollectError::Source {
                region: query.region.clone(),
                page,
                source,
            },
            RetryFailure::Exhausted { attempts, source } => CollectError::RetriesExhausted {
                region: query.region.clone(),
                page,
                attempts,
                source,
            },
            RetryFailure::Cancelled => CollectError::Cancelled,
        })
    }

    /// Call `op` until it succeeds, fails with a non-retryable error or the
    /// backoff budget runs out.
    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        shutdown: Option<&watch::Receiver<bool>>,
        mut op: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut backoff = Backoff::new(
            self.settings.retry_base,
            self.settings.retry_max,
            self.settings.max_retries,
        );
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            what,
                            attempt = backoff.attempts() - 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "rate limited, backing off"
                        );
                        pause(delay, shutdown).await;
                        if is_cancelled(shutdown) {
                            return Err(RetryFailure::Cancelled);
                        }
                    }
                    None => {
                        return Err(RetryFailure::Exhausted {
                            attempts: backoff.attempts(),
                            source: e,
                        });
                    }
                },
                Err(e) => return Err(RetryFailure::Failed(e)),
            }
        }
    }
}

fn is_cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

/// Sleep for `delay`, waking early if shutdown is signalled.
async fn pause(delay: Duration, shutdown: Option<&watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            let mut rx = rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = rx.changed() => {}
            }
        }
        None => tokio::time::sleep(delay).await,
    }
}

fn iso(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
