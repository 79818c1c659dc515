//! Background sync: pull bars from the provider straight into the store.
//!
//! Inserts made here are announced on the store's change feed, which is what
//! drives [`UpdateNotifier`](crate::pipeline::notifier::UpdateNotifier).

use crate::core::bar::{DateRange, normalize_tickers, sanitize_bars};
use crate::core::error::PipelineError;
use crate::core::provider::BarProvider;
use crate::core::store::BarStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outcome of syncing one ticker.
#[derive(Debug)]
pub struct SyncOutcome {
    pub ticker: String,
    /// Bars received from the provider.
    pub fetched: usize,
    /// Rows that were new or changed in the store.
    pub written: usize,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().map(|o| o.written).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

pub struct SyncJob {
    provider: Arc<dyn BarProvider>,
    store: Arc<dyn BarStore>,
    api_delay: Duration,
}

impl SyncJob {
    pub fn new(provider: Arc<dyn BarProvider>, store: Arc<dyn BarStore>, api_delay: Duration) -> Self {
        Self {
            provider,
            store,
            api_delay,
        }
    }

    /// Fetches `tickers` one at a time, pausing between calls. A failing ticker
    /// is recorded in the report and does not stop the rest.
    #[instrument(skip(self, tickers, range, on_progress), fields(range = %range))]
    pub async fn run<S: AsRef<str> + Sync>(
        &self,
        tickers: &[S],
        range: &DateRange,
        on_progress: &(dyn Fn() + Send + Sync),
    ) -> SyncReport {
        let mut report = SyncReport::default();
        for (i, ticker) in normalize_tickers(tickers).into_iter().enumerate() {
            if i > 0 && !self.api_delay.is_zero() {
                tokio::time::sleep(self.api_delay).await;
            }
            let outcome = match self.sync_ticker(&ticker, range).await {
                Ok((fetched, written)) => SyncOutcome {
                    ticker,
                    fetched,
                    written,
                    error: None,
                },
                Err(e) => {
                    warn!("{}", e);
                    SyncOutcome {
                        ticker,
                        fetched: 0,
                        written: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.outcomes.push(outcome);
            on_progress();
        }
        info!(
            "Synced {} tickers: {} rows written, {} failed",
            report.outcomes.len(),
            report.written(),
            report.failed()
        );
        report
    }

    async fn sync_ticker(&self, ticker: &str, range: &DateRange) -> Result<(usize, usize), PipelineError> {
        let bars = self
            .provider
            .fetch_bars(ticker, range)
            .await
            .map_err(|e| PipelineError::transient(ticker, e))?;
        let bars = sanitize_bars(bars, range);
        let written = self
            .store
            .put_bars(&bars)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok((bars.len(), written))
    }
}
