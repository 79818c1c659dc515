//! Retrieval and analytics components wired over the stores and providers

pub mod correlation;
pub mod notifier;
pub mod quotes;
pub mod returns;
pub mod sync;
pub mod tiered;
pub mod writeback;

use crate::core::config::AppConfig;
use crate::providers::aggregation::HttpAggregationProvider;
use crate::providers::yahoo_finance::YahooFinanceProvider;
use crate::store::disk::DiskStore;
use crate::store::open_store;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub use correlation::CorrelationEngine;
pub use notifier::UpdateNotifier;
pub use quotes::QuoteCache;
pub use returns::ReturnSeriesBuilder;
pub use sync::{SyncJob, SyncReport};
pub use tiered::{FetchOptions, TieredPriceStore};

/// Every pipeline component, sharing one store and one tiered price cache.
pub struct Pipeline {
    store: Arc<DiskStore>,
    prices: Arc<TieredPriceStore>,
    returns: ReturnSeriesBuilder,
    correlations: CorrelationEngine,
    quotes: QuoteCache,
    sync: SyncJob,
}

impl Pipeline {
    /// Opens the configured store and builds the pipeline on it.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = open_store(config)?;
        Ok(Self::with_store(config, store))
    }

    /// Must be called from within a tokio runtime.
    pub fn with_store(config: &AppConfig, store: Arc<DiskStore>) -> Self {
        let pipeline = config.pipeline.clone();
        let yahoo = Arc::new(YahooFinanceProvider::new(config.yahoo_base_url()));

        let prices = Arc::new(TieredPriceStore::new(
            store.clone(),
            yahoo.clone(),
            pipeline.clone(),
        ));

        let mut returns = ReturnSeriesBuilder::new(Arc::clone(&prices), pipeline.notional_base);
        if let Some(aggregation) = &config.providers.aggregation {
            debug!("Using aggregation provider at {}", aggregation.base_url);
            returns = returns.with_aggregator(Arc::new(HttpAggregationProvider::new(
                &aggregation.base_url,
            )));
        }

        let correlations = CorrelationEngine::new(
            Arc::clone(&prices),
            store.clone(),
            pipeline.correlation_period_days,
            pipeline.correlation_write_through,
        );
        let quotes = QuoteCache::new(yahoo.clone(), pipeline.quote_ttl());
        let sync = SyncJob::new(yahoo, store.clone(), pipeline.api_delay());

        Self {
            store,
            prices,
            returns,
            correlations,
            quotes,
            sync,
        }
    }

    pub fn prices(&self) -> &Arc<TieredPriceStore> {
        &self.prices
    }

    pub fn returns(&self) -> &ReturnSeriesBuilder {
        &self.returns
    }

    pub fn correlations(&self) -> &CorrelationEngine {
        &self.correlations
    }

    pub fn quotes(&self) -> &QuoteCache {
        &self.quotes
    }

    pub fn sync_job(&self) -> &SyncJob {
        &self.sync
    }

    /// A notifier for `consumer` fed by this pipeline's store.
    pub fn notifier(&self, consumer: &str) -> UpdateNotifier {
        UpdateNotifier::new(consumer, self.store.feed(), Arc::clone(&self.prices))
    }

    /// Waits for pending write-backs. Call before exiting.
    pub async fn shutdown(&self) {
        self.prices.flush_write_back().await;
    }
}
