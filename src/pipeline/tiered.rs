//! Three-tier bar resolution: in-process cache, persistent store, remote provider.

use crate::core::bar::{Bar, DataSource, DateRange, TickerSeries, normalize_ticker, normalize_tickers, sanitize_bars};
use crate::core::cache::Cache;
use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::provider::BarProvider;
use crate::core::store::BarStore;
use crate::pipeline::writeback::{WriteBackFailure, WriteBackQueue};
use crate::store::memory::MemoryCache;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};

/// Tier-1 cache key: one entry per exact (ticker, range) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub ticker: String,
    pub range: DateRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub range: DateRange,
    /// Skip the in-process cache. The persistent store is still consulted.
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            force_refresh: false,
        }
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Resolves bar series for ticker sets while touching the most expensive tier
/// as little as possible.
///
/// Lookups go memory → store → provider. Store results below the completeness
/// threshold count as missing. Provider fetches run one ticker at a time with
/// a fixed delay between calls, land in memory immediately and are queued for
/// write-back into the store. A ticker that cannot be resolved is left out of
/// the result; a request never fails as a whole.
///
/// Every ticker carries an invalidation generation. A store or provider read
/// only populates memory if no invalidation for its ticker happened while it
/// was in flight.
pub struct TieredPriceStore {
    cache: MemoryCache<SeriesKey, TickerSeries>,
    generations: Mutex<HashMap<String, u64>>,
    store: Arc<dyn BarStore>,
    provider: Arc<dyn BarProvider>,
    config: PipelineConfig,
    write_back: WriteBackQueue,
}

impl TieredPriceStore {
    /// Must be called from within a tokio runtime (starts the write-back worker).
    pub fn new(
        store: Arc<dyn BarStore>,
        provider: Arc<dyn BarProvider>,
        config: PipelineConfig,
    ) -> Self {
        let write_back = WriteBackQueue::spawn(Arc::clone(&store), config.write_back_capacity);
        Self {
            cache: MemoryCache::new(),
            generations: Mutex::new(HashMap::new()),
            store,
            provider,
            config,
            write_back,
        }
    }

    #[instrument(skip(self, tickers), fields(range = %options.range, force = options.force_refresh))]
    pub async fn get_tickers_data<S: AsRef<str> + Sync>(
        &self,
        tickers: &[S],
        options: &FetchOptions,
    ) -> HashMap<String, TickerSeries> {
        let tickers = normalize_tickers(tickers);
        let mut result = HashMap::new();
        if tickers.is_empty() {
            return result;
        }
        let range = options.range;

        // Tier 1
        let mut missing = Vec::new();
        for ticker in tickers {
            if !options.force_refresh
                && let Some(series) = self.cache.get(&key(&ticker, &range)).await
            {
                result.insert(ticker, series.with_source(DataSource::Cache));
                continue;
            }
            missing.push(ticker);
        }
        let from_cache = result.len();

        // Tier 2
        if !missing.is_empty() {
            self.load_from_store(&missing, &range, &mut result).await;
        }
        let from_store = result.len() - from_cache;

        // Tier 3
        let remaining: Vec<String> = missing
            .into_iter()
            .filter(|t| !result.contains_key(t))
            .collect();
        let mut from_api = 0;
        for (i, ticker) in remaining.iter().enumerate() {
            if i > 0 && !self.config.api_delay().is_zero() {
                tokio::time::sleep(self.config.api_delay()).await;
            }
            let seen = self.generation(ticker).await;
            match self.fetch_from_api(ticker, &range).await {
                Ok(bars) => {
                    let series = TickerSeries::new(ticker, bars, DataSource::Api);
                    self.cache_if_current(&range, &series, seen).await;
                    self.write_back.enqueue(ticker, series.bars.clone());
                    result.insert(ticker.clone(), series);
                    from_api += 1;
                }
                Err(e) => warn!("{}", e),
            }
        }

        info!(
            "Resolved {} tickers for {}: cache={}, store={}, api={}, missing={}",
            result.len(),
            range,
            from_cache,
            from_store,
            from_api,
            remaining.len() - from_api
        );
        result
    }

    pub async fn get_ticker_data(&self, ticker: &str, options: &FetchOptions) -> Option<TickerSeries> {
        let ticker = normalize_ticker(ticker);
        self.get_tickers_data(std::slice::from_ref(&ticker), options)
            .await
            .remove(&ticker)
    }

    /// Drops every cached range for `ticker`. Returns the number of entries removed.
    ///
    /// Reads of `ticker` still in flight will not cache their result.
    pub async fn invalidate_ticker(&self, ticker: &str) -> usize {
        let ticker = normalize_ticker(ticker);
        let mut generations = self.generations.lock().await;
        *generations.entry(ticker.clone()).or_default() += 1;
        self.cache.remove_where(&|k: &SeriesKey| k.ticker == ticker).await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Waits for queued write-backs to reach the store.
    pub async fn flush_write_back(&self) {
        self.write_back.flush().await;
    }

    pub fn write_back_errors(&self) -> broadcast::Receiver<WriteBackFailure> {
        self.write_back.errors()
    }

    async fn load_from_store(
        &self,
        tickers: &[String],
        range: &DateRange,
        result: &mut HashMap<String, TickerSeries>,
    ) {
        let batch_size = self.config.store_batch_size.max(1);
        for chunk in tickers.chunks(batch_size) {
            let mut seen = HashMap::with_capacity(chunk.len());
            for ticker in chunk {
                seen.insert(ticker.as_str(), self.generation(ticker).await);
            }
            let mut rows = match self.store.get_bars(chunk, range).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("{}", PipelineError::Storage(e.to_string()));
                    continue;
                }
            };
            for ticker in chunk {
                let bars = rows.remove(ticker).unwrap_or_default();
                match self.accept_stored(ticker, bars, range) {
                    Ok(bars) => {
                        let series = TickerSeries::new(ticker, bars, DataSource::Store);
                        let generation = seen.get(ticker.as_str()).copied().unwrap_or_default();
                        self.cache_if_current(range, &series, generation).await;
                        result.insert(ticker.clone(), series);
                    }
                    Err(e) => debug!("{}", e),
                }
            }
        }
    }

    async fn generation(&self, ticker: &str) -> u64 {
        self.generations
            .lock()
            .await
            .get(ticker)
            .copied()
            .unwrap_or_default()
    }

    /// Caches `series` unless its ticker was invalidated since `seen` was read.
    /// Holds the generation lock across the put so a purge cannot slip between.
    async fn cache_if_current(&self, range: &DateRange, series: &TickerSeries, seen: u64) {
        let generations = self.generations.lock().await;
        if generations.get(&series.ticker).copied().unwrap_or_default() != seen {
            debug!("{} was invalidated during the read, not caching", series.ticker);
            return;
        }
        self.cache
            .put(key(&series.ticker, range), series.clone(), self.config.cache_ttl())
            .await;
    }

    fn accept_stored(
        &self,
        ticker: &str,
        bars: Vec<Bar>,
        range: &DateRange,
    ) -> Result<Vec<Bar>, PipelineError> {
        let bars = sanitize_bars(bars, range);
        let required = self.config.completeness_threshold(range);
        if bars.len() < required {
            return Err(PipelineError::IncompleteData {
                ticker: ticker.to_string(),
                found: bars.len(),
                required,
            });
        }
        Ok(bars)
    }

    async fn fetch_from_api(&self, ticker: &str, range: &DateRange) -> Result<Vec<Bar>, PipelineError> {
        let bars = self
            .provider
            .fetch_bars(ticker, range)
            .await
            .map_err(|e| PipelineError::transient(ticker, e))?;
        let bars = sanitize_bars(
            bars.into_iter()
                .map(|b| Bar {
                    ticker: ticker.to_string(),
                    ..b
                })
                .collect(),
            range,
        );
        if bars.is_empty() {
            return Err(PipelineError::transient(ticker, "no bars in range"));
        }
        Ok(bars)
    }
}

fn key(ticker: &str, range: &DateRange) -> SeriesKey {
    SeriesKey {
        ticker: ticker.to_string(),
        range: *range,
    }
}
