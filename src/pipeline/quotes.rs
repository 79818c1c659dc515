use crate::core::bar::{Quote, normalize_ticker, normalize_tickers};
use crate::core::cache::Cache;
use crate::core::error::PipelineError;
use crate::core::provider::QuoteProvider;
use crate::store::memory::MemoryCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Short-lived latest-quote cache, independent of the bar tiers.
pub struct QuoteCache {
    provider: Arc<dyn QuoteProvider>,
    cache: MemoryCache<String, Quote>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: MemoryCache::new(),
            ttl,
        }
    }

    pub async fn get_quote(&self, ticker: &str) -> Option<Quote> {
        let ticker = normalize_ticker(ticker);
        if let Some(quote) = self.cache.get(&ticker).await {
            return Some(quote);
        }
        match self.provider.fetch_quote(&ticker).await {
            Ok(quote) => {
                self.cache.put(ticker, quote.clone(), Some(self.ttl)).await;
                Some(quote)
            }
            Err(e) => {
                warn!("{}", PipelineError::transient(&ticker, e));
                None
            }
        }
    }

    /// Cached quotes plus one batch fetch for the rest. Tickers without a quote
    /// are left out.
    pub async fn get_quotes<S: AsRef<str> + Sync>(&self, tickers: &[S]) -> HashMap<String, Quote> {
        let mut quotes = HashMap::new();
        let mut missing = Vec::new();
        for ticker in normalize_tickers(tickers) {
            match self.cache.get(&ticker).await {
                Some(quote) => {
                    quotes.insert(ticker, quote);
                }
                None => missing.push(ticker),
            }
        }
        if missing.is_empty() {
            return quotes;
        }

        debug!("Fetching {} quotes", missing.len());
        match self.provider.fetch_quotes(&missing).await {
            Ok(fetched) => {
                for ticker in missing {
                    if let Some(quote) = fetched.get(&ticker) {
                        self.cache.put(ticker.clone(), quote.clone(), Some(self.ttl)).await;
                        quotes.insert(ticker, quote.clone());
                    } else {
                        debug!("No quote returned for {}", ticker);
                    }
                }
            }
            Err(e) => warn!("Batch quote fetch failed: {}", e),
        }
        quotes
    }

    /// Drops one ticker's quote, or every quote for `None`.
    pub async fn clear(&self, ticker: Option<&str>) {
        match ticker {
            Some(ticker) => self.cache.remove(&normalize_ticker(ticker)).await,
            None => self.cache.clear().await,
        }
    }
}
