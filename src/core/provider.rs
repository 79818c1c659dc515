//! Remote data abstractions: bar history, latest quotes and server-side
//! portfolio aggregation.

use crate::core::bar::{Bar, DateRange, Quote};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

/// Daily bar history for a single ticker.
#[async_trait]
pub trait BarProvider: Send + Sync {
    async fn fetch_bars(&self, ticker: &str, range: &DateRange) -> Result<Vec<Bar>>;
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, ticker: &str) -> Result<Quote>;

    /// Batch variant. Tickers missing from the result had no quote. The default
    /// falls back to one call per ticker.
    async fn fetch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>> {
        let mut quotes = HashMap::new();
        for ticker in tickers {
            match self.fetch_quote(ticker).await {
                Ok(quote) => {
                    quotes.insert(ticker.clone(), quote);
                }
                Err(e) => debug!("Quote fetch failed for {}: {}", ticker, e),
            }
        }
        Ok(quotes)
    }
}

/// Server-side computation of a weighted portfolio return series.
#[async_trait]
pub trait AggregationProvider: Send + Sync {
    async fn portfolio_returns(
        &self,
        tickers: &[String],
        weights: &[f64],
        range: &DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>>;
}
