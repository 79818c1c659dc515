//! Persistence abstractions for bars and memoized correlations.

use crate::core::bar::{Bar, CorrelationRow, DateRange};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait BarStore: Send + Sync {
    /// Bars for `tickers` within `range`, keyed by ticker. Tickers without rows
    /// may be absent from the map.
    async fn get_bars(
        &self,
        tickers: &[String],
        range: &DateRange,
    ) -> Result<HashMap<String, Vec<Bar>>>;

    /// Upserts bars and returns how many rows were new.
    async fn put_bars(&self, bars: &[Bar]) -> Result<usize>;
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Every persisted row whose pair lies within `tickers` for `period_days`.
    async fn get_correlations(
        &self,
        tickers: &[String],
        period_days: u32,
    ) -> Result<Vec<CorrelationRow>>;

    async fn put_correlations(&self, rows: &[CorrelationRow]) -> Result<()>;
}
