use crate::core::analytics::{blend_returns, normalize_weights, to_return_series};
use crate::core::bar::{Allocation, DateRange, PortfolioReturnSeries, WeightUnit, normalize_ticker};
use crate::core::error::PipelineError;
use crate::core::provider::AggregationProvider;
use crate::pipeline::tiered::{FetchOptions, TieredPriceStore};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Blends per-ticker daily returns into one weighted portfolio series.
///
/// A configured aggregation provider is tried first; its failure or an empty
/// answer falls back to blending series loaded through the tiered store.
pub struct ReturnSeriesBuilder {
    prices: Arc<TieredPriceStore>,
    aggregator: Option<Arc<dyn AggregationProvider>>,
    notional_base: f64,
}

impl ReturnSeriesBuilder {
    pub fn new(prices: Arc<TieredPriceStore>, notional_base: f64) -> Self {
        Self {
            prices,
            aggregator: None,
            notional_base,
        }
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn AggregationProvider>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    #[instrument(skip(self, allocations, range), fields(range = %range, count = allocations.len()))]
    pub async fn build(&self, allocations: &[Allocation], range: &DateRange) -> PortfolioReturnSeries {
        let (tickers, raw_weights, unit) = merge_allocations(allocations);
        if tickers.is_empty() {
            return to_return_series(Vec::new(), self.notional_base);
        }
        let weights = normalize_weights(&raw_weights, unit);
        debug!("Normalized weights: {:?}", weights);

        if let Some(aggregator) = &self.aggregator {
            match self.aggregate(aggregator.as_ref(), &tickers, &weights, range).await {
                Ok(rows) => {
                    info!("Using {} aggregated rows for {}", rows.len(), range);
                    return to_return_series(rows, self.notional_base);
                }
                Err(e) => warn!("{}, blending locally", e),
            }
        }

        let rows = self.blend_locally(&tickers, &weights, range).await;
        to_return_series(rows, self.notional_base)
    }

    async fn aggregate(
        &self,
        aggregator: &dyn AggregationProvider,
        tickers: &[String],
        weights: &[f64],
        range: &DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>, PipelineError> {
        let rows: Vec<(NaiveDate, f64)> = aggregator
            .portfolio_returns(tickers, weights, range)
            .await
            .map_err(|e| PipelineError::AggregationUnavailable(e.to_string()))?
            .into_iter()
            .filter(|(date, r)| range.contains(*date) && r.is_finite())
            .collect();
        if rows.is_empty() {
            return Err(PipelineError::AggregationUnavailable(
                "no rows returned".to_string(),
            ));
        }
        Ok(rows)
    }

    async fn blend_locally(
        &self,
        tickers: &[String],
        weights: &[f64],
        range: &DateRange,
    ) -> Vec<(NaiveDate, f64)> {
        let data = self
            .prices
            .get_tickers_data(tickers, &FetchOptions::new(*range))
            .await;

        let per_ticker: Vec<Vec<(NaiveDate, f64)>> = tickers
            .iter()
            .map(|ticker| match data.get(ticker) {
                Some(series) => series.returns(),
                None => {
                    warn!("No series for {}, no date can be blended", ticker);
                    Vec::new()
                }
            })
            .collect();
        let inputs: Vec<(&[(NaiveDate, f64)], f64)> = per_ticker
            .iter()
            .map(Vec::as_slice)
            .zip(weights.iter().copied())
            .collect();
        blend_returns(&inputs)
    }
}

/// Folds duplicate tickers together by summing their weights, keeping first-seen
/// order. The unit is kept only when every allocation declares the same one.
fn merge_allocations(allocations: &[Allocation]) -> (Vec<String>, Vec<f64>, Option<WeightUnit>) {
    let mut tickers: Vec<String> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();
    for allocation in allocations {
        let ticker = normalize_ticker(&allocation.ticker);
        if ticker.is_empty() {
            continue;
        }
        match tickers.iter().position(|t| *t == ticker) {
            Some(i) => weights[i] += allocation.weight,
            None => {
                tickers.push(ticker);
                weights.push(allocation.weight);
            }
        }
    }

    let unit = match allocations.first().and_then(|a| a.unit) {
        Some(first) if allocations.iter().all(|a| a.unit == Some(first)) => Some(first),
        _ => None,
    };
    (tickers, weights, unit)
}
