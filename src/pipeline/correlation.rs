use crate::core::analytics::{align_returns, pearson};
use crate::core::bar::{CorrelationMatrix, CorrelationRow, DateRange, normalize_tickers};
use crate::core::error::PipelineError;
use crate::core::store::CorrelationStore;
use crate::pipeline::tiered::{FetchOptions, TieredPriceStore};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Pairwise correlation matrix over daily returns, backed by memoized pairs.
///
/// Persisted pairs fill the matrix first. The rest are computed from series
/// loaded through the tiered store and, when write-through is on, persisted.
pub struct CorrelationEngine {
    prices: Arc<TieredPriceStore>,
    store: Arc<dyn CorrelationStore>,
    period_days: u32,
    write_through: bool,
}

impl CorrelationEngine {
    pub fn new(
        prices: Arc<TieredPriceStore>,
        store: Arc<dyn CorrelationStore>,
        period_days: u32,
        write_through: bool,
    ) -> Self {
        Self {
            prices,
            store,
            period_days,
            write_through,
        }
    }

    pub fn period_days(&self) -> u32 {
        self.period_days
    }

    /// Matrix over the window ending today.
    pub async fn matrix<S: AsRef<str> + Sync>(&self, tickers: &[S]) -> CorrelationMatrix {
        self.matrix_as_of(tickers, Utc::now().date_naive()).await
    }

    #[instrument(skip(self, tickers), fields(period = self.period_days))]
    pub async fn matrix_as_of<S: AsRef<str> + Sync>(
        &self,
        tickers: &[S],
        end: NaiveDate,
    ) -> CorrelationMatrix {
        let tickers = normalize_tickers(tickers);
        let mut matrix = CorrelationMatrix::identity(tickers.clone());
        if tickers.len() < 2 {
            return matrix;
        }

        let n = tickers.len();
        let mut known = vec![vec![false; n]; n];
        match self.store.get_correlations(&tickers, self.period_days).await {
            Ok(rows) => {
                for row in rows {
                    let i = tickers.iter().position(|t| *t == row.ticker_a);
                    let j = tickers.iter().position(|t| *t == row.ticker_b);
                    if let (Some(i), Some(j)) = (i, j)
                        && i != j
                        && row.correlation.is_finite()
                    {
                        matrix.set_pair(i, j, row.correlation.clamp(-1.0, 1.0));
                        known[i][j] = true;
                        known[j][i] = true;
                    }
                }
            }
            Err(e) => warn!("{}", PipelineError::Storage(e.to_string())),
        }

        let missing: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .filter(|&(i, j)| !known[i][j])
            .collect();
        if missing.is_empty() {
            debug!("All {} pairs served from the store", n * (n - 1) / 2);
            return matrix;
        }

        // Each involved series is loaded once for all of its pairs
        let involved: BTreeSet<usize> = missing.iter().flat_map(|&(i, j)| [i, j]).collect();
        let involved: Vec<&String> = involved.into_iter().map(|i| &tickers[i]).collect();
        let range = DateRange::lookback(end, self.period_days);
        let data = self
            .prices
            .get_tickers_data(&involved, &FetchOptions::new(range))
            .await;
        let returns: Vec<Vec<(NaiveDate, f64)>> = tickers
            .iter()
            .map(|t| data.get(t).map(|s| s.returns()).unwrap_or_default())
            .collect();

        let mut computed = Vec::new();
        for (i, j) in missing {
            let (x, y) = align_returns(&returns[i], &returns[j]);
            let value = match pearson(&x, &y) {
                Ok(value) => {
                    if x.len() >= 2 {
                        computed.push(CorrelationRow {
                            ticker_a: tickers[i].clone(),
                            ticker_b: tickers[j].clone(),
                            period_days: self.period_days,
                            correlation: value,
                        });
                    }
                    value
                }
                Err(e) => {
                    debug!("{} / {}: {}", tickers[i], tickers[j], e);
                    0.0
                }
            };
            matrix.set_pair(i, j, value);
        }

        info!(
            "Computed {} correlation pairs over {}",
            computed.len(),
            range
        );
        if self.write_through
            && !computed.is_empty()
            && let Err(e) = self.store.put_correlations(&computed).await
        {
            warn!("{}", PipelineError::Storage(e.to_string()));
        }
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::test_support::{date, weekday_bars};
    use crate::pipeline::tiered::test_support::{MockBarProvider, MockBarStore, fast_config};
    use crate::store::disk::DiskStore;
    use tempfile::tempdir;

    const PERIOD: u32 = 40;

    fn as_of() -> NaiveDate {
        date("2024-03-01")
    }

    fn wave(i: usize) -> f64 {
        100.0 + i as f64 + [0.0, 3.0, -2.0, 1.0][i % 4]
    }

    fn provider() -> MockBarProvider {
        MockBarProvider::default()
            .with("AAA", weekday_bars("AAA", "2024-01-01", 40, wave))
            .with("BBB", weekday_bars("BBB", "2024-01-01", 40, |i| 2.0 * wave(i)))
            .with("CCC", weekday_bars("CCC", "2024-01-01", 40, |i| 300.0 - wave(i)))
            .with("FLAT", weekday_bars("FLAT", "2024-01-01", 40, |_| 10.0))
            .with("GROW", weekday_bars("GROW", "2024-01-01", 40, |i| 50.0 * 1.002_f64.powi(i as i32)))
    }

    fn engine(
        provider: Arc<MockBarProvider>,
        store: Arc<DiskStore>,
        write_through: bool,
    ) -> CorrelationEngine {
        let prices = TieredPriceStore::new(
            Arc::new(MockBarStore::default()),
            provider,
            fast_config(),
        );
        CorrelationEngine::new(Arc::new(prices), store, PERIOD, write_through)
    }

    #[tokio::test]
    async fn test_single_ticker_is_unit_matrix() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let provider = Arc::new(provider());
        let matrix = engine(provider.clone(), store, true)
            .matrix_as_of(&["AAA"], as_of())
            .await;

        assert_eq!(matrix.values, vec![vec![1.0]]);
        assert_eq!(provider.total(), 0);
    }

    #[tokio::test]
    async fn test_empty_request() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let empty: [&str; 0] = [];
        let matrix = engine(Arc::new(provider()), store, true)
            .matrix_as_of(&empty, as_of())
            .await;
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_matrix_is_symmetric_with_unit_diagonal() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let matrix = engine(Arc::new(provider()), store, false)
            .matrix_as_of(&["AAA", "BBB", "CCC"], as_of())
            .await;

        for i in 0..3 {
            assert_eq!(matrix.values[i][i], 1.0);
            for j in 0..3 {
                assert_eq!(matrix.values[i][j], matrix.values[j][i]);
                assert!((-1.0..=1.0).contains(&matrix.values[i][j]));
            }
        }
        // Scaled series move together, the mirrored one against
        assert!((matrix.get("AAA", "BBB").unwrap() - 1.0).abs() < 1e-9);
        assert!(matrix.get("AAA", "CCC").unwrap() < 0.0);
    }

    #[tokio::test]
    async fn test_persisted_pairs_skip_computation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        store
            .put_correlations(&[CorrelationRow {
                ticker_a: "BBB".to_string(),
                ticker_b: "AAA".to_string(),
                period_days: PERIOD,
                correlation: 0.42,
            }])
            .await
            .unwrap();
        let provider = Arc::new(provider());

        let matrix = engine(provider.clone(), store, true)
            .matrix_as_of(&["AAA", "BBB"], as_of())
            .await;
        assert_eq!(matrix.get("AAA", "BBB"), Some(0.42));
        assert_eq!(matrix.get("BBB", "AAA"), Some(0.42));
        assert_eq!(provider.total(), 0);
    }

    #[tokio::test]
    async fn test_computed_pairs_are_written_through() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let provider = Arc::new(provider());

        engine(provider.clone(), store.clone(), true)
            .matrix_as_of(&["AAA", "BBB"], as_of())
            .await;
        let rows = store
            .get_correlations(&["AAA".to_string(), "BBB".to_string()], PERIOD)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].correlation - 1.0).abs() < 1e-9);

        // A fresh engine now reads the pair instead of fetching
        let fresh = Arc::new(MockBarProvider::default());
        engine(fresh.clone(), store, true)
            .matrix_as_of(&["AAA", "BBB"], as_of())
            .await;
        assert_eq!(fresh.total(), 0);
    }

    #[tokio::test]
    async fn test_write_through_disabled() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        engine(Arc::new(provider()), store.clone(), false)
            .matrix_as_of(&["AAA", "BBB"], as_of())
            .await;
        let rows = store
            .get_correlations(&["AAA".to_string(), "BBB".to_string()], PERIOD)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_degenerate_and_missing_series_resolve_to_zero() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let matrix = engine(Arc::new(provider()), store.clone(), true)
            .matrix_as_of(&["AAA", "FLAT", "NOPE"], as_of())
            .await;

        assert_eq!(matrix.get("AAA", "FLAT"), Some(0.0));
        assert_eq!(matrix.get("AAA", "NOPE"), Some(0.0));
        assert_eq!(matrix.get("NOPE", "NOPE"), Some(1.0));
        assert!(matrix.values.iter().flatten().all(|v| v.is_finite()));

        // Nothing undefined is memoized
        let rows = store
            .get_correlations(
                &["AAA".to_string(), "FLAT".to_string(), "NOPE".to_string()],
                PERIOD,
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_constant_growth_is_not_persisted() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let matrix = engine(Arc::new(provider()), store.clone(), true)
            .matrix_as_of(&["AAA", "GROW"], as_of())
            .await;

        // Same return every session, so there is no variance to correlate
        assert_eq!(matrix.get("AAA", "GROW"), Some(0.0));
        let rows = store
            .get_correlations(&["AAA".to_string(), "GROW".to_string()], PERIOD)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
