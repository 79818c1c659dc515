use crate::core::bar::{Bar, CorrelationRow, DateRange};
use crate::core::store::{BarStore, CorrelationStore};
use crate::store::feed::{BarInsert, ChangeFeed};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Upper bound on rows returned per ticker by one range query.
pub const MAX_ROWS_PER_TICKER: usize = 5000;

const BARS_PARTITION: &str = "bars";
const CORRELATIONS_PARTITION: &str = "correlations";

fn bar_key(ticker: &str, date: NaiveDate) -> String {
    // Fixed-width ISO dates keep lexicographic order chronological.
    format!("{ticker}|{}", date.format("%Y-%m-%d"))
}

fn pair_key(a: &str, b: &str, period_days: u32) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{first}|{second}|{period_days}")
}

/// fjall-backed bar and correlation tables.
///
/// Every committed bar write that adds or changes rows is announced on the
/// store's [`ChangeFeed`].
pub struct DiskStore {
    keyspace: Keyspace,
    bars: PartitionHandle,
    correlations: PartitionHandle,
    feed: ChangeFeed,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let bars = keyspace.open_partition(BARS_PARTITION, PartitionCreateOptions::default())?;
        let correlations =
            keyspace.open_partition(CORRELATIONS_PARTITION, PartitionCreateOptions::default())?;
        debug!("Opened store at {}", path.display());

        Ok(Self {
            keyspace,
            bars,
            correlations,
            feed: ChangeFeed::new(),
        })
    }

    pub fn feed(&self) -> ChangeFeed {
        self.feed.clone()
    }

    fn read_range(&self, ticker: &str, range: &DateRange) -> Result<Vec<Bar>> {
        let start = bar_key(ticker, range.start());
        let end = bar_key(ticker, range.end());
        let mut rows = Vec::new();
        for item in self.bars.range(start..=end).take(MAX_ROWS_PER_TICKER) {
            let (key, value) = item?;
            match serde_json::from_slice::<Bar>(&value) {
                Ok(bar) => rows.push(bar),
                Err(e) => warn!(
                    "Skipping unreadable bar row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl BarStore for DiskStore {
    async fn get_bars(
        &self,
        tickers: &[String],
        range: &DateRange,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let mut result = HashMap::new();
        for ticker in tickers {
            let rows = self.read_range(ticker, range)?;
            debug!("Store returned {} rows for {} in {}", rows.len(), ticker, range);
            if !rows.is_empty() {
                result.insert(ticker.clone(), rows);
            }
        }
        Ok(result)
    }

    async fn put_bars(&self, bars: &[Bar]) -> Result<usize> {
        let mut batch = self.keyspace.batch();
        let mut changed: BTreeMap<&str, (usize, NaiveDate)> = BTreeMap::new();

        for bar in bars {
            let key = bar_key(&bar.ticker, bar.date);
            let value = serde_json::to_vec(bar)?;
            let existing = self.bars.get(&key)?;
            if existing.as_deref() == Some(value.as_slice()) {
                continue;
            }
            batch.insert(&self.bars, key, value);
            let entry = changed.entry(&bar.ticker).or_insert((0, bar.date));
            entry.0 += 1;
            entry.1 = entry.1.max(bar.date);
        }

        if changed.is_empty() {
            return Ok(0);
        }
        batch.commit().context("Failed to commit bar batch")?;

        let mut total = 0;
        for (ticker, (rows, latest_date)) in changed {
            total += rows;
            self.feed.publish(&BarInsert {
                ticker: ticker.to_string(),
                rows,
                latest_date,
            });
        }
        debug!("Stored {} new or changed bars", total);
        Ok(total)
    }
}

#[async_trait]
impl CorrelationStore for DiskStore {
    async fn get_correlations(
        &self,
        tickers: &[String],
        period_days: u32,
    ) -> Result<Vec<CorrelationRow>> {
        let mut rows = Vec::new();
        for (i, a) in tickers.iter().enumerate() {
            for b in &tickers[i + 1..] {
                if let Some(value) = self.correlations.get(pair_key(a, b, period_days))? {
                    rows.push(serde_json::from_slice(&value)?);
                }
            }
        }
        Ok(rows)
    }

    async fn put_correlations(&self, rows: &[CorrelationRow]) -> Result<()> {
        let mut batch = self.keyspace.batch();
        for row in rows {
            batch.insert(
                &self.correlations,
                pair_key(&row.ticker_a, &row.ticker_b, row.period_days),
                serde_json::to_vec(row)?,
            );
        }
        batch
            .commit()
            .context("Failed to commit correlation batch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::test_support::{bar, date};
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(date(start), date(end)).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_bars_within_range() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();

        let written = store
            .put_bars(&[
                bar("AAPL", "2024-01-03", 11.0),
                bar("AAPL", "2024-01-02", 10.0),
                bar("AAPL", "2024-02-01", 12.0),
                bar("MSFT", "2024-01-02", 20.0),
            ])
            .await
            .unwrap();
        assert_eq!(written, 4);

        let result = store
            .get_bars(
                &["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()],
                &range("2024-01-01", "2024-01-31"),
            )
            .await
            .unwrap();

        let aapl: Vec<_> = result["AAPL"].iter().map(|b| b.date).collect();
        assert_eq!(aapl, vec![date("2024-01-02"), date("2024-01-03")]);
        assert_eq!(result["MSFT"].len(), 1);
        assert!(!result.contains_key("GOOG"));
    }

    #[tokio::test]
    async fn test_ticker_prefixes_do_not_overlap() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store
            .put_bars(&[bar("A", "2024-01-02", 1.0), bar("AB", "2024-01-02", 2.0)])
            .await
            .unwrap();

        let result = store
            .get_bars(&["A".to_string()], &range("2024-01-01", "2024-01-31"))
            .await
            .unwrap();
        assert_eq!(result["A"].len(), 1);
        assert_eq!(result["A"][0].close, 1.0);
    }

    #[tokio::test]
    async fn test_put_bars_announces_only_changes() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let (_, mut rx) = store
            .feed()
            .subscribe("test", HashSet::from(["AAPL".to_string()]));

        let bars = [bar("AAPL", "2024-01-02", 10.0), bar("AAPL", "2024-01-03", 11.0)];
        assert_eq!(store.put_bars(&bars).await.unwrap(), 2);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.ticker, "AAPL");
        assert_eq!(event.rows, 2);
        assert_eq!(event.latest_date, date("2024-01-03"));

        // Identical rows are not rewritten or announced
        assert_eq!(store.put_bars(&bars).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        // A corrected close is
        assert_eq!(
            store
                .put_bars(&[bar("AAPL", "2024-01-03", 11.5)])
                .await
                .unwrap(),
            1
        );
        assert_eq!(rx.recv().await.unwrap().rows, 1);
    }

    #[tokio::test]
    async fn test_correlations_are_keyed_by_unordered_pair() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store
            .put_correlations(&[CorrelationRow {
                ticker_a: "MSFT".to_string(),
                ticker_b: "AAPL".to_string(),
                period_days: 252,
                correlation: 0.7,
            }])
            .await
            .unwrap();

        let tickers = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()];
        let rows = store.get_correlations(&tickers, 252).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].correlation, 0.7);

        assert!(store.get_correlations(&tickers, 63).await.unwrap().is_empty());
    }
}
