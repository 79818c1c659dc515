use crate::core::bar::normalize_tickers;
use crate::pipeline::tiered::TieredPriceStore;
use crate::store::feed::{ChangeFeed, SubscriptionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct ActiveSubscription {
    id: SubscriptionId,
    channel: String,
    task: JoinHandle<()>,
}

/// Turns bar inserts into tier-1 invalidations plus a consumer callback.
///
/// One notifier holds at most one subscription; subscribing again replaces it.
/// The subscription is torn down on drop.
pub struct UpdateNotifier {
    consumer: String,
    feed: ChangeFeed,
    prices: Arc<TieredPriceStore>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl UpdateNotifier {
    pub fn new(consumer: &str, feed: ChangeFeed, prices: Arc<TieredPriceStore>) -> Self {
        Self {
            consumer: consumer.to_string(),
            feed,
            prices,
            active: Mutex::new(None),
        }
    }

    /// `"{consumer}:bars:{A,B,...}"` over the full sorted ticker set.
    pub fn channel_name<S: AsRef<str>>(consumer: &str, tickers: &[S]) -> String {
        let mut tickers = normalize_tickers(tickers);
        tickers.sort();
        format!("{}:bars:{}", consumer, tickers.join(","))
    }

    /// Watches `tickers`. For every insert the ticker's cached series are purged
    /// and then `callback` is invoked with the ticker. Returns the channel name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<S, F>(&self, tickers: &[S], callback: F) -> String
    where
        S: AsRef<str>,
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.unsubscribe();

        let channel = Self::channel_name(&self.consumer, tickers);
        let watched: HashSet<String> = normalize_tickers(tickers).into_iter().collect();
        let (id, mut rx) = self.feed.subscribe(&channel, watched);
        let prices = Arc::clone(&self.prices);
        let task_channel = channel.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let purged = prices.invalidate_ticker(&event.ticker).await;
                debug!(
                    "{}: {} new rows for {} up to {}, purged {} cached series",
                    task_channel, event.rows, event.ticker, event.latest_date, purged
                );
                callback(&event.ticker);
            }
        });

        info!("Subscribed to {}", channel);
        *self.lock_active() = Some(ActiveSubscription {
            id,
            channel: channel.clone(),
            task,
        });
        channel
    }

    /// Tears down the current subscription, if any.
    pub fn unsubscribe(&self) {
        if let Some(active) = self.lock_active().take() {
            self.feed.unsubscribe(active.id);
            active.task.abort();
            info!("Unsubscribed from {}", active.channel);
        }
    }

    pub fn channel(&self) -> Option<String> {
        self.lock_active().as_ref().map(|a| a.channel.clone())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSubscription>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for UpdateNotifier {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::test_support::{bar, date, weekday_bars};
    use crate::core::bar::{DataSource, DateRange};
    use crate::core::store::BarStore;
    use crate::pipeline::tiered::FetchOptions;
    use crate::pipeline::tiered::test_support::{MockBarProvider, fast_config};
    use crate::store::disk::DiskStore;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn setup(dir: &std::path::Path) -> (Arc<DiskStore>, Arc<TieredPriceStore>) {
        let store = Arc::new(DiskStore::open(dir).unwrap());
        let provider = MockBarProvider::default()
            .with("XXX", weekday_bars("XXX", "2024-01-01", 20, |i| 10.0 + i as f64))
            .with("YYY", weekday_bars("YYY", "2024-01-01", 20, |i| 20.0 + i as f64));
        let prices = TieredPriceStore::new(store.clone(), Arc::new(provider), fast_config());
        (store, Arc::new(prices))
    }

    #[test]
    fn test_channel_name_uses_full_sorted_set() {
        let name = UpdateNotifier::channel_name("dashboard", &["msft", "AAPL", "GOOG", "AMZN", "NVDA", "META"]);
        assert_eq!(name, "dashboard:bars:AAPL,AMZN,GOOG,META,MSFT,NVDA");
        assert_eq!(
            UpdateNotifier::channel_name("dashboard", &["B", "A"]),
            UpdateNotifier::channel_name("dashboard", &["A", "B"])
        );
    }

    #[tokio::test]
    async fn test_insert_invalidates_only_that_ticker() {
        let dir = tempdir().unwrap();
        let (store, prices) = setup(dir.path());
        let options = FetchOptions::new(DateRange::new(date("2024-01-01"), date("2024-01-31")).unwrap());

        prices.get_tickers_data(&["XXX", "YYY"], &options).await;
        prices.flush_write_back().await;
        let cached = prices.get_tickers_data(&["XXX", "YYY"], &options).await;
        assert_eq!(cached["XXX"].source, DataSource::Cache);

        let notifier = UpdateNotifier::new("test", store.feed(), Arc::clone(&prices));
        let (tx, mut rx) = mpsc::unbounded_channel();
        notifier.subscribe(&["XXX", "YYY"], move |ticker| {
            let _ = tx.send(ticker.to_string());
        });

        store.put_bars(&[bar("XXX", "2024-01-29", 31.0)]).await.unwrap();
        let updated = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(updated.as_deref(), Some("XXX"));

        let data = prices.get_tickers_data(&["XXX", "YYY"], &options).await;
        assert_ne!(data["XXX"].source, DataSource::Cache);
        assert_eq!(data["XXX"].bars.last().unwrap().date, date("2024-01-29"));
        assert_eq!(data["YYY"].source, DataSource::Cache);
    }

    #[tokio::test]
    async fn test_unwatched_tickers_are_not_delivered() {
        let dir = tempdir().unwrap();
        let (store, prices) = setup(dir.path());
        let notifier = UpdateNotifier::new("test", store.feed(), prices);
        let (tx, mut rx) = mpsc::unbounded_channel();
        notifier.subscribe(&["XXX"], move |ticker| {
            let _ = tx.send(ticker.to_string());
        });

        store.put_bars(&[bar("ZZZ", "2024-01-02", 1.0)]).await.unwrap();
        store.put_bars(&[bar("XXX", "2024-01-02", 1.0)]).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("XXX"));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_and_drop_tears_down() {
        let dir = tempdir().unwrap();
        let (store, prices) = setup(dir.path());
        let feed = store.feed();
        let notifier = UpdateNotifier::new("test", feed.clone(), prices);

        notifier.subscribe(&["XXX"], |_| {});
        let channel = notifier.subscribe(&["XXX", "YYY"], |_| {});
        assert_eq!(channel, "test:bars:XXX,YYY");
        assert_eq!(notifier.channel().as_deref(), Some("test:bars:XXX,YYY"));
        assert_eq!(feed.channel_count(), 1);

        notifier.unsubscribe();
        assert_eq!(notifier.channel(), None);
        assert_eq!(feed.channel_count(), 0);

        notifier.subscribe(&["XXX"], |_| {});
        drop(notifier);
        assert_eq!(feed.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_notifiers_sharing_a_channel_name_are_independent() {
        let dir = tempdir().unwrap();
        let (store, prices) = setup(dir.path());
        let feed = store.feed();
        let first = UpdateNotifier::new("test", feed.clone(), Arc::clone(&prices));
        let second = UpdateNotifier::new("test", feed.clone(), prices);

        let (tx, mut rx) = mpsc::unbounded_channel();
        first.subscribe(&["XXX"], |_| {});
        second.subscribe(&["XXX"], move |ticker| {
            let _ = tx.send(ticker.to_string());
        });
        assert_eq!(first.channel(), second.channel());
        assert_eq!(feed.channel_count(), 2);

        drop(first);
        assert_eq!(feed.channel_count(), 1);
        store.put_bars(&[bar("XXX", "2024-01-02", 1.0)]).await.unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(delivered.as_deref(), Some("XXX"));
    }
}
