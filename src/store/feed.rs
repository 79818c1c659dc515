use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// New bar rows committed for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct BarInsert {
    pub ticker: String,
    pub rows: usize,
    pub latest_date: NaiveDate,
}

/// Handle for one open channel, required to close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    name: String,
    tickers: HashSet<String>,
    tx: mpsc::Sender<BarInsert>,
}

/// Named, ticker-filtered channels for bar insert events.
///
/// Filtering happens at publish time, so a subscriber only ever receives
/// inserts for the tickers it registered. Names are labels only: several
/// channels may share one. Clone-able via internal Arc.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    channels: Arc<RwLock<HashMap<SubscriptionId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel labelled `name` for `tickers`.
    pub fn subscribe(
        &self,
        name: &str,
        tickers: HashSet<String>,
    ) -> (SubscriptionId, mpsc::Receiver<BarInsert>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Subscriber {
            name: name.to_string(),
            tickers,
            tx,
        };
        self.channels
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, subscriber);
        debug!("Opened change channel {} as {:?}", name, id);
        (id, rx)
    }

    /// Closes the channel opened as `id`. Returns false if it was not open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        channels.remove(&id).is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Delivers `event` to every channel watching its ticker and returns the
    /// number of deliveries. Channels whose receiver is gone are dropped.
    pub fn publish(&self, event: &BarInsert) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let channels = self.channels.read().unwrap_or_else(|p| p.into_inner());
            for (id, subscriber) in channels.iter() {
                if !subscriber.tickers.contains(&event.ticker) {
                    continue;
                }
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Change channel {} is full, dropping {:?}", subscriber.name, event);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
            for id in closed {
                if let Some(subscriber) = channels.remove(&id) {
                    debug!("Pruned closed change channel: {}", subscriber.name);
                }
            }
        }
        delivered
    }
}
