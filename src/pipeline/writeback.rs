//! Bounded background write-back of provider bars into the persistent store.

use crate::core::bar::Bar;
use crate::core::store::BarStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

const ERROR_CHANNEL_CAPACITY: usize = 16;

enum WriteBackMessage {
    Bars { ticker: String, bars: Vec<Bar> },
    Flush(oneshot::Sender<()>),
}

/// A write-back that could not be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBackFailure {
    pub ticker: String,
    pub message: String,
}

/// Single-worker queue in front of a [`BarStore`].
///
/// Enqueueing never waits: when the queue is full the write-back is dropped and
/// logged. Failures are logged and published to [`WriteBackQueue::errors`]
/// subscribers. The worker drains remaining work and exits once the queue is
/// dropped.
pub struct WriteBackQueue {
    tx: mpsc::Sender<WriteBackMessage>,
    errors: broadcast::Sender<WriteBackFailure>,
}

impl WriteBackQueue {
    /// Starts the worker task. Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn BarStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        tokio::spawn(run_worker(store, rx, errors.clone()));
        Self { tx, errors }
    }

    /// Queues `bars` for persistence. Returns false if the write was dropped.
    pub fn enqueue(&self, ticker: &str, bars: Vec<Bar>) -> bool {
        let message = WriteBackMessage::Bars {
            ticker: ticker.to_string(),
            bars,
        };
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Write-back queue full, dropping bars for {}", ticker);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Write-back worker stopped, dropping bars for {}", ticker);
                false
            }
        }
    }

    /// Waits until everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteBackMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    pub fn errors(&self) -> broadcast::Receiver<WriteBackFailure> {
        self.errors.subscribe()
    }
}

async fn run_worker(
    store: Arc<dyn BarStore>,
    mut rx: mpsc::Receiver<WriteBackMessage>,
    errors: broadcast::Sender<WriteBackFailure>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            WriteBackMessage::Bars { ticker, bars } => match store.put_bars(&bars).await {
                Ok(written) => debug!("Wrote back {} bars for {}", written, ticker),
                Err(e) => {
                    warn!("Write-back failed for {}: {}", ticker, e);
                    let _ = errors.send(WriteBackFailure {
                        ticker,
                        message: e.to_string(),
                    });
                }
            },
            WriteBackMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Write-back worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::DateRange;
    use crate::core::bar::test_support::bar;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        written: Mutex<Vec<Bar>>,
        fail: bool,
    }

    #[async_trait]
    impl BarStore for RecordingStore {
        async fn get_bars(
            &self,
            _tickers: &[String],
            _range: &DateRange,
        ) -> Result<HashMap<String, Vec<Bar>>> {
            Ok(HashMap::new())
        }

        async fn put_bars(&self, bars: &[Bar]) -> Result<usize> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.written.lock().unwrap().extend_from_slice(bars);
            Ok(bars.len())
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_writes() {
        let store = Arc::new(RecordingStore::default());
        let queue = WriteBackQueue::spawn(store.clone(), 8);

        assert!(queue.enqueue("AAA", vec![bar("AAA", "2024-01-02", 1.0)]));
        assert!(queue.enqueue("BBB", vec![bar("BBB", "2024-01-02", 2.0)]));
        queue.flush().await;

        assert_eq!(store.written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_published() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let queue = WriteBackQueue::spawn(store, 8);
        let mut errors = queue.errors();

        queue.enqueue("AAA", vec![bar("AAA", "2024-01-02", 1.0)]);
        queue.flush().await;

        let failure = errors.recv().await.unwrap();
        assert_eq!(failure.ticker, "AAA");
        assert_eq!(failure.message, "disk full");
    }
}
