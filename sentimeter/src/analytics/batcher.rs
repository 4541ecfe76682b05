//! Background writer that batches usage events into an [`AnalyticsStore`].
//!
//! Write-through batching: the batcher blocks until one event arrives, drains whatever
//! else is already queued (up to `batch_size`) and writes immediately. At low load
//! every event is written on its own; under load events queue up while a write is in
//! flight and the next batch grows accordingly.

use super::{AnalyticsStore, UsageEvent};
use crate::config::AnalyticsConfig;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub struct AnalyticsBatcher {
    store: Arc<dyn AnalyticsStore>,
    receiver: mpsc::Receiver<UsageEvent>,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl AnalyticsBatcher {
    /// Creates a batcher and the sender feeding it.
    pub fn new(store: Arc<dyn AnalyticsStore>, config: &AnalyticsConfig) -> (Self, mpsc::Sender<UsageEvent>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));

        let batcher = Self {
            store,
            receiver,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        };

        (batcher, sender)
    }

    /// Runs the write loop until shutdown or until every sender is dropped, then
    /// flushes whatever is still queued.
    pub async fn run(mut self, shutdown_token: CancellationToken) {
        info!(max_batch_size = self.batch_size, "Analytics batcher started");

        let mut buffer: Vec<UsageEvent> = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    info!("Shutdown signal received, draining analytics queue");
                    self.receiver.close();
                    while let Some(event) = self.receiver.recv().await {
                        buffer.push(event);
                        if buffer.len() >= self.batch_size {
                            self.flush_batch(&mut buffer).await;
                        }
                    }
                    self.flush_batch(&mut buffer).await;
                    info!("Analytics batcher shutdown complete");
                    break;
                }

                maybe_event = self.receiver.recv() => {
                    match maybe_event {
                        Some(event) => buffer.push(event),
                        None => {
                            info!("Analytics queue closed, shutting down batcher");
                            self.flush_batch(&mut buffer).await;
                            break;
                        }
                    }
                }
            }

            while buffer.len() < self.batch_size {
                match self.receiver.try_recv() {
                    Ok(event) => buffer.push(event),
                    Err(_) => break,
                }
            }

            self.flush_batch(&mut buffer).await;
        }
    }

    /// Writes the buffer, retrying with exponential backoff. A batch that still fails
    /// after `max_retries` retries is dropped.
    async fn flush_batch(&self, buffer: &mut Vec<UsageEvent>) {
        if buffer.is_empty() {
            return;
        }

        let batch_size = buffer.len();
        let span = info_span!("flush_analytics_batch", batch_size = batch_size);

        async {
            let start = std::time::Instant::now();
            let mut attempt: u32 = 0;

            loop {
                match self.store.write_batch(buffer.as_slice()).await {
                    Ok(()) => {
                        let duration = start.elapsed();
                        histogram!("sentimeter_analytics_batch_duration_seconds").record(duration.as_secs_f64());
                        counter!("sentimeter_analytics_batched_events_total").increment(batch_size as u64);
                        debug!(
                            batch_size = batch_size,
                            attempts = attempt + 1,
                            duration_ms = duration.as_millis() as u64,
                            "Flushed analytics batch"
                        );
                        break;
                    }
                    Err(e) if attempt < self.max_retries => {
                        let delay = self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt));
                        warn!(error = %e, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Analytics batch write failed, retrying");
                        counter!("sentimeter_analytics_batch_retries_total").increment(1);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        error!(error = %e, batch_size = batch_size, "Failed to write analytics batch, dropping it");
                        counter!("sentimeter_analytics_batch_errors_total").increment(1);
                        break;
                    }
                }
            }

            buffer.clear();
        }
        .instrument(span)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsError, InMemoryAnalyticsStore};
    use crate::db::errors::DbError;
    use crate::test_utils::sample_event;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn config(batch_size: usize, max_retries: u32) -> AnalyticsConfig {
        AnalyticsConfig {
            batch_size,
            max_retries,
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    /// Fails the first `failures` writes, then records batch sizes.
    #[derive(Default)]
    struct FlakyStore {
        failures: Mutex<u32>,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AnalyticsStore for FlakyStore {
        async fn write_batch(&self, events: &[UsageEvent]) -> Result<(), AnalyticsError> {
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(DbError::Other(anyhow::anyhow!("connection reset")).into());
                }
            }
            self.batches.lock().push(events.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drains_on_shutdown() {
        let store = Arc::new(InMemoryAnalyticsStore::new());
        let (batcher, sender) = AnalyticsBatcher::new(store.clone(), &config(100, 0));

        for _ in 0..5 {
            sender.send(sample_event("a.com", false)).await.unwrap();
        }

        let token = CancellationToken::new();
        token.cancel();
        batcher.run(token).await;

        assert_eq!(store.events().len(), 5);
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let store = Arc::new(FlakyStore::default());
        let (batcher, sender) = AnalyticsBatcher::new(store.clone(), &config(2, 0));

        for _ in 0..5 {
            sender.send(sample_event("a.com", false)).await.unwrap();
        }
        drop(sender);
        batcher.run(CancellationToken::new()).await;

        let batches = store.batches.lock().clone();
        assert_eq!(batches.iter().sum::<usize>(), 5);
        assert!(batches.iter().all(|&size| size <= 2));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let store = Arc::new(FlakyStore {
            failures: Mutex::new(2),
            ..Default::default()
        });
        let (batcher, sender) = AnalyticsBatcher::new(store.clone(), &config(10, 3));

        sender.send(sample_event("a.com", false)).await.unwrap();
        drop(sender);
        batcher.run(CancellationToken::new()).await;

        assert_eq!(*store.batches.lock(), vec![1]);
    }

    #[test_log::test(tokio::test)]
    async fn test_gives_up_after_max_retries() {
        let store = Arc::new(FlakyStore {
            failures: Mutex::new(10),
            ..Default::default()
        });
        let (batcher, sender) = AnalyticsBatcher::new(store.clone(), &config(10, 2));

        sender.send(sample_event("a.com", false)).await.unwrap();
        sender.send(sample_event("a.com", false)).await.unwrap();
        drop(sender);
        batcher.run(CancellationToken::new()).await;

        assert!(store.batches.lock().is_empty());
        // One initial attempt plus two retries
        assert_eq!(*store.failures.lock(), 7);
    }
}
