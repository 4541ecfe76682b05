//! Best-effort usage analytics.
//!
//! The request path hands a [`UsageEvent`] to an [`AnalyticsRecorder`] and moves on:
//! recording never blocks and never fails the request.
//!
//! ```text
//! Analyzer → ChannelRecorder (try_send) → mpsc → AnalyticsBatcher
//!                                                      ↓
//!                                        [block for one, drain up to batch_size]
//!                                                      ↓
//!                                     AnalyticsStore::write_batch (retried with backoff)
//!                                       - raw usage_events
//!                                       - hourly / daily / host rollups
//!                                       - daily distributions
//! ```

pub mod batcher;
pub mod postgres;
pub mod rollup;
pub mod store;

pub use batcher::AnalyticsBatcher;
pub use postgres::PostgresAnalyticsStore;
pub use store::{AnalyticsStore, InMemoryAnalyticsStore};

use crate::api::models::analysis::{AnalysisResult, SentimentLabel};
use crate::config::AnalyticsConfig;
use crate::db::errors::DbError;
use crate::pricing::TokenUsage;
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for AnalyticsError {
    fn from(err: sqlx::Error) -> Self {
        AnalyticsError::Database(err.into())
    }
}

/// One served analysis, cached or fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub host: String,
    /// Normalized request text, truncated before it is queued
    pub text: String,
    pub model: String,
    pub cached: bool,
    /// Upstream cost of the analysis. For cache hits this is the cost that was saved.
    pub cost: Decimal,
    /// Billed price of the analysis. For cache hits this is the price that was saved.
    pub price: Decimal,
    pub usage: TokenUsage,
    pub language: String,
    pub sentiment: SentimentLabel,
    pub sentiment_score: f64,
    pub intents: Vec<String>,
    pub profanity_score: f64,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    pub fn from_result(host: &str, text: &str, result: &AnalysisResult, cached: bool, response_time: Duration) -> Self {
        Self {
            host: host.to_string(),
            text: text.to_string(),
            model: result.request_details.model.clone(),
            cached,
            cost: result.cost.total_cost,
            price: result.cost.total_price,
            usage: result.usage,
            language: result.language.clone(),
            sentiment: result.sentiment.sentiment,
            sentiment_score: result.sentiment.score,
            intents: result.intents.clone(),
            profanity_score: result.profanity.score,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

/// Accepts usage events without blocking the caller.
pub trait AnalyticsRecorder: Send + Sync {
    fn record(&self, event: UsageEvent);
}

/// Queues events for the [`AnalyticsBatcher`]. A full or closed queue drops the event.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    sender: mpsc::Sender<UsageEvent>,
    text_prefix_chars: usize,
}

impl ChannelRecorder {
    pub fn new(sender: mpsc::Sender<UsageEvent>, text_prefix_chars: usize) -> Self {
        Self { sender, text_prefix_chars }
    }
}

impl AnalyticsRecorder for ChannelRecorder {
    fn record(&self, mut event: UsageEvent) {
        if let Some((idx, _)) = event.text.char_indices().nth(self.text_prefix_chars) {
            event.text.truncate(idx);
        }

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(host = %event.host, "Analytics queue full, dropping usage event");
                counter!("sentimeter_analytics_dropped_total", "reason" => "full").increment(1);
            }
            Err(TrySendError::Closed(event)) => {
                warn!(host = %event.host, "Analytics queue closed, dropping usage event");
                counter!("sentimeter_analytics_dropped_total", "reason" => "closed").increment(1);
            }
        }
    }
}

/// Discards every event. Used when analytics are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl AnalyticsRecorder for NullRecorder {
    fn record(&self, _event: UsageEvent) {}
}

/// Build the recorder selected by configuration, plus the batcher to spawn when
/// analytics are enabled.
pub fn create_recorder(
    config: &AnalyticsConfig,
    store: Arc<dyn AnalyticsStore>,
) -> (Arc<dyn AnalyticsRecorder>, Option<AnalyticsBatcher>) {
    if !config.enabled {
        info!("Analytics disabled");
        return (Arc::new(NullRecorder), None);
    }

    let (batcher, sender) = AnalyticsBatcher::new(store, config);
    let recorder = ChannelRecorder::new(sender, config.text_prefix_chars);
    (Arc::new(recorder), Some(batcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_event;

    #[tokio::test]
    async fn test_channel_recorder_truncates_text() {
        let (sender, mut receiver) = mpsc::channel(4);
        let recorder = ChannelRecorder::new(sender, 5);

        let mut event = sample_event("a.com", false);
        event.text = "héllo wörld".to_string();
        recorder.record(event);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.text, "héllo");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (sender, mut receiver) = mpsc::channel(1);
        let recorder = ChannelRecorder::new(sender, 100);

        recorder.record(sample_event("a.com", false));
        recorder.record(sample_event("b.com", false));

        assert_eq!(receiver.recv().await.unwrap().host, "a.com");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_is_ignored() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        ChannelRecorder::new(sender, 100).record(sample_event("a.com", true));
    }
}
