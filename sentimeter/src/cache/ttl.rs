//! Expiration policy for cached analyses, chosen from the analysis content.

use crate::api::models::analysis::{AnalysisResult, SentimentLabel};
use std::time::Duration;

pub const NEWS_TTL: Duration = Duration::from_secs(60 * 60);
pub const REFERENCE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const STRONGLY_NEGATIVE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

const STRONGLY_NEGATIVE_THRESHOLD: f64 = -0.5;

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    default_ttl: Duration,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    /// First matching rule wins: time-sensitive intents, then reference material,
    /// then strongly negative sentiment, then the configured default.
    pub fn ttl_for(&self, result: &AnalysisResult) -> Duration {
        if result.has_intent("news") || result.has_intent("current_events") {
            NEWS_TTL
        } else if result.has_intent("factual") || result.has_intent("reference") {
            REFERENCE_TTL
        } else if result.sentiment.sentiment == SentimentLabel::Negative && result.sentiment.score < STRONGLY_NEGATIVE_THRESHOLD {
            STRONGLY_NEGATIVE_TTL
        } else {
            self.default_ttl
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
