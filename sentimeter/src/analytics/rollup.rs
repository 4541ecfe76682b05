//! Additive usage counters and per-batch pre-aggregation.
//!
//! A batch of events is folded into one delta per rollup key before it is written, so
//! stores only ever add deltas to existing counters.

use super::UsageEvent;
use chrono::{NaiveDate, Timelike};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub requests: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: Decimal,
    pub cost_saved: Decimal,
    pub price: Decimal,
    pub price_saved: Decimal,
}

impl UsageCounters {
    /// Fold one event in. Hits count towards savings, misses towards spend.
    pub fn record(&mut self, event: &UsageEvent) {
        self.requests += 1;
        self.prompt_tokens += event.usage.prompt_tokens as i64;
        self.completion_tokens += event.usage.completion_tokens as i64;
        self.total_tokens += event.usage.total_tokens as i64;

        if event.cached {
            self.cache_hits += 1;
            self.cost_saved += event.cost;
            self.price_saved += event.price;
        } else {
            self.cache_misses += 1;
            self.cost += event.cost;
            self.price += event.price;
        }
    }

    pub fn merge(&mut self, other: &UsageCounters) {
        self.requests += other.requests;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cost += other.cost;
        self.cost_saved += other.cost_saved;
        self.price += other.price;
        self.price_saved += other.price_saved;
    }
}

/// Distribution dimensions counted per host and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Model,
    Language,
    Sentiment,
    Intent,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Model => "model",
            Dimension::Language => "language",
            Dimension::Sentiment => "sentiment",
            Dimension::Intent => "intent",
        }
    }
}

pub type HourlyKey = (String, NaiveDate, u32);
pub type DailyKey = (String, NaiveDate);
pub type DistributionKey = (String, NaiveDate, Dimension, String);

/// Deltas produced by one batch of events.
#[derive(Debug, Default)]
pub struct BatchRollup {
    pub hourly: HashMap<HourlyKey, UsageCounters>,
    pub daily: HashMap<DailyKey, UsageCounters>,
    pub hosts: HashMap<String, UsageCounters>,
    pub distributions: HashMap<DistributionKey, i64>,
}

impl BatchRollup {
    pub fn from_events(events: &[UsageEvent]) -> Self {
        let mut rollup = Self::default();

        for event in events {
            let date = event.timestamp.date_naive();
            let hour = event.timestamp.hour();

            rollup
                .hourly
                .entry((event.host.clone(), date, hour))
                .or_default()
                .record(event);
            rollup.daily.entry((event.host.clone(), date)).or_default().record(event);
            rollup.hosts.entry(event.host.clone()).or_default().record(event);

            let mut count = |dimension: Dimension, value: &str| {
                *rollup
                    .distributions
                    .entry((event.host.clone(), date, dimension, value.to_string()))
                    .or_default() += 1;
            };
            count(Dimension::Model, &event.model);
            count(Dimension::Language, &event.language);
            count(Dimension::Sentiment, event.sentiment.as_str());
            for intent in &event.intents {
                count(Dimension::Intent, intent);
            }
        }

        rollup
    }
}
