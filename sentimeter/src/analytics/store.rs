use super::rollup::{BatchRollup, DailyKey, Dimension, HourlyKey, UsageCounters};
use super::{AnalyticsError, UsageEvent};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Durable sink for batches of usage events.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Append the raw events and add their rollup deltas. Either all of a batch is
    /// applied or none of it is.
    async fn write_batch(&self, events: &[UsageEvent]) -> Result<(), AnalyticsError>;
}

/// Raw events kept by [`InMemoryAnalyticsStore::new`].
pub const DEFAULT_MAX_RAW_EVENTS: usize = 10_000;

/// Analytics kept in process memory, for development and tests.
///
/// Rollups are kept in full. The raw event log holds at most `max_raw_events` entries,
/// evicting the oldest first.
#[derive(Debug)]
pub struct InMemoryAnalyticsStore {
    max_raw_events: usize,
    events: RwLock<VecDeque<UsageEvent>>,
    hourly: DashMap<HourlyKey, UsageCounters>,
    daily: DashMap<DailyKey, UsageCounters>,
    hosts: DashMap<String, UsageCounters>,
    distributions: DashMap<(String, NaiveDate, Dimension, String), i64>,
}

impl Default for InMemoryAnalyticsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::with_max_raw_events(DEFAULT_MAX_RAW_EVENTS)
    }

    pub fn with_max_raw_events(max_raw_events: usize) -> Self {
        Self {
            max_raw_events,
            events: RwLock::new(VecDeque::new()),
            hourly: DashMap::new(),
            daily: DashMap::new(),
            hosts: DashMap::new(),
            distributions: DashMap::new(),
        }
    }

    /// Retained raw events, oldest first.
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn hourly(&self, host: &str, date: NaiveDate, hour: u32) -> Option<UsageCounters> {
        self.hourly.get(&(host.to_string(), date, hour)).map(|c| *c)
    }

    pub fn daily(&self, host: &str, date: NaiveDate) -> Option<UsageCounters> {
        self.daily.get(&(host.to_string(), date)).map(|c| *c)
    }

    pub fn host_totals(&self, host: &str) -> Option<UsageCounters> {
        self.hosts.get(host).map(|c| *c)
    }

    pub fn distribution(&self, host: &str, date: NaiveDate, dimension: Dimension, value: &str) -> i64 {
        self.distributions
            .get(&(host.to_string(), date, dimension, value.to_string()))
            .map(|c| *c)
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn write_batch(&self, events: &[UsageEvent]) -> Result<(), AnalyticsError> {
        let rollup = BatchRollup::from_events(events);

        {
            let mut log = self.events.write();
            let skip = events.len().saturating_sub(self.max_raw_events);
            log.extend(events[skip..].iter().cloned());
            let excess = log.len().saturating_sub(self.max_raw_events);
            log.drain(..excess);
        }
        for (key, delta) in rollup.hourly {
            self.hourly.entry(key).or_default().merge(&delta);
        }
        for (key, delta) in rollup.daily {
            self.daily.entry(key).or_default().merge(&delta);
        }
        for (key, delta) in rollup.hosts {
            self.hosts.entry(key).or_default().merge(&delta);
        }
        for (key, delta) in rollup.distributions {
            *self.distributions.entry(key).or_default() += delta;
        }

        Ok(())
    }
}
