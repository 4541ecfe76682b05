//! Repository for usage analytics.
//!
//! Raw events are appended; rollup tables are only ever incremented, so concurrent
//! writers never lose updates.

use crate::analytics::{
    UsageEvent,
    rollup::{BatchRollup, UsageCounters},
};
use crate::db::errors::Result;
use sqlx::{Connection, PgConnection, Postgres, query_builder::QueryBuilder};
use tracing::instrument;

/// Postgres caps bind parameters per statement at 65535; each event binds 16.
const EVENTS_PER_INSERT: usize = 1000;

const COUNTER_COLUMNS: &str =
    "requests, cache_hits, cache_misses, prompt_tokens, completion_tokens, total_tokens, cost, cost_saved, price, price_saved";

const COUNTER_INCREMENTS: &str = "requests = t.requests + EXCLUDED.requests,
    cache_hits = t.cache_hits + EXCLUDED.cache_hits,
    cache_misses = t.cache_misses + EXCLUDED.cache_misses,
    prompt_tokens = t.prompt_tokens + EXCLUDED.prompt_tokens,
    completion_tokens = t.completion_tokens + EXCLUDED.completion_tokens,
    total_tokens = t.total_tokens + EXCLUDED.total_tokens,
    cost = t.cost + EXCLUDED.cost,
    cost_saved = t.cost_saved + EXCLUDED.cost_saved,
    price = t.price + EXCLUDED.price,
    price_saved = t.price_saved + EXCLUDED.price_saved";

fn push_counters(builder: &mut QueryBuilder<'_, Postgres>, counters: &UsageCounters) {
    builder
        .push_bind(counters.requests)
        .push(", ")
        .push_bind(counters.cache_hits)
        .push(", ")
        .push_bind(counters.cache_misses)
        .push(", ")
        .push_bind(counters.prompt_tokens)
        .push(", ")
        .push_bind(counters.completion_tokens)
        .push(", ")
        .push_bind(counters.total_tokens)
        .push(", ")
        .push_bind(counters.cost)
        .push(", ")
        .push_bind(counters.cost_saved)
        .push(", ")
        .push_bind(counters.price)
        .push(", ")
        .push_bind(counters.price_saved);
}

pub struct Usage<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Usage<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Append a batch of events and add its rollup deltas, in one transaction.
    #[instrument(skip_all, fields(events = events.len()), err)]
    pub async fn record_batch(&mut self, events: &[UsageEvent], rollup: &BatchRollup) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;

        for chunk in events.chunks(EVENTS_PER_INSERT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO usage_events (host, text_prefix, model, cached, cost, price, prompt_tokens, completion_tokens, \
                 total_tokens, language, sentiment, sentiment_score, intents, profanity_score, response_time_ms, created_at) ",
            );
            builder.push_values(chunk, |mut row, event| {
                row.push_bind(&event.host)
                    .push_bind(&event.text)
                    .push_bind(&event.model)
                    .push_bind(event.cached)
                    .push_bind(event.cost)
                    .push_bind(event.price)
                    .push_bind(event.usage.prompt_tokens as i64)
                    .push_bind(event.usage.completion_tokens as i64)
                    .push_bind(event.usage.total_tokens as i64)
                    .push_bind(&event.language)
                    .push_bind(event.sentiment.as_str())
                    .push_bind(event.sentiment_score)
                    .push_bind(&event.intents)
                    .push_bind(event.profanity_score)
                    .push_bind(event.response_time_ms as i64)
                    .push_bind(event.timestamp);
            });
            builder.build().execute(&mut *tx).await?;
        }

        for ((host, date, hour), counters) in &rollup.hourly {
            let mut builder = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO usage_hourly AS t (host, date, hour, {COUNTER_COLUMNS}) VALUES ("
            ));
            builder
                .push_bind(host)
                .push(", ")
                .push_bind(*date)
                .push(", ")
                .push_bind(*hour as i16)
                .push(", ");
            push_counters(&mut builder, counters);
            builder.push(format!(") ON CONFLICT (host, date, hour) DO UPDATE SET {COUNTER_INCREMENTS}"));
            builder.build().execute(&mut *tx).await?;
        }

        for ((host, date), counters) in &rollup.daily {
            let mut builder = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO usage_daily AS t (host, date, {COUNTER_COLUMNS}) VALUES ("
            ));
            builder.push_bind(host).push(", ").push_bind(*date).push(", ");
            push_counters(&mut builder, counters);
            builder.push(format!(") ON CONFLICT (host, date) DO UPDATE SET {COUNTER_INCREMENTS}"));
            builder.build().execute(&mut *tx).await?;
        }

        for (host, counters) in &rollup.hosts {
            let mut builder = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO usage_hosts AS t (host, {COUNTER_COLUMNS}) VALUES ("
            ));
            builder.push_bind(host).push(", ");
            push_counters(&mut builder, counters);
            builder.push(format!(
                ") ON CONFLICT (host) DO UPDATE SET {COUNTER_INCREMENTS}, last_seen = NOW()"
            ));
            builder.build().execute(&mut *tx).await?;
        }

        for ((host, date, dimension, value), count) in &rollup.distributions {
            sqlx::query(
                "INSERT INTO usage_distributions AS t (host, date, dimension, value, count)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (host, date, dimension, value) DO UPDATE SET count = t.count + EXCLUDED.count",
            )
            .bind(host)
            .bind(*date)
            .bind(dimension.as_str())
            .bind(value)
            .bind(*count)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Lifetime counters for one host
    pub async fn host_totals(&mut self, host: &str) -> Result<Option<(i64, i64, i64)>> {
        let row: Option<(i64, i64, i64)> =
            sqlx::query_as("SELECT requests, cache_hits, cache_misses FROM usage_hosts WHERE host = $1")
                .bind(host)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_event;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_rollups_are_additive(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Usage::new(&mut conn);

        let first = vec![sample_event("a.com", false), sample_event("a.com", true)];
        repo.record_batch(&first, &BatchRollup::from_events(&first)).await.unwrap();
        let second = vec![sample_event("a.com", false)];
        repo.record_batch(&second, &BatchRollup::from_events(&second)).await.unwrap();

        assert_eq!(repo.host_totals("a.com").await.unwrap(), Some((3, 1, 2)));
        assert_eq!(repo.host_totals("b.com").await.unwrap(), None);
    }
}
