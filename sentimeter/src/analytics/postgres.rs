use super::rollup::BatchRollup;
use super::{AnalyticsError, AnalyticsStore, UsageEvent};
use crate::db::handlers::Usage;
use async_trait::async_trait;
use sqlx::PgPool;

/// Analytics persisted to the `usage_*` tables
#[derive(Debug, Clone)]
pub struct PostgresAnalyticsStore {
    pool: PgPool,
}

impl PostgresAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsStore for PostgresAnalyticsStore {
    async fn write_batch(&self, events: &[UsageEvent]) -> Result<(), AnalyticsError> {
        let rollup = BatchRollup::from_events(events);
        let mut conn = self.pool.acquire().await?;
        Usage::new(&mut conn).record_batch(events, &rollup).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_event;

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_write_batch_records_events(pool: PgPool) {
        let store = PostgresAnalyticsStore::new(pool.clone());
        store
            .write_batch(&[sample_event("a.com", false), sample_event("b.com", true)])
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 2);

        let distributions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_distributions WHERE dimension = 'model'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(distributions, 2);
    }
}
