//! Shared analysis cache in the `analysis_cache` table.
//!
//! Expired rows are invisible to reads and removed by [`PostgresResultCache::purge_expired`],
//! which the application runs periodically.

use super::{CacheStats, ResultCache, Result, compile_pattern, pattern_matches};
use crate::api::models::analysis::AnalysisResult;
use crate::cache::key::ANALYSIS_NAMESPACE;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::types::Json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PostgresResultCache {
    pool: PgPool,
}

impl PostgresResultCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Remove rows whose TTL has elapsed, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM analysis_cache WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Purge expired rows every `interval` until cancelled.
    pub async fn run_purge_loop(self, interval: Duration, shutdown_token: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Analysis cache purge task started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => {
                    info!("Analysis cache purge task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => debug!(purged, "Purged expired analysis cache entries"),
                        Err(e) => warn!(error = %e, "Failed to purge expired analysis cache entries"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ResultCache for PostgresResultCache {
    async fn get(&self, key: &str) -> Result<Option<AnalysisResult>> {
        let value: Option<Json<AnalysisResult>> =
            sqlx::query_scalar("SELECT value FROM analysis_cache WHERE key = $1 AND expires_at > NOW()")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.map(|Json(result)| result))
    }

    async fn set(&self, key: &str, value: &AnalysisResult, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now().checked_add_signed(ttl).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        sqlx::query(
            "INSERT INTO analysis_cache (key, value, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at, created_at = NOW()",
        )
        .bind(key)
        .bind(Json(value))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM analysis_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = compile_pattern(pattern)?;

        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM analysis_cache WHERE starts_with(key, $1)")
            .bind(ANALYSIS_NAMESPACE)
            .fetch_all(&self.pool)
            .await?;

        let matching: Vec<String> = keys.into_iter().filter(|key| pattern_matches(&pattern, key)).collect();
        if matching.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM analysis_cache WHERE key = ANY($1)")
            .bind(&matching)
            .execute(&self.pool)
            .await?;

        debug!(deleted = result.rows_affected(), "Deleted cache entries by pattern");
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (items, memory_bytes): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(pg_column_size(value)), 0)::BIGINT
             FROM analysis_cache WHERE expires_at > NOW()",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            backend: "postgres".to_string(),
            items: items.max(0) as u64,
            memory_bytes: memory_bytes.max(0) as u64,
        })
    }
}
