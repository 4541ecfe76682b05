//! In-process analysis cache on moka, with a TTL per entry.

use super::{CacheStats, ResultCache, Result, compile_pattern, pattern_matches};
use crate::api::models::analysis::AnalysisResult;
use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedAnalysis {
    result: Arc<AnalysisResult>,
    ttl: Duration,
    size_bytes: u64,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedAnalysis> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedAnalysis, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedAnalysis,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct MokaResultCache {
    entries: Cache<String, CachedAnalysis>,
}

impl MokaResultCache {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build();
        Self { entries }
    }
}

#[async_trait]
impl ResultCache for MokaResultCache {
    async fn get(&self, key: &str) -> Result<Option<AnalysisResult>> {
        Ok(self.entries.get(key).await.map(|entry| entry.result.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: &AnalysisResult, ttl: Duration) -> Result<()> {
        let size_bytes = (key.len() + serde_json::to_vec(value)?.len()) as u64;
        self.entries
            .insert(
                key.to_string(),
                CachedAnalysis {
                    result: Arc::new(value.clone()),
                    ttl,
                    size_bytes,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = compile_pattern(pattern)?;

        let matching: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern_matches(&pattern, key))
            .map(|(key, _)| key)
            .collect();

        let mut deleted = 0;
        for key in matching {
            if self.entries.remove(key.as_str()).await.is_some() {
                deleted += 1;
            }
        }

        debug!(deleted, "Deleted cache entries by pattern");
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.entries.run_pending_tasks().await;

        let memory_bytes = self.entries.iter().map(|(_, entry)| entry.size_bytes).sum();
        Ok(CacheStats {
            backend: "memory".to_string(),
            items: self.entries.entry_count(),
            memory_bytes,
        })
    }
}
