//! Analysis result cache.
//!
//! Keys are content fingerprints from [`key::cache_key`], values the complete
//! [`AnalysisResult`] written after the first miss. Entries are never updated in place.
//! They disappear when their per-entry TTL (chosen by [`ttl::TtlPolicy`]) elapses or
//! when an administrator deletes them.
//!
//! Pattern deletion is restricted to the `analysis:` namespace: other prefixes such as
//! `analytics:` and `session:` are never matched, whatever the pattern.

pub mod key;
pub mod memory;
pub mod postgres;
pub mod ttl;

pub use memory::MokaResultCache;
pub use postgres::PostgresResultCache;

use crate::api::models::analysis::AnalysisResult;
use crate::db::errors::DbError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Database(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub backend: String,
    pub items: u64,
    /// Approximate size of the cached values
    pub memory_bytes: u64,
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AnalysisResult>>;

    async fn set(&self, key: &str, value: &AnalysisResult, ttl: Duration) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every analysis entry whose key matches the glob `pattern`, returning the
    /// number removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64>;

    async fn stats(&self) -> Result<CacheStats>;
}

/// Compile an administrator-supplied glob.
pub(crate) fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.msg.to_string(),
    })
}

/// Whether `key` may be removed by a pattern delete matching `pattern`.
///
/// Only keys inside the analysis namespace are candidates. The pattern may be given
/// either with the namespace (`analysis:ab*`) or without it (`ab*`).
pub(crate) fn pattern_matches(pattern: &glob::Pattern, key: &str) -> bool {
    let Some(fingerprint) = key.strip_prefix(key::ANALYSIS_NAMESPACE) else {
        return false;
    };
    pattern.matches(key) || pattern.matches(fingerprint)
}

/// Build the cache selected by configuration: Postgres when a pool is available,
/// otherwise an in-process moka cache.
pub fn create_cache(pool: Option<PgPool>, max_capacity: u64) -> Arc<dyn ResultCache> {
    match pool {
        Some(pool) => {
            info!("Using Postgres analysis cache");
            Arc::new(PostgresResultCache::new(pool))
        }
        None => {
            info!(max_capacity, "Using in-memory analysis cache");
            Arc::new(MokaResultCache::new(max_capacity))
        }
    }
}
