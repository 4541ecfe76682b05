//! Database layer for data persistence and access.
//!
//! Uses SQLx with PostgreSQL and the repository pattern: [`handlers`] holds one
//! repository per group of tables, [`models`] the request/outcome types they exchange,
//! and [`errors`] the database error taxonomy.
//!
//! Postgres is optional. When storage is configured as `memory`, none of this module is
//! touched at runtime and the in-memory ledger, cache and analytics store are used
//! instead.

pub mod errors;
pub mod handlers;
pub mod models;

use crate::config::PoolSettings;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

/// Open a connection pool with the configured settings. `0` disables the idle
/// timeout and max lifetime.
pub async fn connect(url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    let duration = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(duration(settings.idle_timeout_secs))
        .max_lifetime(duration(settings.max_lifetime_secs))
        .connect(url)
        .await
}
