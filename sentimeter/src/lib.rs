//! # sentimeter: Metered Text Analysis
//!
//! `sentimeter` sits in front of a text-classification model and sells its answers. Each
//! request names a host whose prepaid balance pays for it; the service classifies the
//! text (language, sentiment, profanity, intents), charges the host the upstream cost plus
//! a markup, and keeps the result so that the same text can be served again for a
//! fraction of the price.
//!
//! ## Request Flow
//!
//! A call to `/api/analyze` is handled by the [`analyzer::Analyzer`]:
//!
//! 1. The worst-case cost is estimated from the text length and the model's rates.
//! 2. The [`ledger`] checks the host exists, is active and can afford the estimate.
//!    Otherwise the request ends with `402 Payment Required` and nothing is charged.
//! 3. The normalized text and model are hashed into a cache key. A hit is charged the
//!    cache-hit fee; a miss goes to the [`classifier`], is priced with [`pricing`],
//!    charged in full and written to the [`cache`].
//! 4. A usage event is handed to [`analytics`], which batches events and folds them into
//!    hourly, daily and per-host rollups off the request path.
//!
//! `/api/batch` runs the same pipeline for up to `limits.max_batch_size` texts
//! concurrently and summarizes the outcomes.
//!
//! ## Storage
//!
//! Everything stateful has an in-memory and a PostgreSQL implementation behind a trait:
//! [`ledger::BalanceLedger`], [`cache::ResultCache`] and [`analytics::AnalyticsStore`].
//! Setting `storage.type: postgres` (or `DATABASE_URL`) selects PostgreSQL for all three
//! and runs the embedded migrations on startup.
//!
//! ## Configuration
//!
//! See [`config`]. A YAML file is merged with `SENTIMETER_`-prefixed environment
//! variables; an empty configuration starts an in-memory service on port 3001.

pub mod analytics;
pub mod analyzer;
pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
mod openapi;
pub mod pricing;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    analytics::{AnalyticsStore, InMemoryAnalyticsStore, PostgresAnalyticsStore},
    analyzer::Analyzer,
    cache::{PostgresResultCache, ResultCache, ttl::TtlPolicy},
    classifier::OpenAiClassifier,
    config::CorsOrigin,
    ledger::BalanceLedger,
    openapi::{AdminApiDoc, AnalysisApiDoc},
    pricing::PricingTable,
};
use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{delete, get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// The analyzer owns the request pipeline; `ledger` and `cache` are the same instances it
/// uses, exposed for the admin endpoints.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub analyzer: Analyzer,
    pub ledger: Arc<dyn BalanceLedger>,
    pub cache: Arc<dyn ResultCache>,
}

/// Get the sentimeter database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

#[instrument(skip_all)]
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .allow_headers([http::header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - Analysis routes at `/api/*`
/// - Admin routes at `/admin/api/v1/*`
/// - API documentation at `/docs` and `/admin/docs`
/// - Optional Prometheus metrics at `/internal/metrics`
/// - CORS and request tracing
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let admin_routes = Router::new()
        .route("/hosts", get(api::handlers::hosts::list_hosts))
        .route(
            "/hosts/{host}",
            get(api::handlers::hosts::get_host).patch(api::handlers::hosts::update_host),
        )
        .route("/hosts/{host}/credits", post(api::handlers::hosts::add_credits))
        .route("/hosts/{host}/transactions", get(api::handlers::hosts::list_host_transactions))
        .route("/transactions/{id}/refund", post(api::handlers::hosts::refund_transaction))
        .route("/cache/stats", get(api::handlers::cache::get_cache_stats))
        .route("/cache", delete(api::handlers::cache::delete_cache_entries));

    let cors_layer = create_cors_layer(&state.config)?;
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/analyze", post(api::handlers::analyze::analyze))
        .route("/api/batch", post(api::handlers::analyze::batch))
        .nest("/admin/api/v1", admin_routes)
        .with_state(state)
        .merge(Scalar::with_url("/docs", AnalysisApiDoc::openapi()))
        .merge(Scalar::with_url("/admin/docs", AdminApiDoc::openapi()))
        .layer(cors_layer);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Open the pool and apply migrations when PostgreSQL storage is configured.
async fn setup_database(config: &Config) -> anyhow::Result<Option<PgPool>> {
    let Some((url, settings)) = config.storage.postgres() else {
        info!("Using in-memory storage; balances, cache and analytics are lost on restart");
        return Ok(None);
    };

    let pool = db::connect(url, settings).await?;
    migrator().run(&pool).await?;
    info!("Database migrations applied");
    Ok(Some(pool))
}

/// Tasks that run alongside the HTTP server until shutdown.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        // The analytics batcher flushes its buffer before returning
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Main application struct that owns all resources and background services.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects storage, runs migrations and starts
///    background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting sentimeter with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();

        let ledger = ledger::create_ledger(config.billing.enabled, pool.clone());
        let cache = cache::create_cache(pool.clone(), config.cache.max_capacity);
        if let Some(pool) = &pool {
            let purge = PostgresResultCache::new(pool.clone());
            background_tasks.push(tokio::spawn(
                purge.run_purge_loop(config.cache.purge_interval, shutdown_token.clone()),
            ));
        }

        let store: Arc<dyn AnalyticsStore> = match &pool {
            Some(pool) => Arc::new(PostgresAnalyticsStore::new(pool.clone())),
            None => Arc::new(InMemoryAnalyticsStore::with_max_raw_events(config.analytics.max_raw_events)),
        };
        let (recorder, batcher) = analytics::create_recorder(&config.analytics, store);
        if let Some(batcher) = batcher {
            background_tasks.push(tokio::spawn(batcher.run(shutdown_token.clone())));
        }

        let classifier = Arc::new(OpenAiClassifier::new(&config.classifier)?);
        let pricing = Arc::new(PricingTable::from_config(&config.pricing, &config.billing));

        let analyzer = Analyzer::builder()
            .ledger(ledger.clone())
            .cache(cache.clone())
            .classifier(classifier)
            .analytics(recorder)
            .pricing(pricing)
            .ttl(TtlPolicy::new(config.cache.default_ttl))
            .cache_hit_discount(config.billing.cache_hit_discount)
            .max_batch_size(config.limits.max_batch_size)
            .max_text_chars(config.limits.max_text_chars)
            .build();

        let app_state = AppState::builder()
            .config(config.clone())
            .analyzer(analyzer)
            .ledger(ledger)
            .cache(cache)
            .build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services: BackgroundServices {
                background_tasks,
                shutdown_token,
            },
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Sentimeter listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Stop background tasks before closing the pool they write to
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CorsConfig;
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_healthz_and_docs() {
        let app = create_test_app();

        let response = app.server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");

        app.server.get("/docs").await.assert_status_ok();
        app.server.get("/admin/docs").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_metrics_route_absent_when_disabled() {
        let app = create_test_app();
        app.server
            .get("/internal/metrics")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_in_memory_application_starts() {
        let config = create_test_config();
        let app = Application::new(config).await.unwrap();

        let server = TestServer::new(app.router).expect("Failed to create test server");
        server.get("/healthz").await.assert_status_ok();

        app.bg_services.shutdown().await;
    }

    #[test]
    fn test_cors_layer_from_config() {
        let mut config = create_test_config();
        config.cors = CorsConfig {
            allowed_origins: vec![CorsOrigin::Url("https://dashboard.example.com".parse().unwrap())],
            max_age: Some(600),
        };
        assert!(create_cors_layer(&config).is_ok());

        config.cors.allowed_origins = vec![CorsOrigin::Wildcard, CorsOrigin::Url("https://a.example.com".parse().unwrap())];
        assert!(create_cors_layer(&config).is_ok());
    }
}
