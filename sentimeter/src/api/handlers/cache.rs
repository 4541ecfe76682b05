use crate::{
    AppState,
    api::models::cache::{CacheDeleteQuery, CacheDeleteResponse},
    cache::CacheStats,
    errors::Result,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};

/// Cache statistics
#[utoipa::path(
    get,
    path = "/cache/stats",
    tag = "cache",
    summary = "Get cache statistics",
    responses(
        (status = 200, description = "Backend, item count and approximate memory use", body = CacheStats),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_cache_stats(State(state): State<AppState>) -> Result<(StatusCode, Json<CacheStats>)> {
    let stats = state.cache.stats().await?;
    Ok((StatusCode::OK, Json(stats)))
}

/// Invalidate cached analyses
#[utoipa::path(
    delete,
    path = "/cache",
    tag = "cache",
    summary = "Delete cached analyses by pattern",
    description = "Delete every cached analysis whose key matches a glob pattern, e.g. `analysis:*`.",
    params(CacheDeleteQuery),
    responses(
        (status = 200, description = "Number of entries deleted", body = CacheDeleteResponse),
        (status = 400, description = "Invalid pattern"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_cache_entries(
    State(state): State<AppState>,
    Query(query): Query<CacheDeleteQuery>,
) -> Result<(StatusCode, Json<CacheDeleteResponse>)> {
    let deleted = state.cache.delete_by_pattern(&query.pattern).await?;
    tracing::info!(deleted, pattern = %query.pattern, "Invalidated cached analyses");

    Ok((
        StatusCode::OK,
        Json(CacheDeleteResponse {
            pattern: query.pattern,
            deleted,
        }),
    ))
}
