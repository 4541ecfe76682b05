//! HTTP handlers for the metered analysis endpoints.

use crate::{
    AppState,
    api::models::analysis::{AnalyzeRequest, AnalyzeResponse, BatchRequest, BatchResponse},
    errors::{Error, Result},
};
use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};

fn malformed_body(rejection: JsonRejection) -> Error {
    Error::Validation {
        message: rejection.body_text(),
    }
}

/// Analyze a single text
#[utoipa::path(
    post,
    path = "/api/analyze",
    tag = "analysis",
    summary = "Analyze a text",
    description = "Classify sentiment, profanity and intents of a text, billing the host's prepaid balance. \
        Repeated texts are served from cache at a discount.",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Analysis result", body = AnalyzeResponse),
        (status = 400, description = "Missing or invalid text or host"),
        (status = 402, description = "Unknown host, inactive host or insufficient balance"),
        (status = 500, description = "Classification failed"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn analyze(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AnalyzeResponse>)> {
    let Json(request) = payload.map_err(malformed_body)?;
    let response = state.analyzer.analyze(&request).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Analyze many texts
#[utoipa::path(
    post,
    path = "/api/batch",
    tag = "analysis",
    summary = "Analyze a batch of texts",
    description = "Run the single-text pipeline for every text concurrently. Per-item failures are \
        reported in place and do not fail the batch.",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Per-item results and aggregate summary", body = BatchResponse),
        (status = 400, description = "Missing texts, missing host or batch too large"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchResponse>)> {
    let Json(request) = payload.map_err(malformed_body)?;
    let response = state.analyzer.analyze_batch(&request).await?;
    Ok((StatusCode::OK, Json(response)))
}
