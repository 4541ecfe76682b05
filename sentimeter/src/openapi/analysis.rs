//! OpenAPI documentation for the metered analysis endpoints.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(api::handlers::analyze::analyze, api::handlers::analyze::batch),
    components(schemas(
        api::models::analysis::AnalyzeRequest,
        api::models::analysis::AnalyzeResponse,
        api::models::analysis::AnalysisResult,
        api::models::analysis::TextAnalysis,
        api::models::analysis::Sentiment,
        api::models::analysis::SentimentLabel,
        api::models::analysis::Profanity,
        api::models::analysis::RequestDetails,
        api::models::analysis::BatchRequest,
        api::models::analysis::BatchResponse,
        api::models::analysis::BatchSummary,
        api::models::analysis::SentimentBreakdown,
        api::models::analysis::ErrorBreakdown,
        crate::pricing::TokenUsage,
        crate::pricing::CostBreakdown,
    )),
    tags(
        (name = "analysis", description = "Sentiment, profanity and intent classification, billed per host.

Every request names the `host` whose prepaid balance pays for it. A fresh analysis costs the
upstream model price plus markup; repeating a text (after whitespace and quote normalization)
is served from cache for a fraction of that."),
    ),
    info(
        title = "Sentimeter API",
        description = "Metered, cached text analysis",
    )
)]
pub struct AnalysisApiDoc;
