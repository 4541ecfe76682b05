//! Analysis request/response models shared by the HTTP layer, the cache and the
//! analytics recorder.

use crate::pricing::{CostBreakdown, TokenUsage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SentimentLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => Err(format!("unknown sentiment label '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Sentiment {
    /// Polarity in [-1, 1]
    pub score: f64,
    pub sentiment: SentimentLabel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Profanity {
    pub score: f64,
    #[serde(default)]
    pub words: Vec<String>,
}

/// The classification itself, as produced by the upstream model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TextAnalysis {
    pub language: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub profanity: Profanity,
    #[serde(default)]
    pub intents: Vec<String>,
}

impl TextAnalysis {
    /// Clamp scores into their documented ranges and drop repeated intent labels,
    /// keeping the first occurrence.
    pub fn clamped(mut self) -> Self {
        self.sentiment.score = self.sentiment.score.clamp(-1.0, 1.0);
        self.profanity.score = self.profanity.score.max(0.0);

        let mut seen = HashSet::new();
        self.intents.retain(|intent| seen.insert(intent.clone()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestDetails {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
}

/// A complete analysis. Immutable once written to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub language: String,
    pub sentiment: Sentiment,
    pub profanity: Profanity,
    pub intents: Vec<String>,
    pub usage: TokenUsage,
    pub cost: CostBreakdown,
    pub request_details: RequestDetails,
}

impl AnalysisResult {
    pub fn assemble(analysis: TextAnalysis, usage: TokenUsage, cost: CostBreakdown, request_details: RequestDetails) -> Self {
        Self {
            language: analysis.language,
            sentiment: analysis.sentiment,
            profanity: analysis.profanity,
            intents: analysis.intents,
            usage,
            cost,
            request_details,
        }
    }

    pub fn has_intent(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i == intent)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    pub text: Option<String>,
    pub host: Option<String>,
    /// Model id, defaults to the configured default model
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub cached: bool,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance_remaining: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct BatchRequest {
    pub texts: Option<Vec<String>>,
    pub host: Option<String>,
    pub model: Option<String>,
}

/// One entry of a batch response, tagged with the position of its input text.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Success(Box<AnalyzeResponse>),
    /// The same JSON body a single request would have returned for this failure
    Failure(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SentimentBreakdown {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

impl SentimentBreakdown {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::Negative => self.negative += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBreakdown {
    pub balance: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cached: usize,
    pub fresh: usize,
    pub average_sentiment_score: f64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_profit: Decimal,
    pub sentiment_breakdown: SentimentBreakdown,
    pub intent_counts: BTreeMap<String, usize>,
    pub error_breakdown: ErrorBreakdown,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchResponse {
    pub summary: BatchSummary,
    /// Per-text results in input order. Successes carry the single-analysis response
    /// fields, failures carry `error` and `details`.
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<BatchItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentiment_label_is_case_insensitive() {
        let parsed: Sentiment = serde_json::from_value(json!({"score": 0.5, "sentiment": "Positive"})).unwrap();
        assert_eq!(parsed.sentiment, SentimentLabel::Positive);
        assert_eq!(serde_json::to_value(parsed.sentiment).unwrap(), json!("positive"));

        assert!(serde_json::from_value::<Sentiment>(json!({"score": 0.5, "sentiment": "ecstatic"})).is_err());
    }

    #[test]
    fn test_text_analysis_defaults_and_clamping() {
        let analysis: TextAnalysis = serde_json::from_value(json!({
            "language": "en",
            "sentiment": {"score": 1.7, "sentiment": "positive"}
        }))
        .unwrap();
        let analysis = analysis.clamped();

        assert_eq!(analysis.sentiment.score, 1.0);
        assert!(analysis.intents.is_empty());
        assert_eq!(analysis.profanity, Profanity::default());
    }

    #[test]
    fn test_clamping_drops_repeated_intents() {
        let analysis: TextAnalysis = serde_json::from_value(json!({
            "language": "en",
            "sentiment": {"score": 0.2, "sentiment": "neutral"},
            "intents": ["question", "complaint", "question", "complaint", "praise"]
        }))
        .unwrap();

        assert_eq!(analysis.clamped().intents, vec!["question", "complaint", "praise"]);
    }

    #[test]
    fn test_batch_failure_item_flattens_body() {
        let item = BatchItem {
            index: 3,
            outcome: BatchOutcome::Failure(json!({"error": "Insufficient balance", "details": "x"})),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["index"], 3);
        assert_eq!(value["error"], "Insufficient balance");
    }
}
