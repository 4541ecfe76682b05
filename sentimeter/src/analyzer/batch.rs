use super::{Analyzer, required_field};
use crate::api::models::analysis::{
    AnalyzeResponse, BatchItem, BatchOutcome, BatchRequest, BatchResponse, BatchSummary, ErrorBreakdown, SentimentBreakdown,
};
use crate::errors::{Error, Result};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

impl Analyzer {
    /// Analyze a list of texts concurrently.
    ///
    /// Every item runs the single-text pipeline with its own balance check; there is
    /// no reservation across the batch, so a host running low may see early items
    /// succeed and later ones fail with a balance error.
    #[instrument(skip_all, fields(host = request.host.as_deref().unwrap_or_default(), texts = tracing::field::Empty))]
    pub async fn analyze_batch(&self, request: &BatchRequest) -> Result<BatchResponse> {
        let texts = match request.texts.as_deref() {
            Some(texts) if !texts.is_empty() => texts,
            _ => {
                return Err(Error::Validation {
                    message: "texts must be a non-empty array".to_string(),
                });
            }
        };
        if texts.len() > self.max_batch_size {
            return Err(Error::Validation {
                message: format!("a batch may contain at most {} texts, got {}", self.max_batch_size, texts.len()),
            });
        }
        let host = required_field(request.host.as_deref(), "host")?;
        let model = self.resolve_model(request.model.as_deref());
        tracing::Span::current().record("texts", texts.len());

        let outcomes = join_all(texts.iter().map(|text| self.analyze_text(text, host, model))).await;

        let results: Vec<BatchItem> = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| BatchItem {
                index,
                outcome: match outcome {
                    Ok(response) => BatchOutcome::Success(Box::new(response)),
                    Err(e) => {
                        debug!(index, error = %e, "Batch item failed");
                        BatchOutcome::Failure(e.body())
                    }
                },
            })
            .collect();

        let summary = summarize(&results);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            cached = summary.cached,
            "Processed batch"
        );

        Ok(BatchResponse { summary, results })
    }
}

/// Aggregate per-item outcomes into the batch summary.
pub(crate) fn summarize(items: &[BatchItem]) -> BatchSummary {
    let successes: Vec<&AnalyzeResponse> = items
        .iter()
        .filter_map(|item| match &item.outcome {
            BatchOutcome::Success(response) => Some(response.as_ref()),
            BatchOutcome::Failure(_) => None,
        })
        .collect();

    let mut sentiment_breakdown = SentimentBreakdown::default();
    let mut intent_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_cost = Decimal::ZERO;
    let mut total_price = Decimal::ZERO;
    let mut total_profit = Decimal::ZERO;
    let mut score_sum = 0.0;

    for response in &successes {
        let result = &response.result;
        sentiment_breakdown.record(result.sentiment.sentiment);
        for intent in &result.intents {
            *intent_counts.entry(intent.clone()).or_default() += 1;
        }
        total_cost += result.cost.total_cost;
        total_price += result.cost.total_price;
        total_profit += result.cost.profit();
        score_sum += result.sentiment.score;
    }

    let mut error_breakdown = ErrorBreakdown::default();
    for item in items {
        if let BatchOutcome::Failure(body) = &item.outcome {
            if is_balance_error(body) {
                error_breakdown.balance += 1;
            } else {
                error_breakdown.other += 1;
            }
        }
    }

    let cached = successes.iter().filter(|response| response.cached).count();
    let average_sentiment_score = if successes.is_empty() {
        0.0
    } else {
        score_sum / successes.len() as f64
    };

    BatchSummary {
        total: items.len(),
        successful: successes.len(),
        failed: items.len() - successes.len(),
        cached,
        fresh: successes.len() - cached,
        average_sentiment_score,
        total_cost,
        total_price,
        total_profit,
        sentiment_breakdown,
        intent_counts,
        error_breakdown,
    }
}

fn is_balance_error(body: &Value) -> bool {
    ["error", "details"]
        .iter()
        .filter_map(|field| body.get(field).and_then(Value::as_str))
        .any(|text| text.to_lowercase().contains("balance"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaResultCache;
    use crate::classifier::ClassifierError;
    use crate::ledger::{BalanceLedger, CreditGrant, InMemoryLedger, TransactionType};
    use crate::pricing::{PricingTable, default_model_rates};
    use crate::test_utils::{CapturingRecorder, MockClassifier};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;

    fn analyzer(ledger: Arc<InMemoryLedger>, classifier: Arc<MockClassifier>) -> Analyzer {
        Analyzer::builder()
            .ledger(ledger)
            .cache(Arc::new(MokaResultCache::new(1_000)))
            .classifier(classifier)
            .analytics(Arc::new(CapturingRecorder::default()))
            .pricing(Arc::new(PricingTable::new("gpt-4o-mini", default_model_rates(), Decimal::from(25))))
            .max_batch_size(100)
            .build()
    }

    fn batch(texts: Vec<&str>, host: &str) -> BatchRequest {
        BatchRequest {
            texts: Some(texts.into_iter().map(str::to_string).collect()),
            host: Some(host.to_string()),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_before_processing() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.add_credits(&CreditGrant::new("a.com", Decimal::from(10))).await.unwrap();
        let classifier = Arc::new(MockClassifier::new());
        let analyzer = analyzer(ledger.clone(), classifier.clone());

        let texts = vec!["hello"; 101];
        let err = analyzer.analyze_batch(&batch(texts, "a.com")).await.unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(classifier.calls(), 0);
        let history = ledger.get_transaction_history("a.com", 0, 10).await.unwrap();
        assert!(history.transactions.iter().all(|t| t.transaction_type != TransactionType::Deduct));
    }

    #[tokio::test]
    async fn test_empty_or_missing_texts_rejected() {
        let analyzer = analyzer(Arc::new(InMemoryLedger::new()), Arc::new(MockClassifier::new()));

        assert!(analyzer.analyze_batch(&batch(vec![], "a.com")).await.is_err());
        assert!(analyzer.analyze_batch(&BatchRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_summary_with_mixed_outcomes() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.add_credits(&CreditGrant::new("a.com", Decimal::from(10))).await.unwrap();
        let classifier = Arc::new(MockClassifier::new());
        classifier.push(Err(ClassifierError::Upstream("Classifier returned 502".to_string())));
        let analyzer = analyzer(ledger, classifier);

        let response = analyzer
            .analyze_batch(&batch(vec!["first text", "second text", "   "], "a.com"))
            .await
            .unwrap();

        let summary = &response.summary;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.error_breakdown, ErrorBreakdown { balance: 0, other: 2 });
        assert_eq!(summary.sentiment_breakdown.positive, 1);
        assert_eq!(summary.intent_counts.get("information"), Some(&1));
        assert_eq!(summary.total_profit, summary.total_price - summary.total_cost);

        let indexes: Vec<usize> = response.results.iter().map(|item| item.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_host_items_count_as_balance_errors() {
        let analyzer = analyzer(Arc::new(InMemoryLedger::new()), Arc::new(MockClassifier::new()));

        let response = analyzer.analyze_batch(&batch(vec!["one", "two"], "nobody.com")).await.unwrap();

        assert_eq!(response.summary.failed, 2);
        assert_eq!(response.summary.error_breakdown.balance, 2);
        assert_eq!(response.summary.average_sentiment_score, 0.0);
        for item in &response.results {
            match &item.outcome {
                BatchOutcome::Failure(body) => assert_eq!(body["hostExists"], false),
                BatchOutcome::Success(_) => panic!("expected failure"),
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_texts_share_the_cache() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.add_credits(&CreditGrant::new("a.com", Decimal::from(10))).await.unwrap();
        let classifier = Arc::new(MockClassifier::new());
        let analyzer = analyzer(ledger, classifier.clone());

        analyzer.analyze_batch(&batch(vec!["same"], "a.com")).await.unwrap();
        let response = analyzer.analyze_batch(&batch(vec!["same", "same"], "a.com")).await.unwrap();

        assert_eq!(response.summary.cached, 2);
        assert_eq!(classifier.calls(), 1);
    }

    #[test]
    fn test_balance_error_detection_is_case_insensitive() {
        assert!(is_balance_error(&json!({"error": "Insufficient Balance"})));
        assert!(is_balance_error(&json!({"error": "x", "details": "balance too low"})));
        assert!(!is_balance_error(&json!({"error": "Upstream classification failed", "details": "timed out"})));
        assert!(!is_balance_error(&json!({"error": 42})));
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.total_cost, Decimal::from_str("0").unwrap());
    }
}
