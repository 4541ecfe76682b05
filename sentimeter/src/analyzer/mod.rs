//! Request orchestration for single and batch analyses.
//!
//! ```text
//! START ─▶ ESTIMATE_COST ─▶ CHECK_BALANCE ─┬─▶ 402 (no charge, no cache, no analytics)
//!                                          │
//!                                          ├─ cache hit ─▶ discounted fee ─▶ analytics(cached)
//!                                          │
//!                                          └─ cache miss ─▶ classify ─┬─▶ 500 (no charge)
//!                                                                    │
//!                                                                    └─▶ full cost ─▶ cache set ─▶ analytics(fresh)
//! ```
//!
//! Charging and analytics are independent side effects. A failed deduction after a
//! successful balance check is logged and the result is still returned; analytics
//! are handed off without waiting.

mod batch;

use crate::analytics::{AnalyticsRecorder, UsageEvent};
use crate::api::models::analysis::{AnalysisResult, AnalyzeRequest, AnalyzeResponse, RequestDetails};
use crate::cache::{ResultCache, key::cache_key, key::normalize_text, ttl::TtlPolicy};
use crate::classifier::{Classifier, ClassifierError};
use crate::errors::{Error, Result};
use crate::ledger::{BalanceCheck, BalanceLedger};
use crate::pricing::{PricingTable, round_money};
use bon::Builder;
use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Sequences cache, ledger, classifier and analytics for each analysis.
#[derive(Clone, Builder)]
pub struct Analyzer {
    ledger: Arc<dyn BalanceLedger>,
    cache: Arc<dyn ResultCache>,
    classifier: Arc<dyn Classifier>,
    analytics: Arc<dyn AnalyticsRecorder>,
    pricing: Arc<PricingTable>,
    #[builder(default)]
    ttl: TtlPolicy,
    /// Fraction of the original cost charged when serving from cache
    #[builder(default = Decimal::new(1, 1))]
    cache_hit_discount: Decimal,
    #[builder(default = 100)]
    max_batch_size: usize,
    #[builder(default = 100_000)]
    max_text_chars: usize,
}

/// Validated input for one analysis
struct AnalysisInput<'a> {
    text: &'a str,
    host: &'a str,
    model: &'a str,
}

impl Analyzer {
    /// Analyze one text on behalf of a host.
    #[instrument(skip_all, fields(host = request.host.as_deref().unwrap_or_default()))]
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        let host = required_field(request.host.as_deref(), "host")?;
        let text = required_field(request.text.as_deref(), "text")?;
        let model = self.resolve_model(request.model.as_deref());

        self.analyze_text(text, host, model).await
    }

    fn resolve_model<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| self.pricing.default_model())
    }

    /// The single-text pipeline, shared by the single and batch paths.
    async fn analyze_text(&self, text: &str, host: &str, model: &str) -> Result<AnalyzeResponse> {
        let start = Instant::now();
        let input = self.validate(text, host, model)?;

        let estimated_cost = self.pricing.estimate_cost(input.text, input.model);
        let check = self.ledger.check_balance(input.host, estimated_cost).await?;
        if !check.sufficient {
            counter!("sentimeter_analyses_total", "outcome" => "payment_required").increment(1);
            return Err(Error::PaymentRequired { check, estimated_cost });
        }

        let cleaned = normalize_text(input.text);
        let key = cache_key(input.text, input.model);

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        let response = match cached {
            Some(result) => self.serve_cached(&input, &key, result, &check).await,
            None => self.serve_fresh(&input, &cleaned, &key, &check).await?,
        };

        self.analytics.record(UsageEvent::from_result(
            input.host,
            &cleaned,
            &response.result,
            response.cached,
            start.elapsed(),
        ));
        histogram!("sentimeter_analysis_duration_seconds", "cached" => response.cached.to_string())
            .record(start.elapsed().as_secs_f64());

        Ok(response)
    }

    fn validate<'a>(&self, text: &'a str, host: &'a str, model: &'a str) -> Result<AnalysisInput<'a>> {
        let text = text.trim();
        let host = host.trim();

        if text.is_empty() {
            return Err(Error::Validation {
                message: "text is required".to_string(),
            });
        }
        if host.is_empty() {
            return Err(Error::Validation {
                message: "host is required".to_string(),
            });
        }
        if text.chars().count() > self.max_text_chars {
            return Err(Error::Validation {
                message: format!("text exceeds the maximum of {} characters", self.max_text_chars),
            });
        }

        Ok(AnalysisInput { text, host, model })
    }

    /// Serve a cached analysis, charging the discounted fee.
    async fn serve_cached(&self, input: &AnalysisInput<'_>, key: &str, result: AnalysisResult, check: &BalanceCheck) -> AnalyzeResponse {
        counter!("sentimeter_analyses_total", "outcome" => "cache_hit").increment(1);

        let fee = round_money(result.cost.total_cost * self.cache_hit_discount);
        let balance_remaining = self
            .charge(input.host, fee, &format!("Cached analysis ({})", input.model), key, check)
            .await;

        debug!(%fee, "Served analysis from cache");
        AnalyzeResponse {
            result,
            cached: true,
            balance_remaining,
        }
    }

    /// Classify, charge the full cost and cache the result.
    async fn serve_fresh(&self, input: &AnalysisInput<'_>, cleaned: &str, key: &str, check: &BalanceCheck) -> Result<AnalyzeResponse> {
        let classify_start = Instant::now();
        let classification = self.classifier.classify(cleaned, input.model).await.map_err(|e| {
            match &e {
                ClassifierError::Upstream(message) => {
                    counter!("sentimeter_analyses_total", "outcome" => "upstream_error").increment(1);
                    warn!(error = %message, "Classification failed");
                }
                // The classifier logs the text and raw reply
                ClassifierError::Parse { .. } => {
                    counter!("sentimeter_analyses_total", "outcome" => "parse_error").increment(1);
                }
            }
            Error::from(e)
        })?;
        histogram!("sentimeter_classification_duration_seconds").record(classify_start.elapsed().as_secs_f64());
        counter!("sentimeter_analyses_total", "outcome" => "cache_miss").increment(1);

        let cost = self.pricing.cost_for(input.model, &classification.usage);
        let balance_remaining = self
            .charge(input.host, cost.total_cost, &format!("Analysis ({})", input.model), key, check)
            .await;

        let result = AnalysisResult::assemble(
            classification.analysis,
            classification.usage,
            cost,
            RequestDetails {
                model: input.model.to_string(),
                timestamp: Utc::now(),
                host: input.host.to_string(),
            },
        );

        let ttl = self.ttl.ttl_for(&result);
        if let Err(e) = self.cache.set(key, &result, ttl).await {
            warn!(error = %e, "Failed to cache analysis");
        }

        Ok(AnalyzeResponse {
            result,
            cached: false,
            balance_remaining,
        })
    }

    /// Deduct `amount` and return the balance left afterwards.
    ///
    /// Deduction failures are logged and never fail the request; the remaining balance
    /// is then estimated from the pre-flight check.
    async fn charge(&self, host: &str, amount: Decimal, description: &str, reference: &str, check: &BalanceCheck) -> Decimal {
        let estimated = (check.balance - amount).max(Decimal::ZERO);
        if amount <= Decimal::ZERO {
            return check.balance;
        }

        match self.ledger.deduct_credits(host, amount, description, Some(reference)).await {
            Ok(deduction) => {
                counter!("sentimeter_credits_charged_total").increment(1);
                deduction.balance
            }
            Err(e) => {
                counter!("sentimeter_charge_failures_total").increment(1);
                warn!(error = %e, %amount, "Failed to deduct credits after a successful balance check");
                estimated
            }
        }
    }
}

fn required_field<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| Error::Validation {
        message: format!("{name} is required"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaResultCache;
    use crate::ledger::{CreditGrant, InMemoryLedger, TransactionType, UnmeteredLedger};
    use crate::pricing::TokenUsage;
    use crate::test_utils::{CapturingRecorder, MockClassifier, sample_classification};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Harness {
        analyzer: Analyzer,
        ledger: Arc<InMemoryLedger>,
        classifier: Arc<MockClassifier>,
        analytics: Arc<CapturingRecorder>,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let classifier = Arc::new(MockClassifier::new());
        let analytics = Arc::new(CapturingRecorder::default());
        let analyzer = Analyzer::builder()
            .ledger(ledger.clone())
            .cache(Arc::new(MokaResultCache::new(1_000)))
            .classifier(classifier.clone())
            .analytics(analytics.clone())
            .pricing(Arc::new(PricingTable::new("gpt-4o-mini", crate::pricing::default_model_rates(), Decimal::from(25))))
            .max_text_chars(1_000)
            .build();

        Harness {
            analyzer,
            ledger,
            classifier,
            analytics,
        }
    }

    fn request(text: &str, host: &str) -> AnalyzeRequest {
        AnalyzeRequest {
            text: Some(text.to_string()),
            host: Some(host.to_string()),
            model: None,
        }
    }

    async fn fund(ledger: &InMemoryLedger, host: &str, amount: &str) {
        ledger.add_credits(&CreditGrant::new(host, dec(amount))).await.unwrap();
    }

    async fn deductions(ledger: &InMemoryLedger, host: &str) -> Vec<Decimal> {
        ledger
            .get_transaction_history(host, 0, 100)
            .await
            .unwrap()
            .transactions
            .into_iter()
            .filter(|t| t.transaction_type == TransactionType::Deduct)
            .map(|t| -t.amount)
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_analysis_charges_full_cost() {
        let h = harness();
        fund(&h.ledger, "a.com", "10").await;

        let response = h.analyzer.analyze(&request("I love this", "a.com")).await.unwrap();

        assert!(!response.cached);
        assert_eq!(response.result.request_details.model, "gpt-4o-mini");
        assert_eq!(response.result.request_details.host, "a.com");
        assert!(response.balance_remaining < dec("10"));
        assert_eq!(deductions(&h.ledger, "a.com").await, vec![response.result.cost.total_cost]);
        assert_eq!(h.classifier.calls(), 1);

        let events = h.analytics.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].cached);
    }

    #[tokio::test]
    async fn test_second_request_is_cached_and_discounted() {
        let h = harness();
        fund(&h.ledger, "a.com", "10").await;
        fund(&h.ledger, "b.com", "10").await;

        let first = h.analyzer.analyze(&request("I love this", "a.com")).await.unwrap();
        // Whitespace and quote style do not change the fingerprint
        let second = h.analyzer.analyze(&request("  I   love this ", "b.com")).await.unwrap();

        assert!(second.cached);
        assert_eq!(h.classifier.calls(), 1);
        assert_eq!(second.result, first.result);

        let fee = round_money(first.result.cost.total_cost * dec("0.1"));
        assert_eq!(deductions(&h.ledger, "b.com").await, vec![fee]);
        assert_eq!(second.balance_remaining, dec("10") - fee);

        let events = h.analytics.events();
        assert_eq!(events.len(), 2);
        assert!(events[1].cached);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_rejected_without_side_effects() {
        let h = harness();
        fund(&h.ledger, "poor.com", "0.0001").await;

        let long_text = "word ".repeat(190);
        let mut req = request(&long_text, "poor.com");
        req.model = Some("gpt-4".to_string());

        let err = h.analyzer.analyze(&req).await.unwrap_err();
        match err {
            Error::PaymentRequired { check, estimated_cost } => {
                assert!(check.host_exists);
                assert!(check.active);
                assert!(!check.sufficient);
                assert!(estimated_cost > dec("0.0001"));
            }
            other => panic!("expected payment required, got {other:?}"),
        }

        assert_eq!(h.classifier.calls(), 0);
        assert!(deductions(&h.ledger, "poor.com").await.is_empty());
        assert!(h.analytics.events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_hosts_are_rejected() {
        let h = harness();

        let err = h.analyzer.analyze(&request("hello", "nobody.com")).await.unwrap_err();
        assert!(matches!(err, Error::PaymentRequired { ref check, .. } if !check.host_exists));

        fund(&h.ledger, "off.com", "10").await;
        h.ledger.update_host_status("off.com", false, None).await.unwrap();
        let err = h.analyzer.analyze(&request("hello", "off.com")).await.unwrap_err();
        assert!(matches!(err, Error::PaymentRequired { ref check, .. } if check.host_exists && !check.active));
    }

    #[test_log::test(tokio::test)]
    async fn test_parse_failure_charges_nothing() {
        let h = harness();
        fund(&h.ledger, "a.com", "10").await;
        h.classifier.push(Err(ClassifierError::Parse {
            message: "Invalid classification JSON".to_string(),
            raw: "not json".to_string(),
        }));

        let err = h.analyzer.analyze(&request("I love this", "a.com")).await.unwrap_err();

        assert!(matches!(err, Error::UpstreamParse(_)));
        assert!(deductions(&h.ledger, "a.com").await.is_empty());
        assert!(h.analytics.events().is_empty());

        // Nothing was cached, so the next request classifies again
        h.analyzer.analyze(&request("I love this", "a.com")).await.unwrap();
        assert_eq!(h.classifier.calls(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_upstream_failure_charges_nothing() {
        let h = harness();
        fund(&h.ledger, "a.com", "10").await;
        h.classifier.push(Err(ClassifierError::Upstream("Classifier returned 503".to_string())));

        let err = h.analyzer.analyze(&request("hello", "a.com")).await.unwrap_err();

        assert!(matches!(err, Error::Upstream(_)));
        assert!(deductions(&h.ledger, "a.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_validation_errors() {
        let h = harness();

        let err = h.analyzer.analyze(&AnalyzeRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref message } if message.contains("host")));

        let err = h.analyzer.analyze(&request("   ", "a.com")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref message } if message.contains("text")));

        let err = h.analyzer.analyze(&request(&"x".repeat(1_001), "a.com")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref message } if message.contains("maximum")));
    }

    #[tokio::test]
    async fn test_zero_cost_skips_deduction() {
        let h = harness();
        fund(&h.ledger, "a.com", "1").await;
        let mut classification = sample_classification();
        classification.usage = TokenUsage::new(0, 0);
        h.classifier.push(Ok(classification));

        let response = h.analyzer.analyze(&request("hi", "a.com")).await.unwrap();

        assert_eq!(response.result.cost.total_cost, Decimal::ZERO);
        assert_eq!(response.balance_remaining, dec("1"));
        assert!(deductions(&h.ledger, "a.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_unmetered_ledger_serves_everyone() {
        let classifier = Arc::new(MockClassifier::new());
        let analyzer = Analyzer::builder()
            .ledger(Arc::new(UnmeteredLedger))
            .cache(Arc::new(MokaResultCache::new(10)))
            .classifier(classifier)
            .analytics(Arc::new(CapturingRecorder::default()))
            .pricing(Arc::new(PricingTable::new("gpt-4o-mini", crate::pricing::default_model_rates(), Decimal::ZERO)))
            .build();

        let response = analyzer.analyze(&request("hello", "anyone.com")).await.unwrap();
        assert!(!response.cached);
    }
}
