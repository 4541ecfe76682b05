//! Test utilities for integration testing (available with `test-utils` feature).

use crate::analytics::{AnalyticsRecorder, UsageEvent};
use crate::analyzer::Analyzer;
use crate::api::models::analysis::{AnalysisResult, Profanity, RequestDetails, Sentiment, SentimentLabel, TextAnalysis};
use crate::cache::{MokaResultCache, ResultCache};
use crate::classifier::{Classification, Classifier, ClassifierError};
use crate::config::{ClassifierConfig, Config};
use crate::ledger::InMemoryLedger;
use crate::pricing::{PricingTable, TokenUsage};
use crate::{AppState, build_router};
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

pub fn sample_analysis() -> TextAnalysis {
    TextAnalysis {
        language: "en".to_string(),
        sentiment: Sentiment {
            score: 0.8,
            sentiment: SentimentLabel::Positive,
        },
        profanity: Profanity::default(),
        intents: vec!["information".to_string()],
    }
}

pub fn sample_classification() -> Classification {
    Classification {
        analysis: sample_analysis(),
        usage: TokenUsage::new(120, 40),
    }
}

/// A priced result for the default model, as the analyzer would assemble it.
pub fn sample_result(host: &str) -> AnalysisResult {
    let config = create_test_config();
    let pricing = PricingTable::from_config(&config.pricing, &config.billing);
    let classification = sample_classification();
    let cost = pricing.cost_for(pricing.default_model(), &classification.usage);

    AnalysisResult::assemble(
        classification.analysis,
        classification.usage,
        cost,
        RequestDetails {
            model: pricing.default_model().to_string(),
            timestamp: Utc::now(),
            host: host.to_string(),
        },
    )
}

pub fn sample_event(host: &str, cached: bool) -> UsageEvent {
    UsageEvent::from_result(host, "I love this product", &sample_result(host), cached, Duration::from_millis(25))
}

pub fn classifier_config(base_url: &str) -> ClassifierConfig {
    ClassifierConfig {
        base_url: Url::parse(base_url).expect("valid mock server URL"),
        api_key: Some("sk-test".to_string()),
        timeout: Duration::from_secs(5),
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        // axum-prometheus installs a global recorder, which can only happen once per process
        enable_metrics: false,
        ..Default::default()
    }
}

/// Classifier that replays queued outcomes, then falls back to [`sample_classification`].
#[derive(Default)]
pub struct MockClassifier {
    queued: Mutex<VecDeque<Result<Classification, ClassifierError>>>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<Classification, ClassifierError>) {
        self.queued.lock().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, _text: &str, _model: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queued.lock().pop_front().unwrap_or_else(|| Ok(sample_classification()))
    }
}

/// Recorder that keeps every event in memory.
#[derive(Default)]
pub struct CapturingRecorder {
    events: Mutex<Vec<UsageEvent>>,
}

impl CapturingRecorder {
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }
}

impl AnalyticsRecorder for CapturingRecorder {
    fn record(&self, event: UsageEvent) {
        self.events.lock().push(event);
    }
}

/// A router over in-memory components, with handles to inspect them.
pub struct TestApp {
    pub server: TestServer,
    pub ledger: Arc<InMemoryLedger>,
    pub cache: Arc<dyn ResultCache>,
    pub classifier: Arc<MockClassifier>,
    pub analytics: Arc<CapturingRecorder>,
}

pub fn create_test_app() -> TestApp {
    let config = create_test_config();
    let ledger = Arc::new(InMemoryLedger::new());
    let cache: Arc<dyn ResultCache> = Arc::new(MokaResultCache::new(config.cache.max_capacity));
    let classifier = Arc::new(MockClassifier::new());
    let analytics = Arc::new(CapturingRecorder::default());

    let analyzer = Analyzer::builder()
        .ledger(ledger.clone())
        .cache(cache.clone())
        .classifier(classifier.clone())
        .analytics(analytics.clone())
        .pricing(Arc::new(PricingTable::from_config(&config.pricing, &config.billing)))
        .cache_hit_discount(config.billing.cache_hit_discount)
        .max_batch_size(config.limits.max_batch_size)
        .max_text_chars(config.limits.max_text_chars)
        .build();

    let state = AppState::builder()
        .config(config)
        .analyzer(analyzer)
        .ledger(ledger.clone())
        .cache(cache.clone())
        .build();

    let router = build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        ledger,
        cache,
        classifier,
        analytics,
    }
}
