//! Classifier backed by an OpenAI-compatible chat completions endpoint.

use super::{Classification, Classifier, ClassifierError};
use crate::api::models::analysis::TextAnalysis;
use crate::config::ClassifierConfig;
use crate::pricing::TokenUsage;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, instrument};
use url::Url;

const SYSTEM_PROMPT: &str = r#"You are a text analysis engine. Analyze the user's text and reply with a single JSON object and nothing else, no prose and no markdown.

The object must have exactly this shape:
{
  "language": "<ISO 639-1 code of the text's language>",
  "sentiment": { "score": <number from -1 (very negative) to 1 (very positive)>, "sentiment": "positive" | "neutral" | "negative" },
  "profanity": { "score": <number >= 0, 0 when there is none>, "words": [<profane words in order of appearance>] },
  "intents": [<one or more intent labels>]
}

Intent rules:
- Anything about an order (status, delivery, tracking, changes) includes "order_status".
- A complaint about an order includes both "order_status" and "new_complaint".
- A question about an existing complaint is "complaint_status".
- A general question is "information".
- Anything else is "others"."#;

/// Chat completion reply, reduced to the fields we read
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UpstreamUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build classifier HTTP client: {e}"))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    #[instrument(skip(self, text), fields(text_chars = text.chars().count()))]
    async fn classify(&self, text: &str, model: &str) -> Result<Classification, ClassifierError> {
        let body = json!({
            "model": model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text },
            ],
        });

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "failed" };
            ClassifierError::Upstream(format!("Classification request {reason}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Upstream(format!(
                "Classifier returned {status}: {}",
                truncate(&detail, 500)
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ClassifierError::Upstream(format!("Failed to read classifier response: {e}")))?;

        let completion: ChatCompletion = serde_json::from_str(&raw).map_err(|e| {
            error!(text = %text, raw = %raw, "Classifier response is not a chat completion");
            ClassifierError::Parse {
                message: format!("Response is not a chat completion: {e}"),
                raw: raw.clone(),
            }
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClassifierError::Upstream("Classifier returned no message content".to_string()))?;

        let analysis = parse_analysis(&content).map_err(|message| {
            error!(text = %text, raw = %content, "Failed to parse classification");
            ClassifierError::Parse {
                message,
                raw: content.clone(),
            }
        })?;

        let usage = completion
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        debug!(prompt_tokens = usage.prompt_tokens, completion_tokens = usage.completion_tokens, "Classified text");

        Ok(Classification { analysis, usage })
    }
}

/// Parse the model's JSON reply, tolerating a surrounding markdown code fence.
fn parse_analysis(content: &str) -> Result<TextAnalysis, String> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str::<TextAnalysis>(unfenced.trim())
        .map(TextAnalysis::clamped)
        .map_err(|e| format!("Invalid classification JSON: {e}"))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::analysis::SentimentLabel;
    use crate::test_utils::classifier_config;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 999 }
        })
    }

    const ANALYSIS: &str = r#"{"language":"en","sentiment":{"score":0.8,"sentiment":"positive"},"profanity":{"score":0,"words":[]},"intents":["information"]}"#;

    #[tokio::test]
    async fn test_classify_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "temperature": 0,
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(ANALYSIS)))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = OpenAiClassifier::new(&classifier_config(&format!("{}/v1", server.uri()))).unwrap();
        let classification = classifier.classify("I love it", "gpt-4o-mini").await.unwrap();

        assert_eq!(classification.analysis.language, "en");
        assert_eq!(classification.analysis.sentiment.sentiment, SentimentLabel::Positive);
        assert_eq!(classification.analysis.intents, vec!["information".to_string()]);
        // Total is derived, not taken from upstream
        assert_eq!(classification.usage, TokenUsage::new(120, 40));
    }

    #[tokio::test]
    async fn test_repeated_intents_are_collapsed() {
        let server = MockServer::start().await;
        let content = r#"{"language":"en","sentiment":{"score":-0.6,"sentiment":"negative"},"intents":["order_status","new_complaint","order_status"]}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
            .mount(&server)
            .await;

        let classifier = OpenAiClassifier::new(&classifier_config(&server.uri())).unwrap();
        let classification = classifier.classify("Where is my order? It is late again", "gpt-4o-mini").await.unwrap();

        assert_eq!(classification.analysis.intents, vec!["order_status", "new_complaint"]);
    }

    #[tokio::test]
    async fn test_non_json_content_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("The text is positive.")))
            .mount(&server)
            .await;

        let classifier = OpenAiClassifier::new(&classifier_config(&server.uri())).unwrap();
        let err = classifier.classify("I love it", "gpt-4o-mini").await.unwrap_err();

        match err {
            ClassifierError::Parse { raw, .. } => assert_eq!(raw, "The text is positive."),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let classifier = OpenAiClassifier::new(&classifier_config(&server.uri())).unwrap();
        let err = classifier.classify("hello", "gpt-4o-mini").await.unwrap_err();

        assert!(matches!(err, ClassifierError::Upstream(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_timeout_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(ANALYSIS))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut config = classifier_config(&server.uri());
        config.timeout = Duration::from_millis(100);
        let classifier = OpenAiClassifier::new(&config).unwrap();

        let err = classifier.classify("hello", "gpt-4o-mini").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Upstream(ref msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_parse_tolerates_code_fences() {
        let fenced = format!("```json\n{ANALYSIS}\n```");
        assert!(parse_analysis(&fenced).is_ok());
        assert!(parse_analysis(ANALYSIS).is_ok());
        assert!(parse_analysis("{\"language\": \"en\"}").is_err());
    }
}
