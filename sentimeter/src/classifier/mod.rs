//! Upstream text classification.
//!
//! A [`Classifier`] turns raw text into a [`TextAnalysis`] plus the token usage the
//! upstream reported. There are no retries at this layer: a failed call is reported
//! to the caller, which never charges for it.

pub mod openai;

pub use openai::OpenAiClassifier;

use crate::api::models::analysis::TextAnalysis;
use crate::pricing::TokenUsage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub analysis: TextAnalysis,
    pub usage: TokenUsage,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Network failure, timeout, non-2xx status or a reply without content
    #[error("{0}")]
    Upstream(String),

    /// The reply content was not the expected JSON document
    #[error("{message}")]
    Parse { message: String, raw: String },
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, model: &str) -> Result<Classification, ClassifierError>;
}
