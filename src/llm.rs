//! Text-generation client abstraction.
//!
//! Defines the [`Summarizer`] trait and its implementations:
//! - **[`GeminiSummarizer`]**: one `generateContent` call against the Gemini
//!   REST API per request.
//! - **[`DisabledSummarizer`]**: fails every call; used when no provider or
//!   API key is configured.
//!
//! Use [`create_summarizer`] to pick one from configuration. The client does no
//! truncation and no retries: callers hand it a finished prompt and get back
//! the model's text verbatim or an error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, API_KEY_ENV};

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarization is disabled (set GEMINI_API_KEY and llm.provider = \"gemini\")")]
    Disabled,
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("response contained no text")]
    EmptyResponse,
}

/// A backend that turns a prompt into generated text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Model identifier, for logs and the dashboard.
    fn model_name(&self) -> &str;

    /// Sends `prompt` once and returns the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, SummarizeError>;
}

/// Builds the summarizer described by `[llm]` and the environment.
pub fn create_summarizer(config: &Config) -> anyhow::Result<Arc<dyn Summarizer>> {
    let summarizer: Arc<dyn Summarizer> = match (&config.secrets.api_key, config.llm.is_enabled()) {
        (Some(key), true) => Arc::new(
            GeminiSummarizer::new(
                key.clone(),
                config.llm.model.clone(),
                config.llm.base_url.clone(),
                Duration::from_secs(config.llm.timeout_secs),
            )
            .context("Failed to build Gemini HTTP client")?,
        ),
        (None, true) => {
            warn!("{} not set; summarization disabled", API_KEY_ENV);
            Arc::new(DisabledSummarizer)
        }
        _ => Arc::new(DisabledSummarizer),
    };
    Ok(summarizer)
}

// ============ Disabled ============

pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, SummarizeError> {
        Err(SummarizeError::Disabled)
    }
}

// ============ Gemini ============

/// Client for `POST {base_url}/v1beta/models/{model}:generateContent`.
pub struct GeminiSummarizer {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiSummarizer {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizeError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "calling generateContent");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Api { status, body });
        }

        let json: serde_json::Value = response.json().await?;
        parse_generate_response(&json)
    }
}

/// Concatenates the text parts of the first candidate.
fn parse_generate_response(json: &serde_json::Value) -> Result<String, SummarizeError> {
    let text: String = json
        .pointer("/candidates/0/content/parts")
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(SummarizeError::EmptyResponse);
    }
    Ok(text)
}

// ============ Prompts ============

pub const URL_SUMMARY_INSTRUCTION: &str =
    "Generate a concise professional summary in bullet points of the following content:";

pub const PDF_SUMMARY_INSTRUCTION: &str =
    "Generate a concise professional summary in bullet points of the following document:";

pub const DIGEST_INSTRUCTION: &str = "Create a digest of the following RSS feed entries. \
     Group related stories and summarize the key developments in bullet points:";

/// Instruction and already-capped content, separated by a blank line.
pub fn build_prompt(instruction: &str, content: &str) -> String {
    format!("{}\n\n{}", instruction, content)
}

/// Prompt for answering `question` from `document` (already capped).
pub fn build_qa_prompt(document: &str, question: &str) -> String {
    format!(
        "Answer the question using only the document below. \
         If the document does not contain the answer, say so.\n\n\
         Document:\n{}\n\nQuestion: {}",
        document, question
    )
}
