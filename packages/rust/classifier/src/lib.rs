//! Client for the external classification capability.
//!
//! Speaks an OpenAI-compatible chat-completions protocol with the response
//! constrained to a JSON object. The pipeline only ever asks two kinds of
//! question (ingredient decomposition, category resolution); both arrive
//! here as plain prompt text plus a model id.
//!
//! Rate limiting (HTTP 429) is the one retryable condition: calls back off
//! exponentially, honoring `Retry-After`, up to a configured ceiling. Any
//! response whose content is not a JSON object is rejected rather than
//! passed through.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use foodprint_shared::{ClassifyConfig, FoodprintError, Result};

/// User-Agent string for classification requests.
const USER_AGENT: &str = concat!("foodprint/", env!("CARGO_PKG_VERSION"));

/// First backoff interval after a rate-limit response.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Request timeout per classification call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// ClassifierClient
// ---------------------------------------------------------------------------

/// HTTP client for schema-constrained classification calls.
#[derive(Debug, Clone)]
pub struct ClassifierClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl ClassifierClient {
    /// Build a client from runtime config, reading the API key from the
    /// configured environment variable.
    pub fn new(config: &ClassifyConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FoodprintError::config(format!(
                "classification API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;

        Self::from_parts(&config.base_url, &api_key, config.max_retries)
    }

    /// Build a client from explicit parts (used by tests against a mock server).
    pub fn from_parts(base_url: &str, api_key: &str, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FoodprintError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_retries,
        })
    }

    /// Ask the classifier one question and return the JSON object it answers
    /// with.
    ///
    /// Retries only rate-limit responses, with exponential backoff capped at
    /// `max_retries` attempts; every other failure surfaces immediately so the
    /// caller can isolate it at the item boundary. Content that does not parse
    /// as a JSON object is rejected as schema-nonconforming.
    pub async fn classify(
        &self,
        model: &str,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<serde_json::Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 0..=self.max_retries {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| FoodprintError::Network(format!("{url}: {e}")))?;

            let status = response.status();

            if status.as_u16() == 429 {
                if attempt == self.max_retries {
                    return Err(FoodprintError::RateLimited(format!(
                        "still rate limited after {} retries",
                        self.max_retries
                    )));
                }

                // Honor Retry-After when the server provides one.
                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                warn!(
                    attempt = attempt + 1,
                    max = self.max_retries,
                    wait_secs = wait.as_secs(),
                    "classification rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FoodprintError::Classify(format!(
                    "HTTP {status}: {}",
                    &body[..body.len().min(200)]
                )));
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| {
                FoodprintError::Classify(format!("invalid completion envelope: {e}"))
            })?;

            let content = parsed
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .ok_or_else(|| {
                    FoodprintError::Classify("completion contained no choices".into())
                })?;

            debug!(model, bytes = content.len(), "classification response received");

            return parse_schema_object(content);
        }

        unreachable!("retry loop always returns")
    }
}

/// Parse classifier message content, accepting only a JSON object.
/// Anything else is a schema violation the caller must handle, never
/// silently accepted.
fn parse_schema_object(content: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(content.trim()).map_err(|e| {
        FoodprintError::Classify(format!(
            "non-JSON response: {e} (got: {})",
            &content[..content.len().min(200)]
        ))
    })?;

    if !value.is_object() {
        return Err(FoodprintError::Classify(format!(
            "expected a JSON object, got: {}",
            &content[..content.len().min(200)]
        )));
    }

    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
