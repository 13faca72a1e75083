use crate::config::ServicesConfig;
use crate::history::{Role, Turn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when the backend answers 2xx but carries no message content.
pub const FALLBACK_ANSWER: &str = "Sorry, I could not generate an answer right now.";

/// OpenAI-style chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role, turn.content.clone())
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct LLMClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    base_delay_ms: u64,
}

impl LLMClient {
    pub fn new(services: &ServicesConfig, api_key: Option<String>) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(services.request_timeout())
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                services.llm_url.trim_end_matches('/')
            ),
            model: services.llm_model.clone(),
            api_key,
            max_retries: services.max_retries,
            base_delay_ms: 1000,
        })
    }

    /// Base delay of the exponential backoff between attempts
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut last_error = None;

        // One initial attempt plus up to `max_retries` retries
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tracing::warn!(
                    "[LLMClient] Retrying completion (retry {}/{}) after {}ms delay",
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }

            let mut builder = self.client.post(&self.endpoint).json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("[LLMClient] HTTP request failed: {}", e);
                    last_error = Some(CompletionError::Transport(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::warn!("[LLMClient] API returned error status {}: {}", status, body);
                last_error = Some(CompletionError::Status {
                    status: status.as_u16(),
                    body,
                });
                continue;
            }

            let chat_response = match response.json::<ChatResponse>().await {
                Ok(cr) => cr,
                Err(e) => {
                    tracing::warn!("[LLMClient] Failed to decode response body: {}", e);
                    last_error = Some(CompletionError::Decode(e.to_string()));
                    continue;
                }
            };

            let answer = chat_response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message)
                .and_then(|m| m.content);

            return Ok(answer.unwrap_or_else(|| {
                tracing::warn!("[LLMClient] Response carried no message content");
                FALLBACK_ANSWER.to_string()
            }));
        }

        Err(last_error
            .unwrap_or_else(|| CompletionError::Transport("all retry attempts failed".to_string())))
    }
}
