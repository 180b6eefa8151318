//! OpenAI-compatible chat-completions client.
//!
//! Talks to OpenRouter by default; any server exposing `/chat/completions`
//! with the same wire format works by changing `base_url`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use chronicler_shared::{ChroniclerError, ModelConfig, Result};

use crate::model::{LanguageModel, ModelReply, ModelRequest};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat<'a> {
    JsonSchema { json_schema: JsonSchemaFormat<'a> },
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a serde_json::Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client over `reqwest`.
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterClient {
    /// Build a client. `api_key` comes from the env var named in config.
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChroniclerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.default_model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    #[instrument(skip_all, fields(task = %request.task, model = %self.model))]
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: 0.0,
            max_tokens: self.max_tokens,
            response_format: request.schema.as_ref().map(|s| ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: &s.name,
                    schema: &s.schema,
                    strict: false,
                },
            }),
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "chronicler")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChroniclerError::Timeout {
                        operation: request.task.as_str().to_string(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    ChroniclerError::Network(format!("model request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChroniclerError::MalformedOutput(format!("invalid completion body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChroniclerError::MalformedOutput("completion had no content".into()))?;

        let (tokens_in, tokens_out) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        debug!(
            tokens_in,
            tokens_out,
            latency_ms = started.elapsed().as_millis() as u64,
            "model call complete"
        );

        Ok(ModelReply {
            text,
            tokens_in,
            tokens_out,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Rate limits and server faults are worth retrying; other statuses are not.
fn status_error(status: StatusCode, detail: &str) -> ChroniclerError {
    let detail: String = detail.chars().take(300).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ChroniclerError::Network(format!("model endpoint returned {status}: {detail}"))
    } else {
        ChroniclerError::Model(format!("model endpoint returned {status}: {detail}"))
    }
}
