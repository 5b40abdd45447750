//! Structured-output VLM interaction.
//!
//! [`StructuredModel`] is the seam between a parser and the remote endpoint:
//! given a prompt, an image and a schema, return JSON. The production
//! implementation, [`OpenAiCompatibleModel`], posts to an OpenAI-compatible
//! `chat/completions` endpoint (the hosted Gemini API by default) with
//! `response_format = json_schema`, so the endpoint constrains the answer to
//! the schema server-side.
//!
//! ## Request layout
//!
//! One user message with two content parts: the instruction text, then the
//! page as a data-URI `image_url`. Temperature defaults to 0.
//!
//! ## Failure handling
//!
//! Nothing is retried here. Transport errors, non-2xx responses, refusals and
//! unparseable content all surface as [`VisionParserError::RemoteParsing`],
//! except credential rejections, which
//! [`crate::error::classify_remote_failure`] turns into
//! [`VisionParserError::AuthenticationFailed`].

use crate::config::{ApiKey, ParserConfig};
use crate::error::{classify_remote_failure, VisionParserError};
use crate::pipeline::encode::EncodedImage;
use crate::schema::Schema;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a structured-output call needs.
#[derive(Debug, Clone, Copy)]
pub struct StructuredRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a EncodedImage,
    pub schema_name: &'a str,
    pub schema: &'a Schema,
}

/// A model that answers an image + prompt with JSON shaped by a schema.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Run one extraction. Returns the model's raw JSON answer.
    async fn extract(&self, request: StructuredRequest<'_>) -> Result<Value, VisionParserError>;
}

// ── OpenAI-compatible client ─────────────────────────────────────────────

/// `reqwest`-backed client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: ApiKey,
    model: String,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl OpenAiCompatibleModel {
    /// Build a client from the config's endpoint, model and timeout settings.
    pub fn new(api_key: ApiKey, config: &ParserConfig) -> Result<Self, VisionParserError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VisionParserError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleModel")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[async_trait]
impl StructuredModel for OpenAiCompatibleModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn extract(&self, request: StructuredRequest<'_>) -> Result<Value, VisionParserError> {
        let start = Instant::now();
        let body = build_request_body(&self.model, self.temperature, self.max_tokens, request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let status = e.status().map(|s| s.as_u16());
                classify_remote_failure(status, e.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| VisionParserError::RemoteParsing {
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            let message = error_message_from_body(&text)
                .unwrap_or_else(|| format!("HTTP {status}: {}", truncate(&text, 500)));
            warn!("Model endpoint returned {}: {}", status, message);
            return Err(classify_remote_failure(Some(status.as_u16()), message));
        }

        let value = parse_completion(&text)?;
        debug!(
            "{}: structured response for '{}' in {:?}",
            self.model,
            request.schema_name,
            start.elapsed()
        );
        Ok(value)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ── Helpers ──────────────────────────────────────────────────────────────

static SCHEMA_NAME_INVALID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static regex"));

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*\n?(.*?)\n?\s*```\s*$").expect("static regex"));

/// `{base_url}/chat/completions`, tolerant of a trailing slash.
pub fn completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// `response_format.json_schema.name` allows `[A-Za-z0-9_-]{1,64}`.
pub fn wire_schema_name(name: &str) -> String {
    let cleaned = SCHEMA_NAME_INVALID.replace_all(name, "_");
    let mut cleaned: String = cleaned.chars().take(64).collect();
    if cleaned.is_empty() {
        cleaned.push_str("schema");
    }
    cleaned
}

pub(crate) fn build_request_body<'a>(
    model: &'a str,
    temperature: f32,
    max_tokens: Option<usize>,
    request: StructuredRequest<'a>,
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        temperature,
        max_tokens,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text {
                    text: request.prompt,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.data_uri(),
                    },
                },
            ],
        }],
        response_format: ResponseFormat {
            kind: "json_schema",
            json_schema: JsonSchemaFormat {
                name: wire_schema_name(request.schema_name),
                description: request.schema.description(),
                schema: request.schema.as_value(),
            },
        },
    }
}

/// Pull the JSON answer out of a successful completion body.
pub(crate) fn parse_completion(body: &str) -> Result<Value, VisionParserError> {
    let remote = |message: String| VisionParserError::RemoteParsing { message };

    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| remote(format!("malformed completion response: {e}")))?;

    if let Some(ref usage) = response.usage {
        debug!(
            "{} input tokens, {} output tokens",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| remote("completion contained no choices".into()))?;

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
        return Err(remote(format!("model refused: {refusal}")));
    }

    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        let reason = choice.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(remote(format!("empty completion (finish_reason: {reason})")));
    }

    serde_json::from_str(strip_json_fences(&content))
        .map_err(|e| remote(format!("model output is not valid JSON: {e}")))
}

/// Some endpoints wrap structured output in a ```json fence anyway.
pub fn strip_json_fences(content: &str) -> &str {
    match JSON_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}

/// Extract `error.message` from an error body; Gemini sometimes wraps the
/// object in a one-element array.
pub(crate) fn error_message_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    let error = obj.get("error")?;
    match error {
        Value::String(s) => Some(s.clone()),
        _ => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}…")
    }
}
