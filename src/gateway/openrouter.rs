//! OpenRouter adapter for chat completions, one-shot and streamed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream the completion, handing every content delta to `on_delta`.
    /// The returned response carries the full concatenated content.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_delta: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// OPENROUTER ADAPTER
// =============================================================================

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120), None)
    }

    /// Create from `OPENROUTER_*` environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        let app_title = std::env::var("OPENROUTER_APP_TITLE").ok();

        Self::with_config(api_key, base_url, timeout, app_title)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(ref t) = app_title {
            if let Ok(v) = HeaderValue::from_str(t) {
                headers.insert("X-Title", v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn is_refusal(msg: &str) -> bool {
        let l = msg.trim_start().to_lowercase();
        let first_line = l.lines().next().unwrap_or("");

        const PREFIXES: &[&str] = &[
            "i cannot",
            "i can't",
            "i won't",
            "i am unable to",
            "i'm unable to",
            "unable to comply",
            "unable to assist",
        ];

        PREFIXES.iter().any(|p| first_line.starts_with(p))
    }

    fn validate(req: &ChatRequest) -> Result<(), ProviderError> {
        let total_chars = req.input_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }
        Ok(())
    }

    async fn send(
        &self,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let messages: Vec<ApiMessage> = req.messages.iter().map(ApiMessage::from).collect();
        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), request_id, &body))
    }
}

fn status_error(status: u16, request_id: Option<String>, body: &str) -> ProviderError {
    let ctx = ErrorContext::new().with_status(status);
    let mut ctx = match request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    };

    let mut message = format!("HTTP {status}");
    if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(body) {
        if let Some(error) = parsed.error {
            if let Some(code) = error.code {
                ctx = ctx.with_code(code);
            }
            if let Some(m) = error.message {
                message = m;
            }
        }
    }

    match status {
        429 => ProviderError::rate_limited(Duration::from_secs(30), ctx),
        _ => ProviderError::provider_with_context("openrouter", message, status >= 500, ctx),
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    delta: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

// =============================================================================
// SSE
// =============================================================================

/// One parsed line of a server-sent event stream.
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Chunk {
        delta: String,
        finish_reason: Option<String>,
        usage: Option<(u32, u32)>,
    },
    Done,
    Ignore,
}

pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine, ProviderError> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        // Comments (": OPENROUTER PROCESSING"), event names and blank separators.
        return Ok(SseLine::Ignore);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Ignore);
    }

    let parsed: ChatApiResponse = serde_json::from_str(data).map_err(|e| {
        ProviderError::provider("openrouter", format!("Invalid stream chunk: {e}"), false)
    })?;
    if let Some(error) = parsed.error {
        return Err(ProviderError::provider(
            "openrouter",
            error.message.unwrap_or_default(),
            false,
        ));
    }

    let (delta, finish_reason) = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .map(|c| {
            let delta = c.delta.and_then(|d| d.content).unwrap_or_default();
            (delta, c.finish_reason)
        })
        .unwrap_or_default();
    let usage = parsed.usage.map(|u| {
        (
            u.prompt_tokens.unwrap_or(0),
            u.completion_tokens.unwrap_or(0),
        )
    });

    Ok(SseLine::Chunk {
        delta,
        finish_reason,
        usage,
    })
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Self::validate(req)?;
        let start = Instant::now();

        let mut response = self.send(req, false).await?;

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openrouter",
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes);

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("openrouter", format!("Invalid JSON: {e}"), false)
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if Self::is_refusal(&message) {
                return Err(ProviderError::refused(message));
            }
            return Err(ProviderError::provider("openrouter", message, false));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider("openrouter", "No choices in response", false))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        if Self::is_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            cost_nanodollars: chat_cost(req.model.model_id(), input_tokens, output_tokens),
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_delta: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, ProviderError> {
        Self::validate(req)?;
        let start = Instant::now();

        let mut response = self.send(req, true).await?;

        let mut pending: Vec<u8> = Vec::new();
        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = (0u32, 0u32);

        'read: while let Some(chunk) = response.chunk().await? {
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
                match parse_sse_line(&line)? {
                    SseLine::Done => break 'read,
                    SseLine::Ignore => {}
                    SseLine::Chunk {
                        delta,
                        finish_reason: reason,
                        usage: chunk_usage,
                    } => {
                        if !delta.is_empty() {
                            if content.len() + delta.len() > MAX_RESPONSE_LEN {
                                return Err(ProviderError::provider(
                                    "openrouter",
                                    "Streamed response too large",
                                    false,
                                ));
                            }
                            on_delta(&delta);
                            content.push_str(&delta);
                        }
                        if reason.is_some() {
                            finish_reason = reason;
                        }
                        if let Some(u) = chunk_usage {
                            usage = u;
                        }
                    }
                }
            }
        }

        if Self::is_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        Ok(ChatResponse {
            content,
            input_tokens: usage.0,
            output_tokens: usage.1,
            cost_nanodollars: chat_cost(req.model.model_id(), usage.0, usage.1),
            latency: start.elapsed(),
            finish_reason: FinishReason::from(finish_reason),
        })
    }
}
