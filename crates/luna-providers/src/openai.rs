//! OpenAI chat-completions provider.
//!
//! Talks directly to `/chat/completions`; streams arrive as `data:` deltas
//! terminated by `data: [DONE]`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use luna_core::config::ProviderConfig;
use luna_core::error::Result;
use luna_core::types::{
    Credential, GenerationRequest, GenerationResponse, ProviderId, ReasoningEffort, Usage,
};

use crate::client::{stream_error, HttpEndpoint};
use crate::stream::ChunkEmitter;
use crate::traits::{ChunkSink, LlmProvider};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

pub static OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-5",
    "gpt-5-mini",
    "o1",
    "o3-mini",
    "o4-mini",
];

// ─────────────────────────────────────────────
// Model family tables
// ─────────────────────────────────────────────

/// Name of the token-limit field in the request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenParam {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenParam::MaxTokens => "max_tokens",
            TokenParam::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Families that reject `max_tokens`. Anything unlisted uses `max_tokens`.
static TOKEN_PARAM_FAMILIES: &[(&str, TokenParam)] = &[
    ("gpt-5", TokenParam::MaxCompletionTokens),
    ("gpt-4.1", TokenParam::MaxCompletionTokens),
    ("o1", TokenParam::MaxCompletionTokens),
    ("o3", TokenParam::MaxCompletionTokens),
    ("o4", TokenParam::MaxCompletionTokens),
];

/// Families that accept `reasoning_effort`. They reject the sampling
/// parameters (`temperature`, `top_p`, penalties).
static REASONING_FAMILIES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

pub fn token_param(model: &str) -> TokenParam {
    TOKEN_PARAM_FAMILIES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, param)| *param)
        .unwrap_or(TokenParam::MaxTokens)
}

pub fn supports_reasoning_effort(model: &str) -> bool {
    REASONING_FAMILIES.iter().any(|prefix| model.starts_with(prefix))
}

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiChoice {
    message: Option<ApiMessage>,
    delta: Option<ApiMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiCompletion {
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

fn build_body(request: &GenerationRequest, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert(
        "messages".into(),
        Value::Array(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect(),
        ),
    );

    if let Some(n) = request.max_tokens {
        body.insert(token_param(&request.model).as_str().into(), json!(n));
    }

    let sampling = [
        ("temperature", request.temperature),
        ("top_p", request.top_p),
        ("frequency_penalty", request.frequency_penalty),
        ("presence_penalty", request.presence_penalty),
    ];
    if supports_reasoning_effort(&request.model) {
        if sampling.iter().any(|(_, v)| v.is_some()) {
            debug!(model = %request.model, "Reasoning model; sampling parameters not sent");
        }
    } else {
        for (key, value) in sampling {
            if let Some(v) = value {
                body.insert(key.into(), json!(v));
            }
        }
    }
    match request.reasoning_effort {
        Some(ReasoningEffort::None) | None => {}
        Some(effort) if supports_reasoning_effort(&request.model) => {
            body.insert("reasoning_effort".into(), json!(effort.as_str()));
        }
        Some(_) => debug!(model = %request.model, "Model ignores reasoning_effort; not sent"),
    }
    if stream {
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({ "include_usage": true }));
    }

    for (key, value) in &request.extra {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

// ─────────────────────────────────────────────
// OpenAiProvider
// ─────────────────────────────────────────────

#[derive(Debug)]
pub struct OpenAiProvider {
    endpoint: HttpEndpoint,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint::new(ProviderId::OpenAi, config, OPENAI_API_BASE, OPENAI_MODELS),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn default_model(&self) -> &str {
        OPENAI_DEFAULT_MODEL
    }

    fn available_models(&self) -> Vec<String> {
        self.endpoint.catalog()
    }

    fn has_system_credential(&self) -> bool {
        self.endpoint.has_system_key()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<GenerationResponse> {
        self.check_model(&request.model)?;
        let api_key = self.endpoint.api_key(credential)?;
        let model = request.model.as_str();

        debug!(
            provider = "openai",
            model,
            messages = request.messages.len(),
            "Calling LLM"
        );

        let http = self
            .endpoint
            .post("/chat/completions")
            .bearer_auth(api_key)
            .json(&build_body(request, false));
        let response = self.endpoint.send(http, model).await?;

        let completion: ApiCompletion = response.json().await.map_err(|e| {
            error!(provider = "openai", error = %e, "Failed to parse LLM response");
            self.endpoint.call_failed(model, None, format!("invalid response body: {}", e))
        })?;

        let choice = completion.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        debug!(
            provider = "openai",
            chars = content.len(),
            finish_reason = finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );

        Ok(GenerationResponse {
            content,
            model: completion.model.unwrap_or_else(|| model.to_string()),
            usage: completion
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            finish_reason,
        })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut ChunkSink<'_>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        self.check_model(&request.model)?;
        let api_key = self.endpoint.api_key(credential)?;
        let model = request.model.as_str();

        debug!(provider = "openai", model, "Starting stream");

        let http = self
            .endpoint
            .post("/chat/completions")
            .bearer_auth(api_key)
            .json(&build_body(request, true));
        let response = self.endpoint.send(http, model).await?;

        let mut emitter = ChunkEmitter::new(ProviderId::OpenAi, model, on_chunk);
        self.endpoint
            .read_events(response, model, |event| {
                let data = event.data.trim();
                if data == "[DONE]" {
                    return Ok(true);
                }
                if data.is_empty() {
                    return Ok(false);
                }
                if let Some(message) = stream_error(data) {
                    error!(provider = "openai", model, error = %message, "Stream error event");
                    return Err(self.endpoint.call_failed(model, None, message));
                }
                match serde_json::from_str::<ApiCompletion>(data) {
                    Ok(chunk) => {
                        for choice in chunk.choices {
                            if let Some(text) = choice.delta.and_then(|d| d.content) {
                                emitter.text(&text);
                            }
                        }
                        if let Some(u) = chunk.usage {
                            emitter.record_usage(Some(u.prompt_tokens), Some(u.completion_tokens));
                        }
                    }
                    Err(e) => debug!(provider = "openai", error = %e, "Skipping unparsable stream event"),
                }
                Ok(false)
            })
            .await?;

        emitter.finish();
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
