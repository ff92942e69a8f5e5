//! Anthropic Messages API provider.
//!
//! The system prompt travels out-of-band and `max_tokens` is mandatory.
//! Streams are event-typed rather than chunk-typed, so a small state machine
//! ([`MessageStream`]) turns them into text chunks plus a usage total.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use luna_core::config::ProviderConfig;
use luna_core::error::{LlmError, Result};
use luna_core::types::{
    Credential, GenerationRequest, GenerationResponse, ProviderId, ReasoningEffort, Role, Usage,
};

use crate::client::HttpEndpoint;
use crate::sse::SseEvent;
use crate::stream::ChunkEmitter;
use crate::traits::{ChunkSink, LlmProvider};

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub static ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
];

// ─────────────────────────────────────────────
// Model family tables
// ─────────────────────────────────────────────

/// `max_tokens` sent when the caller sets none.
static MAX_TOKENS_DEFAULTS: &[(&str, u32)] = &[
    ("claude-3-haiku", 4096),
    ("claude-3-5-haiku", 8192),
    ("claude-3-5-sonnet", 8192),
    ("claude-3-7-sonnet", 8192),
    ("claude-sonnet-4", 8192),
    ("claude-opus-4", 8192),
];

const FALLBACK_MAX_TOKENS: u32 = 4096;

/// Families with extended thinking.
static THINKING_FAMILIES: &[&str] = &["claude-3-7", "claude-sonnet-4", "claude-opus-4"];

pub fn default_max_tokens(model: &str) -> u32 {
    MAX_TOKENS_DEFAULTS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, n)| *n)
        .unwrap_or(FALLBACK_MAX_TOKENS)
}

/// Extended-thinking budget for `effort`, if the model supports it.
pub fn thinking_budget(model: &str, effort: ReasoningEffort) -> Option<u32> {
    if !THINKING_FAMILIES.iter().any(|f| model.starts_with(f)) {
        return None;
    }
    match effort {
        ReasoningEffort::None => None,
        ReasoningEffort::Low => Some(1024),
        ReasoningEffort::Medium => Some(4096),
        ReasoningEffort::High => Some(16384),
    }
}

fn build_body(request: &GenerationRequest, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert(
        "messages".into(),
        Value::Array(
            request
                .turns()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect(),
        ),
    );

    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    if !system.is_empty() {
        body.insert("system".into(), json!(system.join("\n\n")));
    }

    let mut max_tokens = request
        .max_tokens
        .unwrap_or_else(|| default_max_tokens(&request.model));
    let thinking = request
        .reasoning_effort
        .and_then(|effort| thinking_budget(&request.model, effort));

    match thinking {
        Some(budget) => {
            // The budget must fit inside max_tokens
            if max_tokens <= budget {
                max_tokens = budget + FALLBACK_MAX_TOKENS;
            }
            body.insert(
                "thinking".into(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
        }
        None => {
            if let Some(t) = request.temperature {
                body.insert("temperature".into(), json!(t));
            }
            if let Some(p) = request.top_p {
                body.insert("top_p".into(), json!(p));
            }
            if let Some(k) = request.top_k {
                body.insert("top_k".into(), json!(k));
            }
        }
    }
    body.insert("max_tokens".into(), json!(max_tokens));

    if stream {
        body.insert("stream".into(), json!(true));
    }
    for (key, value) in &request.extra {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct ApiUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiMessage {
    model: Option<String>,
    content: Vec<ApiContentBlock>,
    stop_reason: Option<String>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: ApiMessage,
    },
    ContentBlockStart {
        #[serde(default)]
        index: usize,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<ApiUsage>,
    },
    MessageStop {
        #[serde(default)]
        usage: Option<ApiUsage>,
    },
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

// ─────────────────────────────────────────────
// Stream state machine
// ─────────────────────────────────────────────

/// Where the stream is between events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitingMessage,
    InMessage,
    InBlock(usize),
    Stopped,
}

/// Folds Anthropic stream events into chunks on a [`ChunkEmitter`].
#[derive(Debug)]
struct MessageStream {
    phase: Phase,
}

impl MessageStream {
    fn new() -> Self {
        Self {
            phase: Phase::AwaitingMessage,
        }
    }

    /// Apply one event. Returns `Ok(true)` once the message has stopped.
    fn apply(&mut self, event: StreamEvent, emitter: &mut ChunkEmitter<'_, '_>) -> std::result::Result<bool, ApiError> {
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(u) = message.usage {
                    emitter.record_usage(u.input_tokens, u.output_tokens);
                }
                self.phase = Phase::InMessage;
            }
            StreamEvent::ContentBlockStart { index } => {
                self.phase = Phase::InBlock(index);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if self.phase != Phase::InBlock(index) {
                    debug!(index, phase = ?self.phase, "Delta outside its content block");
                }
                // Only text deltas reach the caller; thinking and tool JSON do not.
                if let BlockDelta::TextDelta { text } = delta {
                    emitter.text(&text);
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if self.phase != Phase::InBlock(index) {
                    debug!(index, phase = ?self.phase, "Stop for a block that is not open");
                }
                self.phase = Phase::InMessage;
            }
            // Usage arrives in both; the latest non-empty counters win.
            StreamEvent::MessageDelta { usage } | StreamEvent::MessageStop { usage } => {
                if let Some(u) = usage {
                    emitter.record_usage(u.input_tokens, u.output_tokens);
                }
            }
            StreamEvent::Ping | StreamEvent::Unknown => {}
            StreamEvent::Error { error } => return Err(error),
        }
        Ok(false)
    }

    /// Apply one event, finishing the message on `message_stop`.
    fn handle(&mut self, event: StreamEvent, emitter: &mut ChunkEmitter<'_, '_>) -> std::result::Result<bool, ApiError> {
        let stop = matches!(event, StreamEvent::MessageStop { .. });
        self.apply(event, emitter)?;
        if stop {
            self.phase = Phase::Stopped;
            emitter.finish();
        }
        Ok(stop)
    }
}

/// Decode one SSE event. The JSON `type` wins; the SSE `event:` name is the
/// fallback for payloads without one.
fn decode_event(event: &SseEvent) -> Option<StreamEvent> {
    let data = event.data.trim();
    if data.is_empty() {
        return None;
    }
    let mut value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(provider = "anthropic", error = %e, "Skipping unparsable stream event");
            return None;
        }
    };
    if value.get("type").is_none() {
        if let (Some(name), Some(obj)) = (event.event.as_deref(), value.as_object_mut()) {
            obj.insert("type".into(), json!(name));
        }
    }
    match serde_json::from_value(value) {
        Ok(ev) => Some(ev),
        Err(e) => {
            debug!(provider = "anthropic", error = %e, "Skipping malformed stream event");
            None
        }
    }
}

// ─────────────────────────────────────────────
// AnthropicProvider
// ─────────────────────────────────────────────

#[derive(Debug)]
pub struct AnthropicProvider {
    endpoint: HttpEndpoint,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint::new(
                ProviderId::Anthropic,
                config,
                ANTHROPIC_API_BASE,
                ANTHROPIC_MODELS,
            ),
        }
    }

    fn messages_request(&self, api_key: &str, body: &Value) -> reqwest::RequestBuilder {
        self.endpoint
            .post("/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }

    fn stream_error(&self, model: &str, error: ApiError) -> LlmError {
        error!(
            provider = "anthropic",
            model,
            kind = %error.kind,
            message = %error.message,
            "Stream error event"
        );
        let message = if error.kind == "not_found_error" || crate::client::is_model_not_found(&error.message) {
            crate::client::MODEL_NOT_FOUND.to_string()
        } else {
            error.message
        };
        self.endpoint.call_failed(model, None, message)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn default_model(&self) -> &str {
        ANTHROPIC_DEFAULT_MODEL
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
            provider = "anthropic",
            model,
            messages = request.messages.len(),
            "Calling LLM"
        );

        let http = self.messages_request(api_key, &build_body(request, false));
        let response = self.endpoint.send(http, model).await?;

        let message: ApiMessage = response.json().await.map_err(|e| {
            error!(provider = "anthropic", error = %e, "Failed to parse LLM response");
            self.endpoint.call_failed(model, None, format!("invalid response body: {}", e))
        })?;

        let content: String = message
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        if content.is_empty() {
            warn!(provider = "anthropic", model, "Response contained no text blocks");
        }

        Ok(GenerationResponse {
            content,
            model: message.model.unwrap_or_else(|| model.to_string()),
            usage: message.usage.map(|u| {
                Usage::new(u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0))
            }),
            finish_reason: message.stop_reason,
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

        debug!(provider = "anthropic", model, "Starting stream");

        let http = self.messages_request(api_key, &build_body(request, true));
        let response = self.endpoint.send(http, model).await?;

        let mut emitter = ChunkEmitter::new(ProviderId::Anthropic, model, on_chunk);
        let mut state = MessageStream::new();
        self.endpoint
            .read_events(response, model, |event| match decode_event(&event) {
                Some(ev) => state
                    .handle(ev, &mut emitter)
                    .map_err(|e| self.stream_error(model, e)),
                None => Ok(false),
            })
            .await?;

        if !emitter.is_finished() {
            debug!(provider = "anthropic", model, "Stream ended without message_stop");
        }
        emitter.finish();
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use luna_core::types::{Message, StreamChunk};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_provider(api_key: &str, api_base: &str) -> AnthropicProvider {
        AnthropicProvider::new(&ProviderConfig {
            api_key: api_key.to_string(),
            api_base: Some(api_base.to_string()),
            ..Default::default()
        })
    }

    fn request(model: &str) -> GenerationRequest {
        GenerationRequest::new(
            model,
            vec![Message::system("You are Luna."), Message::user("Say hello")],
        )
    }

    fn sse(events: &[(&str, Value)]) -> String {
        events
            .iter()
            .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
            .collect()
    }

    async fn stream_chunks(server: &MockServer, body: String) -> Result<Vec<StreamChunk>> {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(server)
            .await;

        let provider = make_provider("sk-ant", &server.uri());
        let mut chunks = Vec::new();
        provider
            .generate_streaming(&request(ANTHROPIC_DEFAULT_MODEL), &mut |c| chunks.push(c), None)
            .await?;
        Ok(chunks)
    }

    // ── Unit tests ──

    #[test]
    fn test_default_model_in_catalog() {
        let provider = make_provider("k", "http://localhost");
        assert!(provider.validate_model(provider.default_model()));
        assert!(!provider.validate_model("claude-2"));
    }

    #[test]
    fn test_default_max_tokens_table() {
        assert_eq!(default_max_tokens("claude-3-haiku-20240307"), 4096);
        assert_eq!(default_max_tokens("claude-3-5-haiku-20241022"), 8192);
        assert_eq!(default_max_tokens("claude-opus-4-20250514"), 8192);
        assert_eq!(default_max_tokens("claude-next"), FALLBACK_MAX_TOKENS);
    }

    #[test]
    fn test_body_system_out_of_band() {
        let mut req = request("claude-3-5-sonnet-20241022");
        req.temperature = Some(0.4);

        let body = build_body(&req, false);
        assert_eq!(body["system"], "You are Luna.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["temperature"], 0.4);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_body_thinking_omits_temperature() {
        let mut req = request("claude-3-7-sonnet-20250219");
        req.temperature = Some(0.4);
        req.max_tokens = Some(1000);
        req.reasoning_effort = Some(ReasoningEffort::Medium);

        let body = build_body(&req, false);
        assert_eq!(body["thinking"]["budget_tokens"], 4096);
        assert!(body.get("temperature").is_none());
        // Raised so the budget fits
        assert_eq!(body["max_tokens"], 4096 + FALLBACK_MAX_TOKENS);

        let mut req = request("claude-3-5-haiku-20241022");
        req.reasoning_effort = Some(ReasoningEffort::High);
        assert!(build_body(&req, false).get("thinking").is_none());
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_generate_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({ "system": "You are Luna." })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "Hello!" }
                ],
                "stop_reason": "end_turn",
                "usage": { "input_tokens": 20, "output_tokens": 4 }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = make_provider("sk-ant", &mock_server.uri());
        let resp = provider
            .generate(&request(ANTHROPIC_DEFAULT_MODEL), None)
            .await
            .unwrap();

        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.usage, Some(Usage::new(20, 4)));
    }

    #[tokio::test]
    async fn test_unsupported_model_makes_no_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let provider = make_provider("sk-ant", &mock_server.uri());
        let mut chunks = Vec::new();
        let err = provider
            .generate_streaming(&request("claude-2.1"), &mut |c| chunks.push(c), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel { .. }));
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_overloaded_is_retryable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "Overloaded" }
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider("sk-ant", &mock_server.uri());
        let err = provider
            .generate(&request(ANTHROPIC_DEFAULT_MODEL), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn test_streaming_hello_world() {
        let mock_server = MockServer::start().await;

        let body = sse(&[
            ("message_start", json!({
                "type": "message_start",
                "message": { "id": "msg_1", "model": ANTHROPIC_DEFAULT_MODEL, "content": [],
                             "usage": { "input_tokens": 25, "output_tokens": 1 } }
            })),
            ("content_block_start", json!({
                "type": "content_block_start", "index": 0,
                "content_block": { "type": "text", "text": "" }
            })),
            ("ping", json!({ "type": "ping" })),
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "Hello" }
            })),
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": " world" }
            })),
            ("content_block_stop", json!({ "type": "content_block_stop", "index": 0 })),
            ("message_delta", json!({
                "type": "message_delta",
                "delta": { "stop_reason": "end_turn" },
                "usage": { "output_tokens": 2 }
            })),
            ("message_stop", json!({ "type": "message_stop" })),
        ]);

        let chunks = stream_chunks(&mock_server, body).await.unwrap();

        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
        assert_eq!(chunks[2].usage, Some(Usage::new(25, 2)));
    }

    #[tokio::test]
    async fn test_streaming_message_stop_usage_wins() {
        let mock_server = MockServer::start().await;

        let body = sse(&[
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "Hi" }
            })),
            ("message_delta", json!({ "type": "message_delta", "usage": { "output_tokens": 1 } })),
            ("message_stop", json!({
                "type": "message_stop",
                "usage": { "input_tokens": 9, "output_tokens": 3 }
            })),
        ]);

        let chunks = stream_chunks(&mock_server, body).await.unwrap();
        assert_eq!(chunks.last().unwrap().usage, Some(Usage::new(9, 3)));
    }

    #[tokio::test]
    async fn test_streaming_synthesizes_terminal_chunk() {
        let mock_server = MockServer::start().await;

        // Body ends right after the usage update, no message_stop
        let body = sse(&[
            ("message_start", json!({
                "type": "message_start",
                "message": { "usage": { "input_tokens": 7, "output_tokens": 0 } }
            })),
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "cut" }
            })),
            ("message_delta", json!({ "type": "message_delta", "usage": { "output_tokens": 5 } })),
        ]);

        let chunks = stream_chunks(&mock_server, body).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "cut");
        assert!(chunks[1].done);
        assert_eq!(chunks[1].usage, Some(Usage::new(7, 5)));
    }

    #[tokio::test]
    async fn test_streaming_ignores_non_text_deltas() {
        let mock_server = MockServer::start().await;

        let body = sse(&[
            ("content_block_start", json!({
                "type": "content_block_start", "index": 0,
                "content_block": { "type": "thinking", "thinking": "" }
            })),
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "thinking_delta", "thinking": "Let me see" }
            })),
            ("content_block_stop", json!({ "type": "content_block_stop", "index": 0 })),
            ("message_stop", json!({ "type": "message_stop" })),
        ]);

        let chunks = stream_chunks(&mock_server, body).await.unwrap();
        assert_eq!(chunks, vec![StreamChunk::done(None)]);
    }

    fn apply(stream: &mut MessageStream, emitter: &mut ChunkEmitter<'_, '_>, event: serde_json::Value) -> Phase {
        let event: StreamEvent = serde_json::from_value(event).unwrap();
        stream.apply(event, emitter).unwrap();
        stream.phase
    }

    #[test]
    fn test_block_phases_follow_indices() {
        let mut chunks = Vec::new();
        let mut sink = |chunk: StreamChunk| chunks.push(chunk);
        let mut emitter = ChunkEmitter::new(ProviderId::Anthropic, "claude-sonnet-4-5", &mut sink);
        let mut stream = MessageStream::new();

        let start = json!({ "type": "content_block_start", "index": 1 });
        assert_eq!(apply(&mut stream, &mut emitter, start), Phase::InBlock(1));
        let delta = json!({
            "type": "content_block_delta", "index": 1,
            "delta": { "type": "text_delta", "text": "Hi" }
        });
        assert_eq!(apply(&mut stream, &mut emitter, delta), Phase::InBlock(1));
        let stop = json!({ "type": "content_block_stop", "index": 1 });
        assert_eq!(apply(&mut stream, &mut emitter, stop), Phase::InMessage);

        // A stop for another index still closes the open block.
        apply(&mut stream, &mut emitter, json!({ "type": "content_block_start", "index": 2 }));
        let stray = json!({ "type": "content_block_stop", "index": 5 });
        assert_eq!(apply(&mut stream, &mut emitter, stray), Phase::InMessage);

        drop(emitter);
        assert_eq!(chunks, vec![StreamChunk::text("Hi")]);
    }

    #[tokio::test]
    async fn test_streaming_error_event_fails() {
        let mock_server = MockServer::start().await;

        let body = sse(&[
            ("content_block_delta", json!({
                "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "Hel" }
            })),
            ("error", json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "Overloaded" }
            })),
        ]);

        match stream_chunks(&mock_server, body).await {
            Err(LlmError::ProviderCallFailed { message, provider, .. }) => {
                assert_eq!(message, "Overloaded");
                assert_eq!(provider, ProviderId::Anthropic);
            }
            other => panic!("expected ProviderCallFailed, got {:?}", other),
        }
    }
}
