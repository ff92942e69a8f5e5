//! Google Gemini provider (Generative Language API, `v1beta`).
//!
//! System messages travel out-of-band in `systemInstruction`, assistant
//! turns are sent with the `model` role, and safety-blocked completions come
//! back as a placeholder string instead of an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use luna_core::config::ProviderConfig;
use luna_core::error::Result;
use luna_core::types::{
    Credential, GenerationRequest, GenerationResponse, ProviderId, ReasoningEffort, Role, Usage,
};

use crate::client::{stream_error, HttpEndpoint};
use crate::stream::ChunkEmitter;
use crate::traits::{ChunkSink, LlmProvider};

pub const GOOGLE_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Text returned in place of a completion the vendor refused to show.
pub const SAFETY_PLACEHOLDER: &str = "[response blocked by safety filters]";

pub static GOOGLE_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
];

/// Finish reasons meaning the candidate text was withheld.
static BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "RECITATION",
];

/// Thinking budget (tokens) for models with a configurable thinking phase.
/// `None` for models that have no thinking phase.
pub fn thinking_budget(model: &str, effort: ReasoningEffort) -> Option<u32> {
    if !model.starts_with("gemini-2.5") {
        return None;
    }
    let budget = match effort {
        // 2.5 Pro cannot turn thinking off; 128 is its floor.
        ReasoningEffort::None if model.starts_with("gemini-2.5-pro") => 128,
        ReasoningEffort::None => 0,
        ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 8192,
        ReasoningEffort::High => 24576,
    };
    Some(budget)
}

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiPart {
    text: Option<String>,
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiContent {
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiCandidate {
    content: Option<ApiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiUsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiResponse {
    candidates: Vec<ApiCandidate>,
    prompt_feedback: Option<ApiPromptFeedback>,
    usage_metadata: Option<ApiUsageMetadata>,
    model_version: Option<String>,
}

impl ApiResponse {
    /// Visible text of the first candidate. Thought parts are skipped.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }

    fn is_blocked(&self) -> bool {
        let prompt_blocked = self
            .prompt_feedback
            .as_ref()
            .is_some_and(|f| f.block_reason.is_some());
        let candidate_blocked = self
            .finish_reason()
            .is_some_and(|r| BLOCKED_FINISH_REASONS.contains(&r));
        prompt_blocked || candidate_blocked
    }

    fn usage(&self) -> Option<Usage> {
        self.usage_metadata
            .as_ref()
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
    }
}

fn build_body(request: &GenerationRequest) -> Value {
    let mut body = Map::new();

    let turns: Vec<_> = request.turns().collect();
    let contents = match turns.as_slice() {
        [only] if only.role == Role::User => {
            vec![json!({ "parts": [{ "text": only.content }] })]
        }
        _ => turns
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect(),
    };
    body.insert("contents".into(), Value::Array(contents));

    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    if !system.is_empty() {
        body.insert(
            "systemInstruction".into(),
            json!({ "parts": [{ "text": system.join("\n\n") }] }),
        );
    }

    let mut generation = Map::new();
    if let Some(t) = request.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(n) = request.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(n));
    }
    if let Some(p) = request.top_p {
        generation.insert("topP".into(), json!(p));
    }
    if let Some(k) = request.top_k {
        generation.insert("topK".into(), json!(k));
    }
    if let Some(p) = request.frequency_penalty {
        generation.insert("frequencyPenalty".into(), json!(p));
    }
    if let Some(p) = request.presence_penalty {
        generation.insert("presencePenalty".into(), json!(p));
    }
    if let Some(budget) = request
        .reasoning_effort
        .and_then(|effort| thinking_budget(&request.model, effort))
    {
        generation.insert("thinkingConfig".into(), json!({ "thinkingBudget": budget }));
    }
    if !generation.is_empty() {
        body.insert("generationConfig".into(), Value::Object(generation));
    }

    for (key, value) in &request.extra {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

// ─────────────────────────────────────────────
// GoogleProvider
// ─────────────────────────────────────────────

#[derive(Debug)]
pub struct GoogleProvider {
    endpoint: HttpEndpoint,
}

impl GoogleProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: HttpEndpoint::new(ProviderId::Google, config, GOOGLE_API_BASE, GOOGLE_MODELS),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn default_model(&self) -> &str {
        GOOGLE_DEFAULT_MODEL
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
            provider = "google",
            model,
            messages = request.messages.len(),
            "Calling LLM"
        );

        let http = self
            .endpoint
            .post(&format!("/v1beta/models/{}:generateContent", model))
            .header("x-goog-api-key", api_key)
            .json(&build_body(request));
        let response = self.endpoint.send(http, model).await?;

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            error!(provider = "google", error = %e, "Failed to parse LLM response");
            self.endpoint.call_failed(model, None, format!("invalid response body: {}", e))
        })?;

        let mut content = parsed.text();
        if content.is_empty() && parsed.is_blocked() {
            warn!(
                provider = "google",
                model,
                finish_reason = parsed.finish_reason().unwrap_or("?"),
                "Response blocked by safety filters"
            );
            content = SAFETY_PLACEHOLDER.to_string();
        }

        Ok(GenerationResponse {
            content,
            model: parsed.model_version.clone().unwrap_or_else(|| model.to_string()),
            usage: parsed.usage(),
            finish_reason: parsed.finish_reason().map(String::from),
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

        debug!(provider = "google", model, "Starting stream");

        let http = self
            .endpoint
            .post(&format!("/v1beta/models/{}:streamGenerateContent", model))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", api_key)
            .json(&build_body(request));
        let response = self.endpoint.send(http, model).await?;

        let mut emitter = ChunkEmitter::new(ProviderId::Google, model, on_chunk);
        let mut blocked = false;
        self.endpoint
            .read_events(response, model, |event| {
                if event.data.trim().is_empty() {
                    return Ok(false);
                }
                if let Some(message) = stream_error(&event.data) {
                    error!(provider = "google", model, error = %message, "Stream error event");
                    return Err(self.endpoint.call_failed(model, None, message));
                }
                match serde_json::from_str::<ApiResponse>(&event.data) {
                    Ok(chunk) => {
                        emitter.text(&chunk.text());
                        if let Some(u) = chunk.usage_metadata.as_ref() {
                            emitter.record_usage(
                                Some(u.prompt_token_count),
                                Some(u.candidates_token_count),
                            );
                        }
                        blocked |= chunk.is_blocked();
                    }
                    Err(e) => debug!(provider = "google", error = %e, "Skipping unparsable stream event"),
                }
                // No terminal marker; the body simply ends.
                Ok(false)
            })
            .await?;

        if blocked && emitter.text_chunks() == 0 {
            warn!(provider = "google", model, "Stream blocked by safety filters");
            emitter.text(SAFETY_PLACEHOLDER);
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
    use luna_core::error::LlmError;
    use luna_core::types::{Message, StreamChunk};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_provider(api_key: &str, api_base: &str) -> GoogleProvider {
        GoogleProvider::new(&ProviderConfig {
            api_key: api_key.to_string(),
            api_base: Some(api_base.to_string()),
            ..Default::default()
        })
    }

    fn conversation(model: &str) -> GenerationRequest {
        GenerationRequest::new(
            model,
            vec![
                Message::system("Be brief."),
                Message::user("Hi"),
                Message::assistant("Hello!"),
                Message::user("How are you?"),
            ],
        )
    }

    #[test]
    fn test_default_model_in_catalog() {
        let provider = make_provider("k", "http://localhost");
        assert!(provider.validate_model(provider.default_model()));
        assert!(!provider.validate_model("gemini-ultra"));
    }

    #[test]
    fn test_body_history_uses_model_role() {
        let body = build_body(&conversation("gemini-2.0-flash"));

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Hello!");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_body_single_turn_is_free_form() {
        let request = GenerationRequest::new("gemini-2.5-flash", vec![Message::user("Hi")]);
        let body = build_body(&request);
        assert_eq!(body["contents"], json!([{ "parts": [{ "text": "Hi" }] }]));
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_body_generation_config() {
        let mut request = conversation("gemini-2.5-flash");
        request.max_tokens = Some(512);
        request.top_k = Some(40);
        request.temperature = Some(0.3);
        request.reasoning_effort = Some(ReasoningEffort::Medium);

        let config = &build_body(&request)["generationConfig"];
        assert_eq!(config["maxOutputTokens"], 512);
        assert_eq!(config["topK"], 40);
        assert_eq!(config["temperature"], 0.3);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 8192);
    }

    #[test]
    fn test_thinking_budget_table() {
        assert_eq!(thinking_budget("gemini-2.5-flash", ReasoningEffort::None), Some(0));
        assert_eq!(thinking_budget("gemini-2.5-pro", ReasoningEffort::None), Some(128));
        assert_eq!(thinking_budget("gemini-2.5-pro", ReasoningEffort::High), Some(24576));
        assert_eq!(thinking_budget("gemini-2.0-flash", ReasoningEffort::High), None);
    }

    #[tokio::test]
    async fn test_generate_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            { "text": "thinking...", "thought": true },
                            { "text": "Doing well." }
                        ]
                    },
                    "finishReason": "STOP"
                }],
                "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15 },
                "modelVersion": "gemini-2.5-flash"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let resp = provider
            .generate(&conversation("gemini-2.5-flash"), None)
            .await
            .unwrap();

        assert_eq!(resp.content, "Doing well.");
        assert_eq!(resp.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(resp.usage, Some(Usage::new(12, 3)));
    }

    #[tokio::test]
    async fn test_safety_block_becomes_placeholder() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "finishReason": "SAFETY" }]
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let resp = provider
            .generate(&conversation("gemini-2.5-flash"), None)
            .await
            .unwrap();
        assert_eq!(resp.content, SAFETY_PLACEHOLDER);
        assert_eq!(resp.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[tokio::test]
    async fn test_blocked_prompt_becomes_placeholder() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "OTHER" }
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let resp = provider
            .generate(&conversation("gemini-1.5-pro"), None)
            .await
            .unwrap();
        assert_eq!(resp.content, SAFETY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_unknown_model_404() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": 404,
                    "message": "models/gemini-1.5-pro is not found for API version v1beta",
                    "status": "NOT_FOUND"
                }
            })))
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let err = provider
            .generate(&conversation("gemini-1.5-pro"), None)
            .await
            .unwrap_err();
        match err {
            LlmError::ProviderCallFailed { message, .. } => assert_eq!(message, "model not found"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streaming_hello_world() {
        let mock_server = MockServer::start().await;

        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hello\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" world\"}]},\"finishReason\":\"STOP\"}],",
            "\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2,\"totalTokenCount\":6}}\r\n\r\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let mut chunks: Vec<StreamChunk> = Vec::new();
        provider
            .generate_streaming(&conversation("gemini-2.0-flash"), &mut |c| chunks.push(c), None)
            .await
            .unwrap();

        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "Hello world");
        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
        assert_eq!(chunks.last().unwrap().usage, Some(Usage::new(4, 2)));
    }

    #[tokio::test]
    async fn test_streaming_error_event_fails_the_call() {
        let mock_server = MockServer::start().await;

        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"error\":{\"code\":500,\"status\":\"INTERNAL\"}}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let mut chunks = Vec::new();
        let err = provider
            .generate_streaming(&conversation("gemini-2.5-flash"), &mut |c| chunks.push(c), None)
            .await
            .unwrap_err();

        match err {
            LlmError::ProviderCallFailed { message, status, .. } => {
                assert_eq!(message, "INTERNAL");
                assert_eq!(status, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(chunks, vec![StreamChunk::text("Hel")]);
    }

    #[tokio::test]
    async fn test_streaming_safety_block() {
        let mock_server = MockServer::start().await;

        let sse = "data: {\"candidates\":[{\"finishReason\":\"SAFETY\"}]}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider = make_provider("g-key", &mock_server.uri());
        let mut chunks = Vec::new();
        provider
            .generate_streaming(&conversation("gemini-2.5-pro"), &mut |c| chunks.push(c), None)
            .await
            .unwrap();

        assert_eq!(
            chunks,
            vec![StreamChunk::text(SAFETY_PLACEHOLDER), StreamChunk::done(None)]
        );
    }
}
