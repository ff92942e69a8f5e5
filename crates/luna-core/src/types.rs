//! Core types for the Luna LLM layer — one request/response/stream contract
//! shared by every vendor integration.
//!
//! Providers translate these into their own wire formats; the services build
//! them fresh for every call and never mutate them afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::LlmError;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// Who authored a message in the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message. Order within a conversation is significant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Provider identity
// ─────────────────────────────────────────────

/// The closed set of supported LLM vendors.
///
/// Adding a vendor means adding a variant here plus a concrete provider;
/// there is no runtime registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[default]
    OpenAi,
    Google,
    Anthropic,
}

impl ProviderId {
    /// Every provider, in display order.
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Google, ProviderId::Anthropic];

    /// Internal name (e.g. `"openai"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Google => "google",
            ProviderId::Anthropic => "anthropic",
        }
    }

    /// Human-readable name for logs and the UI.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Google => "Google Gemini",
            ProviderId::Anthropic => "Anthropic Claude",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "google" | "gemini" => Ok(ProviderId::Google),
            "anthropic" | "claude" => Ok(ProviderId::Anthropic),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────

/// A plaintext API key, resolved for a single call.
///
/// `Debug` is redacted so a credential can never leak through logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Credential(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ─────────────────────────────────────────────
// Generation request
// ─────────────────────────────────────────────

/// How hard a reasoning-capable model should think.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// A unified generation request, built once per call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub stream: bool,
    /// Vendor parameters copied verbatim into the request body.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationRequest {
    /// A request with only a model and messages; everything else unset.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        GenerationRequest {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            reasoning_effort: None,
            stream: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Apply every option that is set. `options.model` replaces the model.
    pub fn with_options(mut self, options: &GenerationOptions) -> Self {
        if let Some(ref model) = options.model {
            self.model = model.clone();
        }
        self.temperature = options.temperature.or(self.temperature);
        self.max_tokens = options.max_tokens.or(self.max_tokens);
        self.top_p = options.top_p.or(self.top_p);
        self.top_k = options.top_k.or(self.top_k);
        self.frequency_penalty = options.frequency_penalty.or(self.frequency_penalty);
        self.presence_penalty = options.presence_penalty.or(self.presence_penalty);
        self.reasoning_effort = options.reasoning_effort.or(self.reasoning_effort);
        for (key, value) in &options.extra {
            self.extra.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// All non-system messages, in order.
    pub fn turns(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// Optional generation parameters: user configuration defaults or a
/// caller-supplied override. Every field is independent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationOptions {
    /// Layer `self` over `base`: a field set in `self` wins, otherwise the
    /// `base` value is kept. `extra` maps merge key by key.
    pub fn merged_over(&self, base: &GenerationOptions) -> GenerationOptions {
        let mut extra = base.extra.clone();
        for (key, value) in &self.extra {
            extra.insert(key.clone(), value.clone());
        }
        GenerationOptions {
            model: self.model.clone().or_else(|| base.model.clone()),
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            frequency_penalty: self.frequency_penalty.or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            reasoning_effort: self.reasoning_effort.or(base.reasoning_effort),
            extra,
        }
    }
}

// ─────────────────────────────────────────────
// Responses and streams
// ─────────────────────────────────────────────

/// Token usage statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Usage with the total computed from its parts, saturating at `u32::MAX`.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// Terminal value of a non-streaming generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One item of a streamed generation. Exactly one chunk per stream has
/// `done = true`, and it is the last one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// An incremental text chunk.
    pub fn text(content: impl Into<String>) -> Self {
        StreamChunk {
            content: content.into(),
            done: false,
            usage: None,
        }
    }

    /// The terminal chunk.
    pub fn done(usage: Option<Usage>) -> Self {
        StreamChunk {
            content: String::new(),
            done: true,
            usage,
        }
    }
}

// ─────────────────────────────────────────────
// Orchestration results
// ─────────────────────────────────────────────

/// The outcome of one provider within a multi-model call.
///
/// `success == false` implies `content` is empty and `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub provider: ProviderId,
    pub model: String,
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "latencyMs", serialize_with = "serialize_millis")]
    pub latency: Duration,
}

impl ProviderResponse {
    pub fn succeeded(provider: ProviderId, model: impl Into<String>, content: impl Into<String>, latency: Duration) -> Self {
        ProviderResponse {
            provider,
            model: model.into(),
            content: content.into(),
            success: true,
            error: None,
            latency,
        }
    }

    pub fn failed(provider: ProviderId, model: impl Into<String>, error: impl Into<String>, latency: Duration) -> Self {
        ProviderResponse {
            provider,
            model: model.into(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
            latency,
        }
    }
}

/// Aggregate of a multi-model batch. Positions match the requested
/// provider order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiModelReport {
    pub responses: Vec<ProviderResponse>,
    #[serde(rename = "totalLatencyMs", serialize_with = "serialize_millis")]
    pub total_latency: Duration,
    pub success_count: usize,
    pub fail_count: usize,
}

impl MultiModelReport {
    /// Build a report; the counts are derived from `responses`.
    pub fn new(responses: Vec<ProviderResponse>, total_latency: Duration) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        let fail_count = responses.len() - success_count;
        MultiModelReport {
            responses,
            total_latency,
            success_count,
            fail_count,
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &ProviderResponse> {
        self.responses.iter().filter(|r| r.success)
    }
}

/// A synthesized answer plus the successful responses it was built from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResponse {
    pub consensus: String,
    pub sources: Vec<ProviderResponse>,
}

/// What the UI needs to know about one provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: String,
    pub default_model: String,
    pub models: Vec<String>,
    /// Whether a system-level credential is configured.
    pub available: bool,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Per-provider user credentials supplied to a multi-model call.
pub type CredentialMap = HashMap<ProviderId, Credential>;

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = Message::assistant("The answer is 42.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "The answer is 42.");
    }

    #[test]
    fn test_message_rejects_unknown_role() {
        let json = json!({"role": "tool", "content": "x"});
        assert!(serde_json::from_value::<Message>(json).is_err());
    }

    #[test]
    fn test_provider_id_parsing() {
        assert_eq!("openai".parse::<ProviderId>().unwrap(), ProviderId::OpenAi);
        assert_eq!("Gemini".parse::<ProviderId>().unwrap(), ProviderId::Google);
        assert_eq!(" anthropic ".parse::<ProviderId>().unwrap(), ProviderId::Anthropic);

        match "mistral".parse::<ProviderId>() {
            Err(LlmError::UnsupportedProvider(name)) => assert_eq!(name, "mistral"),
            other => panic!("expected UnsupportedProvider, got {:?}", other),
        }
    }

    #[test]
    fn test_provider_id_serde_is_lowercase() {
        assert_eq!(serde_json::to_value(ProviderId::OpenAi).unwrap(), json!("openai"));
        let id: ProviderId = serde_json::from_value(json!("anthropic")).unwrap();
        assert_eq!(id, ProviderId::Anthropic);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("sk-secret-123");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("sk-secret"));
        assert_eq!(cred.expose(), "sk-secret-123");
        assert!(Credential::new("   ").is_blank());
    }

    #[test]
    fn test_options_override_wins_key_by_key() {
        let base = GenerationOptions {
            model: Some("gpt-4o".into()),
            temperature: Some(0.7),
            max_tokens: Some(1000),
            top_p: Some(0.9),
            ..Default::default()
        };
        let mut extra = serde_json::Map::new();
        extra.insert("seed".into(), json!(7));
        let overrides = GenerationOptions {
            temperature: Some(0.2),
            extra,
            ..Default::default()
        };

        let merged = overrides.merged_over(&base);
        assert_eq!(merged.model.as_deref(), Some("gpt-4o"));
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_tokens, Some(1000));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.extra["seed"], json!(7));
    }

    #[test]
    fn test_request_with_options() {
        let options = GenerationOptions {
            model: Some("gpt-4".into()),
            max_tokens: Some(64),
            reasoning_effort: Some(ReasoningEffort::High),
            ..Default::default()
        };
        let request = GenerationRequest::new("gpt-4o", vec![Message::user("hi")]).with_options(&options);

        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.temperature, None);
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::High));
        assert!(!request.stream);
    }

    #[test]
    fn test_request_turns_skip_system() {
        let request = GenerationRequest::new(
            "m",
            vec![
                Message::system("Be kind."),
                Message::user("Hello"),
                Message::assistant("Hi!"),
            ],
        );
        let roles: Vec<Role> = request.turns().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
        assert!(!usage.is_empty());
        assert!(Usage::default().is_empty());
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = Usage::new(u32::MAX, 5);
        assert_eq!(usage.total_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[test]
    fn test_report_counts_match_responses() {
        let latency = Duration::from_millis(5);
        let report = MultiModelReport::new(
            vec![
                ProviderResponse::succeeded(ProviderId::OpenAi, "gpt-4o", "a", latency),
                ProviderResponse::failed(ProviderId::Google, "gemini-2.5-flash", "boom", latency),
                ProviderResponse::succeeded(ProviderId::Anthropic, "claude", "c", latency),
            ],
            latency,
        );
        assert_eq!(report.success_count, 2);
        assert_eq!(report.fail_count, 1);
        assert_eq!(report.success_count + report.fail_count, report.responses.len());
        assert_eq!(report.successes().count(), 2);
    }

    #[test]
    fn test_failed_response_has_empty_content() {
        let resp = ProviderResponse::failed(ProviderId::OpenAi, "gpt-4o", "nope", Duration::ZERO);
        assert!(!resp.success);
        assert!(resp.content.is_empty());
        assert_eq!(resp.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_provider_response_latency_serializes_as_millis() {
        let resp = ProviderResponse::succeeded(ProviderId::OpenAi, "gpt-4o", "ok", Duration::from_millis(1500));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["latencyMs"], 1500);
        assert_eq!(json["provider"], "openai");
        assert!(json.get("error").is_none());
    }
}
