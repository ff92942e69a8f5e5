//! Configuration schema.
//!
//! Hierarchy: `Config` → `ProvidersConfig`, `DefaultsConfig`,
//! `OrchestratorConfig`, `SecurityConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ProviderId;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.luna/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub defaults: DefaultsConfig,
    pub orchestrator: OrchestratorConfig,
    pub security: SecurityConfig,
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider.
///
/// `api_key` is the system default credential, used only when a user has no
/// usable key of their own.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// System default API key.
    pub api_key: String,
    /// Custom API base URL (overrides the vendor default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Whether this provider has a configured system API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// One `ProviderConfig` per supported vendor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub google: ProviderConfig,
    pub anthropic: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, id: ProviderId) -> &ProviderConfig {
        match id {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Google => &self.google,
            ProviderId::Anthropic => &self.anthropic,
        }
    }

    pub fn get_mut(&mut self, id: ProviderId) -> &mut ProviderConfig {
        match id {
            ProviderId::OpenAi => &mut self.openai,
            ProviderId::Google => &mut self.google,
            ProviderId::Anthropic => &mut self.anthropic,
        }
    }
}

// ─────────────────────────────────────────────
// Generation defaults
// ─────────────────────────────────────────────

/// Defaults used when building a settings record outside the app
/// (the CLI), mirroring what the web app stores per user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultsConfig {
    pub provider: ProviderId,
    /// Model identifier; the provider default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Stored (encrypted) per-user API keys, as printed by `luna encrypt-key`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub encrypted_api_keys: BTreeMap<ProviderId, String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderId::OpenAi,
            model: Some("gpt-4o".to_string()),
            temperature: 0.7,
            max_tokens: 1000,
            encrypted_api_keys: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────

/// Multi-model fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Upper bound for one provider's call inside a multi-model request.
    /// Zero means no bound.
    pub provider_timeout_secs: u64,
    /// Provider that writes the consensus synthesis.
    pub consensus_provider: ProviderId,
    /// Model for the synthesis call; the provider default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_model: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 90,
            consensus_provider: ProviderId::OpenAi,
            consensus_model: None,
        }
    }
}

// ─────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────

/// Key material for stored per-user API keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte AES-256-GCM key.
    pub encryption_key: String,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
