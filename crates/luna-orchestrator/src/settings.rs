//! Per-user AI settings — the boundary to whatever persists them.
//!
//! The services only read these records. Storage is an external concern
//! behind [`SettingsStore`]; [`InMemorySettingsStore`] backs tests and the CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use luna_core::error::Result;
use luna_core::types::{GenerationOptions, ProviderId};

/// Stored (encrypted) API keys, one optional slot per provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptedApiKeys {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<String>,
}

impl EncryptedApiKeys {
    pub fn get(&self, id: ProviderId) -> Option<&str> {
        match id {
            ProviderId::OpenAi => self.openai.as_deref(),
            ProviderId::Google => self.google.as_deref(),
            ProviderId::Anthropic => self.anthropic.as_deref(),
        }
    }

    pub fn set(&mut self, id: ProviderId, stored: impl Into<String>) {
        let slot = match id {
            ProviderId::OpenAi => &mut self.openai,
            ProviderId::Google => &mut self.google,
            ProviderId::Anthropic => &mut self.anthropic,
        };
        *slot = Some(stored.into());
    }
}

/// One user's AI configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettingsRecord {
    pub provider: ProviderId,
    /// Preferred model; the provider default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling defaults (temperature, max tokens, ...).
    #[serde(default)]
    pub sampling: GenerationOptions,
    #[serde(default)]
    pub encrypted_api_keys: EncryptedApiKeys,
}

impl AiSettingsRecord {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            model: None,
            sampling: GenerationOptions::default(),
            encrypted_api_keys: EncryptedApiKeys::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The record as generation options: sampling plus the preferred model.
    pub fn options(&self) -> GenerationOptions {
        let mut options = self.sampling.clone();
        if options.model.is_none() {
            options.model = self.model.clone();
        }
        options
    }
}

/// Read access to persisted AI settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when the user has no record.
    async fn ai_settings(&self, user_id: &str) -> Result<Option<AiSettingsRecord>>;
}

/// Settings kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    records: RwLock<HashMap<String, AiSettingsRecord>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: impl Into<String>, record: AiSettingsRecord) {
        self.records.write().await.insert(user_id.into(), record);
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn ai_settings(&self, user_id: &str) -> Result<Option<AiSettingsRecord>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }
}
