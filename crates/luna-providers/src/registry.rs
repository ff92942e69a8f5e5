//! Provider registry — id → provider lookup.
//!
//! The provider set is closed: one concrete client per [`ProviderId`],
//! built once from config. Lookups are pure and never mutate.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use luna_core::config::Config;
use luna_core::error::{LlmError, Result};
use luna_core::types::ProviderId;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai::OpenAiProvider;
use crate::traits::LlmProvider;

/// Build the concrete client for one provider id.
pub fn create_provider(id: ProviderId, config: &Config) -> Arc<dyn LlmProvider> {
    let provider_config = config.providers.get(id);
    debug!(
        provider = %id,
        api_base = provider_config.api_base.as_deref().unwrap_or("default"),
        configured = provider_config.is_configured(),
        "Creating LLM provider"
    );
    match id {
        ProviderId::OpenAi => Arc::new(OpenAiProvider::new(provider_config)),
        ProviderId::Google => Arc::new(GoogleProvider::new(provider_config)),
        ProviderId::Anthropic => Arc::new(AnthropicProvider::new(provider_config)),
    }
}

/// Lookup table from [`ProviderId`] to its client.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn LlmProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}

impl ProviderRegistry {
    /// An empty registry. Tests fill it with [`ProviderRegistry::with_provider`].
    pub fn new() -> Self {
        Self::default()
    }

    /// One client per supported vendor.
    pub fn from_config(config: &Config) -> Self {
        ProviderId::ALL
            .into_iter()
            .fold(Self::new(), |registry, id| {
                registry.with_provider(create_provider(id, config))
            })
    }

    /// Register (or replace) the client for `provider.id()`.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn get(&self, id: ProviderId) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(&id)
            .cloned()
            .ok_or_else(|| LlmError::UnsupportedProvider(id.to_string()))
    }

    /// Every registered provider, in [`ProviderId`] order.
    pub fn all(&self) -> Vec<Arc<dyn LlmProvider>> {
        self.providers.values().cloned().collect()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
