//! Adapter Service — the single-user, single-provider call path.
//!
//! 1. Load the user's AI settings (missing → [`LlmError::NotFound`])
//! 2. Resolve the credential (user key, else system key, else fail)
//! 3. Merge caller overrides over the stored defaults, key by key
//! 4. Validate the model against the provider catalog
//! 5. Delegate to the provider
//!
//! No retries and no caching; every error reaches the caller.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use luna_core::error::{LlmError, Result};
use luna_core::types::{Credential, GenerationOptions, GenerationRequest, GenerationResponse, Message};
use luna_providers::{ChunkSink, LlmProvider, ProviderRegistry};

use crate::credentials::CredentialResolver;
use crate::settings::SettingsStore;

/// Everything needed to make one provider call.
struct PreparedCall {
    provider: Arc<dyn LlmProvider>,
    request: GenerationRequest,
    credential: Option<Credential>,
}

pub struct AdapterService {
    registry: ProviderRegistry,
    settings: Arc<dyn SettingsStore>,
    credentials: CredentialResolver,
}

impl AdapterService {
    pub fn new(
        registry: ProviderRegistry,
        settings: Arc<dyn SettingsStore>,
        credentials: CredentialResolver,
    ) -> Self {
        Self {
            registry,
            settings,
            credentials,
        }
    }

    async fn prepare(
        &self,
        user_id: &str,
        messages: Vec<Message>,
        overrides: Option<&GenerationOptions>,
    ) -> Result<PreparedCall> {
        if messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".into()));
        }

        let record = self
            .settings
            .ai_settings(user_id)
            .await?
            .ok_or_else(|| LlmError::NotFound {
                user_id: user_id.to_string(),
            })?;

        let provider = self.registry.get(record.provider)?;
        let credential = self.credentials.require(provider.as_ref(), Some(&record))?;

        let base = record.options();
        let options = match overrides {
            Some(o) => o.merged_over(&base),
            None => base,
        };
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let request = GenerationRequest::new(model, messages).with_options(&options);

        provider.check_model(&request.model)?;

        debug!(
            user_id,
            provider = %provider.id(),
            model = %request.model,
            user_key = credential.is_some(),
            "Prepared generation"
        );

        Ok(PreparedCall {
            provider,
            request,
            credential,
        })
    }

    /// One non-streaming generation for `user_id`.
    pub async fn generate(
        &self,
        user_id: &str,
        messages: Vec<Message>,
        overrides: Option<GenerationOptions>,
    ) -> Result<GenerationResponse> {
        let call = self.prepare(user_id, messages, overrides.as_ref()).await?;
        let start = Instant::now();

        let response = call
            .provider
            .generate(&call.request, call.credential.as_ref())
            .await?;

        info!(
            user_id,
            provider = %call.provider.id(),
            model = %call.request.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(response)
    }

    /// One streaming generation for `user_id`; chunks go to `on_chunk`.
    pub async fn generate_streaming(
        &self,
        user_id: &str,
        messages: Vec<Message>,
        on_chunk: &mut ChunkSink<'_>,
        overrides: Option<GenerationOptions>,
    ) -> Result<()> {
        let call = self.prepare(user_id, messages, overrides.as_ref()).await?.with_stream();
        let start = Instant::now();

        call.provider
            .generate_streaming(&call.request, on_chunk, call.credential.as_ref())
            .await?;

        info!(
            user_id,
            provider = %call.provider.id(),
            model = %call.request.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "Stream complete"
        );
        Ok(())
    }
}

impl PreparedCall {
    fn with_stream(mut self) -> Self {
        self.request = self.request.streaming(true);
        self
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
