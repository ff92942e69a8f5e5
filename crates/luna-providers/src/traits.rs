//! LLM Provider trait — the contract every vendor integration implements.
//!
//! Providers own vendor translation only. Credential choice, settings lookup
//! and fan-out live in the service layer above.

use async_trait::async_trait;
use luna_core::error::{LlmError, Result};
use luna_core::types::{Credential, GenerationRequest, GenerationResponse, ProviderId, StreamChunk};

/// Callback receiving stream chunks, in emission order.
pub type ChunkSink<'a> = dyn FnMut(StreamChunk) + Send + 'a;

/// Trait that all LLM providers must implement.
///
/// `credential` is the caller's per-call key. `None` means "use the system
/// default key"; if that is empty too the call fails with
/// [`LlmError::MissingCredential`] before any network I/O.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which vendor this is.
    fn id(&self) -> ProviderId;

    /// Display name for logging and the UI.
    fn name(&self) -> &str {
        self.id().display_name()
    }

    /// The model used when the caller does not pick one. Always in the catalog.
    fn default_model(&self) -> &str;

    /// Static catalog of accepted model identifiers.
    fn available_models(&self) -> Vec<String>;

    /// Catalog membership is the only validation rule.
    fn validate_model(&self, model: &str) -> bool {
        self.available_models().iter().any(|m| m == model)
    }

    /// Whether a system-level key is configured.
    fn has_system_credential(&self) -> bool;

    /// Fail with [`LlmError::UnsupportedModel`] unless `model` is in the catalog.
    fn check_model(&self, model: &str) -> Result<()> {
        if self.validate_model(model) {
            Ok(())
        } else {
            Err(LlmError::UnsupportedModel {
                provider: self.id(),
                model: model.to_string(),
                available: self.available_models(),
            })
        }
    }

    /// Run one non-streaming generation.
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<GenerationResponse>;

    /// Run one streaming generation, delivering chunks to `on_chunk`.
    ///
    /// On `Ok(())` exactly one chunk with `done = true` has been delivered,
    /// and it was the last.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut ChunkSink<'_>,
        credential: Option<&Credential>,
    ) -> Result<()>;
}
