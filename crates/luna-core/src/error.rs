//! Error taxonomy for the LLM layer.
//!
//! Single-provider paths propagate these to the caller. Multi-provider paths
//! turn them into `ProviderResponse { success: false, .. }` data instead.

use thiserror::Error;

use crate::types::ProviderId;

/// Hint appended to catalog-aware errors.
pub const SWITCH_MODEL_HINT: &str = "switch to a supported model in your AI settings";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    /// The user has no AI settings record.
    #[error("no AI settings found for user '{user_id}'")]
    NotFound { user_id: String },

    /// Neither a usable user key nor a system default key exists.
    #[error("no API key available for provider '{provider}'")]
    MissingCredential { provider: ProviderId },

    /// The requested model is not in the provider's catalog.
    #[error(
        "model '{model}' is not supported by {provider}. Available models: {}. Please {}.",
        .available.join(", "),
        SWITCH_MODEL_HINT
    )]
    UnsupportedModel {
        provider: ProviderId,
        model: String,
        available: Vec<String>,
    },

    /// Network failure, HTTP error status, or a vendor-reported model error.
    #[error(
        "{provider} request for model '{model}' failed{}: {message}. Available models: {}. If the model is unavailable, {}.",
        .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default(),
        .available.join(", "),
        SWITCH_MODEL_HINT
    )]
    ProviderCallFailed {
        provider: ProviderId,
        model: String,
        status: Option<u16>,
        message: String,
        available: Vec<String>,
    },

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Consensus was requested but every provider failed.
    #[error("all {attempted} providers failed; no responses to build a consensus from")]
    NoSuccessfulResponses { attempted: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether a caller may reasonably retry. Nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ProviderCallFailed { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
