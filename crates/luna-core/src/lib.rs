//! Luna core — the unified LLM data model, error taxonomy, and configuration
//! shared by the provider and service crates.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{LlmError, Result};
pub use types::{
    ConsensusResponse, Credential, CredentialMap, GenerationOptions, GenerationRequest,
    GenerationResponse, Message, MultiModelReport, ProviderId, ProviderInfo, ProviderResponse,
    ReasoningEffort, Role, StreamChunk, Usage,
};
