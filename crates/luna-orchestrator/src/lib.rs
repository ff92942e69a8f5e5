//! Luna services — the call paths above the providers.
//!
//! This crate contains:
//! - **settings**: the per-user AI settings boundary and an in-memory store
//! - **credentials**: user-key decryption and system-key fallback
//! - **adapter**: one user, one provider
//! - **orchestrator**: one prompt, many providers, optional consensus

pub mod adapter;
pub mod credentials;
pub mod orchestrator;
pub mod settings;

#[cfg(test)]
mod testing;

pub use adapter::AdapterService;
pub use credentials::{AesGcmCipher, CredentialResolver, KeyCipher};
pub use orchestrator::{MultiModelRequest, MultiStreamObserver, OrchestratorService, ProviderTarget};
pub use settings::{AiSettingsRecord, EncryptedApiKeys, InMemorySettingsStore, SettingsStore};
