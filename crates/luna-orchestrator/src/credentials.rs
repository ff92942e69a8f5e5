//! Credential resolution and at-rest encryption of per-user API keys.
//!
//! Precedence: a decryptable, non-blank user key beats the provider's
//! system key. Keys are resolved per call and never cached.

use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

use luna_core::config::SecurityConfig;
use luna_core::error::{LlmError, Result};
use luna_core::types::{Credential, CredentialMap, ProviderId};
use luna_providers::LlmProvider;

use crate::settings::AiSettingsRecord;

// ─────────────────────────────────────────────
// Cipher
// ─────────────────────────────────────────────

/// Encrypts API keys for storage and decrypts them at call time.
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, stored: &str) -> Result<String>;
}

const NONCE_LEN: usize = 12;

/// AES-256-GCM. Stored form is `base64(nonce ‖ ciphertext)`.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher(***)")
    }
}

impl AesGcmCipher {
    /// From a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            LlmError::Config(format!("encryption key must be 32 bytes, got {}", key.len()))
        })?;
        Ok(Self { cipher })
    }

    /// From the base64 form kept in `security.encryptionKey`.
    pub fn from_base64(key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| LlmError::Config(format!("encryption key is not valid base64: {}", e)))?;
        Self::new(&bytes)
    }

    /// A fresh random key, base64-encoded.
    pub fn generate_key() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }
}

impl KeyCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| LlmError::Config("API key encryption failed".into()))?;

        let mut stored = nonce.to_vec();
        stored.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(stored))
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(stored.trim())
            .map_err(|e| LlmError::InvalidRequest(format!("stored key is not valid base64: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(LlmError::InvalidRequest("stored key is too short".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| LlmError::InvalidRequest("stored key failed authentication".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| LlmError::InvalidRequest("stored key is not UTF-8".into()))
    }
}

// ─────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────

/// Picks the credential for one provider call.
#[derive(Clone, Default)]
pub struct CredentialResolver {
    cipher: Option<Arc<dyn KeyCipher>>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("has_cipher", &self.cipher.is_some())
            .finish()
    }
}

impl CredentialResolver {
    /// Without a cipher every stored key is unusable, so system keys apply.
    pub fn new(cipher: Option<Arc<dyn KeyCipher>>) -> Self {
        Self { cipher }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        if security.encryption_key.trim().is_empty() {
            debug!("No encryption key configured; stored user keys will be ignored");
            return Self::new(None);
        }
        match AesGcmCipher::from_base64(&security.encryption_key) {
            Ok(cipher) => Self::new(Some(Arc::new(cipher))),
            Err(e) => {
                warn!(error = %e, "Invalid encryption key; stored user keys will be ignored");
                Self::new(None)
            }
        }
    }

    /// The user's own key for `provider`, if it decrypts to something
    /// non-blank. `None` means "use the system default".
    pub fn resolve(&self, provider: ProviderId, record: Option<&AiSettingsRecord>) -> Option<Credential> {
        let stored = record?.encrypted_api_keys.get(provider)?;
        if stored.trim().is_empty() {
            return None;
        }
        let Some(cipher) = self.cipher.as_ref() else {
            warn!(provider = %provider, "User key present but no cipher configured; using system key");
            return None;
        };
        match cipher.decrypt(stored) {
            Ok(plain) if !plain.trim().is_empty() => {
                debug!(provider = %provider, "Using user API key");
                Some(Credential::new(plain))
            }
            Ok(_) => {
                debug!(provider = %provider, "User API key is blank; using system key");
                None
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "User API key failed to decrypt; using system key");
                None
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but fails with
    /// [`LlmError::MissingCredential`] when the provider has no system key
    /// to fall back on either.
    pub fn require(
        &self,
        provider: &dyn LlmProvider,
        record: Option<&AiSettingsRecord>,
    ) -> Result<Option<Credential>> {
        match self.resolve(provider.id(), record) {
            Some(credential) => Ok(Some(credential)),
            None if provider.has_system_credential() => Ok(None),
            None => Err(LlmError::MissingCredential {
                provider: provider.id(),
            }),
        }
    }

    /// Every user credential in `record`, keyed by provider.
    pub fn resolve_all(&self, record: Option<&AiSettingsRecord>) -> CredentialMap {
        ProviderId::ALL
            .into_iter()
            .filter_map(|id| self.resolve(id, record).map(|c| (id, c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&[7u8; 32]).unwrap()
    }

    fn record_with(provider: ProviderId, stored: &str) -> AiSettingsRecord {
        let mut record = AiSettingsRecord::new(provider);
        record.encrypted_api_keys.set(provider, stored);
        record
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher();
        let stored = cipher.encrypt("sk-user-123").unwrap();
        assert!(!stored.contains("sk-user"));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "sk-user-123");
        // Fresh nonce per encryption
        assert_ne!(stored, cipher.encrypt("sk-user-123").unwrap());
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let stored = cipher().encrypt("sk-user-123").unwrap();
        let other = AesGcmCipher::new(&[9u8; 32]).unwrap();
        assert!(other.decrypt(&stored).is_err());
        assert!(other.decrypt("not base64!").is_err());
        assert!(other.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(matches!(AesGcmCipher::new(&[1u8; 16]), Err(LlmError::Config(_))));
        assert!(AesGcmCipher::from_base64(&AesGcmCipher::generate_key()).is_ok());
    }

    #[test]
    fn test_user_key_wins() {
        let stored = cipher().encrypt("sk-user").unwrap();
        let resolver = CredentialResolver::new(Some(Arc::new(cipher())));
        let provider = FakeProvider::replying(ProviderId::OpenAi, "x");

        let record = record_with(ProviderId::OpenAi, &stored);
        let credential = resolver.require(&provider, Some(&record)).unwrap().unwrap();
        assert_eq!(credential.expose(), "sk-user");
    }

    #[test]
    fn test_undecryptable_key_falls_back_to_system() {
        let resolver = CredentialResolver::new(Some(Arc::new(cipher())));
        let provider = FakeProvider::replying(ProviderId::OpenAi, "x");

        let record = record_with(ProviderId::OpenAi, "garbage");
        assert_eq!(resolver.require(&provider, Some(&record)).unwrap(), None);
    }

    #[test]
    fn test_blank_key_falls_back_to_system() {
        let stored = cipher().encrypt("   ").unwrap();
        let resolver = CredentialResolver::new(Some(Arc::new(cipher())));
        let record = record_with(ProviderId::Google, &stored);
        assert_eq!(resolver.resolve(ProviderId::Google, Some(&record)), None);
    }

    #[test]
    fn test_no_user_key_and_no_system_key() {
        let resolver = CredentialResolver::new(Some(Arc::new(cipher())));
        let provider = FakeProvider::replying(ProviderId::Anthropic, "x").without_system_key();

        let err = resolver.require(&provider, None).unwrap_err();
        assert_eq!(
            err,
            LlmError::MissingCredential {
                provider: ProviderId::Anthropic
            }
        );
    }

    #[test]
    fn test_resolve_all_only_lists_usable_keys() {
        let c = cipher();
        let mut record = AiSettingsRecord::new(ProviderId::OpenAi);
        record.encrypted_api_keys.set(ProviderId::OpenAi, c.encrypt("sk-o").unwrap());
        record.encrypted_api_keys.set(ProviderId::Google, "broken");

        let resolver = CredentialResolver::new(Some(Arc::new(c)));
        let map = resolver.resolve_all(Some(&record));
        assert_eq!(map.len(), 1);
        assert_eq!(map[&ProviderId::OpenAi].expose(), "sk-o");
    }

    #[test]
    fn test_from_config_without_key_ignores_stored_keys() {
        let stored = cipher().encrypt("sk-user").unwrap();
        let resolver = CredentialResolver::from_config(&SecurityConfig::default());
        let record = record_with(ProviderId::OpenAi, &stored);
        assert_eq!(resolver.resolve(ProviderId::OpenAi, Some(&record)), None);
    }
}
