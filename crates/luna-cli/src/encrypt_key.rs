//! `luna encrypt-key` — produce the stored form of a per-user API key.

use anyhow::{bail, Context, Result};
use colored::Colorize;

use luna_core::config::Config;
use luna_orchestrator::{AesGcmCipher, KeyCipher};

pub fn run(config: &Config, key: Option<String>, generate: bool) -> Result<()> {
    if generate {
        println!("{}", AesGcmCipher::generate_key());
        return Ok(());
    }

    let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
        bail!("--key must not be empty");
    };
    if config.security.encryption_key.trim().is_empty() {
        bail!(
            "no encryption key configured; set security.encryptionKey (or LUNA_SECURITY__ENCRYPTION_KEY), e.g. to {}",
            AesGcmCipher::generate_key()
        );
    }

    let cipher = AesGcmCipher::from_base64(&config.security.encryption_key)
        .context("security.encryptionKey is unusable")?;
    let stored = cipher.encrypt(key.trim()).context("encryption failed")?;

    eprintln!(
        "{}",
        "Store this under defaults.encryptedApiKeys.<provider> (or in the user's encryptedApiKeys):".dimmed()
    );
    println!("{stored}");
    Ok(())
}
