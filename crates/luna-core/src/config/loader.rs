//! Config loader — reads `~/.luna/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.luna/config.json`
//! 3. Environment variables `LUNA_<SECTION>__<FIELD>` (override JSON)
//! 4. Vendor variables (`OPENAI_API_KEY`, ...) fill API keys that are still empty

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ProviderConfig};
use crate::types::ProviderId;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `LUNA_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `LUNA_PROVIDERS__<NAME>__API_KEY` → `providers.<name>.api_key`
/// - `LUNA_PROVIDERS__<NAME>__API_BASE` → `providers.<name>.api_base`
/// - `LUNA_PROVIDERS__<NAME>__TIMEOUT_SECS` → `providers.<name>.timeout_secs`
/// - `LUNA_DEFAULTS__PROVIDER` / `__MODEL` / `__TEMPERATURE` / `__MAX_TOKENS`
/// - `LUNA_ORCHESTRATOR__PROVIDER_TIMEOUT_SECS`
/// - `LUNA_ORCHESTRATOR__CONSENSUS_PROVIDER` / `__CONSENSUS_MODEL`
/// - `LUNA_SECURITY__ENCRYPTION_KEY`
fn apply_env_overrides(mut config: Config) -> Config {
    for id in ProviderId::ALL {
        apply_provider_env(config.providers.get_mut(id), id);
    }

    // Generation defaults
    if let Ok(val) = std::env::var("LUNA_DEFAULTS__PROVIDER") {
        match val.parse::<ProviderId>() {
            Ok(id) => config.defaults.provider = id,
            Err(e) => warn!("Ignoring LUNA_DEFAULTS__PROVIDER: {}", e),
        }
    }
    if let Ok(val) = std::env::var("LUNA_DEFAULTS__MODEL") {
        config.defaults.model = Some(val);
    }
    if let Ok(val) = std::env::var("LUNA_DEFAULTS__TEMPERATURE") {
        if let Ok(t) = val.parse::<f64>() {
            config.defaults.temperature = t;
        }
    }
    if let Ok(val) = std::env::var("LUNA_DEFAULTS__MAX_TOKENS") {
        if let Ok(n) = val.parse::<u32>() {
            config.defaults.max_tokens = n;
        }
    }

    // Orchestrator
    if let Ok(val) = std::env::var("LUNA_ORCHESTRATOR__PROVIDER_TIMEOUT_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.orchestrator.provider_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("LUNA_ORCHESTRATOR__CONSENSUS_PROVIDER") {
        match val.parse::<ProviderId>() {
            Ok(id) => config.orchestrator.consensus_provider = id,
            Err(e) => warn!("Ignoring LUNA_ORCHESTRATOR__CONSENSUS_PROVIDER: {}", e),
        }
    }
    if let Ok(val) = std::env::var("LUNA_ORCHESTRATOR__CONSENSUS_MODEL") {
        config.orchestrator.consensus_model = Some(val);
    }

    // Security
    if let Ok(val) = std::env::var("LUNA_SECURITY__ENCRYPTION_KEY") {
        config.security.encryption_key = val;
    }

    config
}

/// The conventional variables each vendor's own SDKs read.
fn vendor_key_vars(id: ProviderId) -> &'static [&'static str] {
    match id {
        ProviderId::OpenAi => &["OPENAI_API_KEY"],
        ProviderId::Google => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        ProviderId::Anthropic => &["ANTHROPIC_API_KEY"],
    }
}

/// Apply env var overrides for a single provider.
fn apply_provider_env(provider: &mut ProviderConfig, id: ProviderId) {
    let name = id.as_str().to_uppercase();

    if let Ok(val) = std::env::var(format!("LUNA_PROVIDERS__{name}__API_KEY")) {
        provider.api_key = val;
    }
    if let Ok(val) = std::env::var(format!("LUNA_PROVIDERS__{name}__API_BASE")) {
        provider.api_base = Some(val);
    }
    if let Ok(val) = std::env::var(format!("LUNA_PROVIDERS__{name}__TIMEOUT_SECS")) {
        if let Ok(n) = val.parse::<u64>() {
            provider.timeout_secs = n;
        }
    }

    if !provider.is_configured() {
        for var in vendor_key_vars(id) {
            if let Ok(val) = std::env::var(var) {
                if !val.trim().is_empty() {
                    debug!(provider = %id, "Using system API key from {}", var);
                    provider.api_key = val;
                    break;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
