//! Shared CLI helpers — service wiring, the CLI user record, output.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use tracing::warn;

use luna_core::config::Config;
use luna_core::types::{CredentialMap, GenerationOptions, Message, ProviderId, ProviderResponse};
use luna_orchestrator::{
    AdapterService, AiSettingsRecord, CredentialResolver, InMemorySettingsStore, OrchestratorService,
};
use luna_providers::ProviderRegistry;

/// Settings key of the local CLI user.
pub const CLI_USER: &str = "cli";

/// What the user typed, before it becomes messages and options.
#[derive(Clone, Debug, Default)]
pub struct Prompt {
    pub message: String,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(self.message.as_str()));
        messages
    }

    /// Flag values as per-call overrides; unset flags leave the defaults alone.
    pub fn overrides(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }
}

/// The settings record the CLI acts as: config defaults, with the chosen
/// provider and model on top.
///
/// The configured default model only applies to the default provider.
pub fn cli_record(config: &Config, provider: Option<ProviderId>, model: Option<String>) -> AiSettingsRecord {
    let defaults = &config.defaults;
    let provider = provider.unwrap_or(defaults.provider);

    let mut record = AiSettingsRecord::new(provider);
    record.model = model.or_else(|| {
        if provider == defaults.provider {
            defaults.model.clone().filter(|m| !m.is_empty())
        } else {
            None
        }
    });
    record.sampling.temperature = Some(defaults.temperature);
    record.sampling.max_tokens = Some(defaults.max_tokens);
    for (id, stored) in &defaults.encrypted_api_keys {
        record.encrypted_api_keys.set(*id, stored.as_str());
    }
    record
}

/// The CLI user's own keys for a multi-model call, decrypted. Providers
/// without one fall back to their system key.
pub fn cli_credentials(config: &Config) -> CredentialMap {
    let record = cli_record(config, None, None);
    CredentialResolver::from_config(&config.security).resolve_all(Some(&record))
}

/// Whether to stream. JSON output needs the whole answer, so it wins.
pub fn use_streaming(stream: bool, json: bool) -> bool {
    if stream && json {
        warn!("--stream is ignored with --json; printing the complete result");
    }
    stream && !json
}

pub async fn adapter_for(config: &Config, record: AiSettingsRecord) -> AdapterService {
    let store = Arc::new(InMemorySettingsStore::new());
    store.insert(CLI_USER, record).await;
    AdapterService::new(
        ProviderRegistry::from_config(config),
        store,
        CredentialResolver::from_config(&config.security),
    )
}

pub fn orchestrator_for(config: &Config) -> OrchestratorService {
    OrchestratorService::new(ProviderRegistry::from_config(config), &config.orchestrator)
}

/// Print any serializable result as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}

/// Header line naming who answered.
pub fn print_heading(label: &str, model: &str) {
    println!();
    println!("{} {}", format!("🌙 {label}").cyan().bold(), format!("({model})").dimmed());
}

/// Print an answer body.
pub fn print_response(response: &str) {
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
}

/// Print one provider's outcome within a comparison.
pub fn print_provider_response(response: &ProviderResponse) {
    print_heading(response.provider.display_name(), &response.model);
    match &response.error {
        Some(error) if !response.success => println!("{} {}", "✗".red(), error.red()),
        _ => print_response(&response.content),
    }
    println!(
        "{}",
        format!("{} ms", response.latency.as_millis()).dimmed()
    );
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
