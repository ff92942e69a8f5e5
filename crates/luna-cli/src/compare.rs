//! `luna compare` and `luna consensus` — one prompt, several providers.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use colored::Colorize;

use luna_core::config::Config;
use luna_core::types::ProviderId;
use luna_orchestrator::{MultiModelRequest, MultiStreamObserver, OrchestratorService, ProviderTarget};

use crate::helpers::{self, Prompt};

/// The requested providers, or every provider with a system key.
fn select_targets(service: &OrchestratorService, requested: Vec<ProviderId>) -> Result<Vec<ProviderTarget>> {
    let mut ids = if requested.is_empty() {
        service.available_providers()
    } else {
        requested
    };
    // A provider listed twice would only be asked twice.
    let mut seen = Vec::with_capacity(ids.len());
    ids.retain(|id| {
        let fresh = !seen.contains(id);
        seen.push(*id);
        fresh
    });

    if ids.is_empty() {
        bail!(
            "no provider has an API key; set providers.<name>.apiKey in {} or export OPENAI_API_KEY / GEMINI_API_KEY / ANTHROPIC_API_KEY",
            luna_core::config::get_config_path().display()
        );
    }
    Ok(ids.into_iter().map(ProviderTarget::from).collect())
}

fn build_request(service: &OrchestratorService, prompt: &Prompt, providers: Vec<ProviderId>) -> Result<MultiModelRequest> {
    Ok(MultiModelRequest::new(select_targets(service, providers)?, prompt.messages())
        .with_options(prompt.overrides()))
}

pub async fn run(config: &Config, prompt: Prompt, providers: Vec<ProviderId>, stream: bool, json: bool) -> Result<()> {
    let service = helpers::orchestrator_for(config);
    let request = build_request(&service, &prompt, providers)?;
    let credentials = helpers::cli_credentials(config);

    if helpers::use_streaming(stream, json) {
        let printer = StreamPrinter::default();
        service
            .generate_multi_model_streams(&request, &credentials, &printer)
            .await
            .context("multi-model stream failed")?;
        eprintln!();
        return Ok(());
    }

    let report = service
        .generate_multi_model_responses(&request, &credentials)
        .await
        .context("multi-model request failed")?;

    if json {
        return helpers::print_json(&report);
    }

    for response in &report.responses {
        helpers::print_provider_response(response);
    }
    println!();
    println!(
        "{} succeeded, {} failed in {} ms",
        report.success_count.to_string().green(),
        report.fail_count.to_string().red(),
        report.total_latency.as_millis()
    );
    Ok(())
}

pub async fn run_consensus(config: &Config, prompt: Prompt, providers: Vec<ProviderId>, json: bool) -> Result<()> {
    let service = helpers::orchestrator_for(config);
    let request = build_request(&service, &prompt, providers)?;

    let result = service
        .generate_consensus_response(&request, &helpers::cli_credentials(config))
        .await
        .context("consensus failed")?;

    if json {
        return helpers::print_json(&result);
    }

    for source in &result.sources {
        helpers::print_provider_response(source);
    }
    helpers::print_heading("Consensus", config.orchestrator.consensus_provider.display_name());
    helpers::print_response(&result.consensus);
    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Streaming output
// ─────────────────────────────────────────────

/// Buffers each provider's text and prints it whole when that provider
/// finishes, so answers never interleave on screen. Progress goes to stderr.
#[derive(Default)]
struct StreamPrinter {
    buffers: Mutex<BTreeMap<ProviderId, (String, String)>>,
}

impl StreamPrinter {
    /// The buffers, recovered if a callback panicked while holding them.
    fn buffers(&self) -> MutexGuard<'_, BTreeMap<ProviderId, (String, String)>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, provider: ProviderId) -> (String, String) {
        self.buffers().remove(&provider).unwrap_or_default()
    }
}

impl MultiStreamObserver for StreamPrinter {
    fn on_chunk(&self, provider: ProviderId, text: &str, model: &str) {
        self.buffers()
            .entry(provider)
            .or_insert_with(|| (model.to_string(), String::new()))
            .1
            .push_str(text);
        eprint!("{}", "·".dimmed());
        let _ = std::io::stderr().flush();
    }

    fn on_complete(&self, provider: ProviderId, model: &str) {
        let (_, text) = self.take(provider);
        eprintln!();
        helpers::print_heading(provider.display_name(), model);
        helpers::print_response(&text);
    }

    fn on_error(&self, provider: ProviderId, message: &str) {
        let (model, _) = self.take(provider);
        eprintln!();
        helpers::print_heading(provider.display_name(), &model);
        println!("{} {}", "✗".red(), message.red());
    }
}
