//! `luna chat` — one prompt, one provider, through the adapter service.

use std::io::Write;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use luna_core::config::Config;
use luna_core::types::{ProviderId, StreamChunk, Usage};

use crate::helpers::{self, Prompt, CLI_USER};

pub async fn run(
    config: &Config,
    prompt: Prompt,
    provider: Option<ProviderId>,
    model: Option<String>,
    stream: bool,
    json: bool,
) -> Result<()> {
    let record = helpers::cli_record(config, provider, model);
    let provider = record.provider;
    let adapter = helpers::adapter_for(config, record).await;
    info!(provider = %provider, stream, "Running chat");

    if helpers::use_streaming(stream, json) {
        return run_streaming(&adapter, &prompt, provider).await;
    }

    let response = adapter
        .generate(CLI_USER, prompt.messages(), Some(prompt.overrides()))
        .await
        .with_context(|| format!("{} request failed", provider.display_name()))?;

    if json {
        return helpers::print_json(&serde_json::json!({
            "provider": provider,
            "model": response.model,
            "content": response.content,
            "usage": response.usage,
            "finishReason": response.finish_reason,
        }));
    }

    helpers::print_heading(provider.display_name(), &response.model);
    helpers::print_response(&response.content);
    print_usage(response.usage);
    Ok(())
}

async fn run_streaming(
    adapter: &luna_orchestrator::AdapterService,
    prompt: &Prompt,
    provider: ProviderId,
) -> Result<()> {
    helpers::print_heading(provider.display_name(), "streaming");

    let mut usage = None;
    let mut on_chunk = |chunk: StreamChunk| {
        if chunk.done {
            usage = chunk.usage;
            return;
        }
        print!("{}", chunk.content);
        // Best effort; a closed stdout surfaces on the final println.
        let _ = std::io::stdout().flush();
    };

    adapter
        .generate_streaming(CLI_USER, prompt.messages(), &mut on_chunk, Some(prompt.overrides()))
        .await
        .with_context(|| format!("{} stream failed", provider.display_name()))?;

    println!();
    print_usage(usage);
    Ok(())
}

fn print_usage(usage: Option<Usage>) {
    if let Some(u) = usage.filter(|u| !u.is_empty()) {
        println!(
            "{}",
            format!(
                "tokens: {} prompt + {} completion = {}",
                u.prompt_tokens, u.completion_tokens, u.total_tokens
            )
            .dimmed()
        );
    }
}
