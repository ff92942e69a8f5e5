//! `luna status` — show configuration and provider status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use luna_core::config::Config;

use crate::helpers;

/// Run the status command.
pub fn run(config: &Config, config_path: &Path, json: bool) -> Result<()> {
    let service = helpers::orchestrator_for(config);
    let providers = service.provider_info();

    if json {
        return helpers::print_json(&providers);
    }

    println!();
    println!("{}", "🌙 Luna Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".red().to_string()
        }
    );

    let defaults = &config.defaults;
    println!(
        "  {:<18} {} / {}",
        "Default:".bold(),
        defaults.provider.display_name(),
        defaults.model.as_deref().unwrap_or("provider default")
    );
    println!(
        "  {:<18} {} | max_tokens: {}",
        "Parameters:".bold(),
        format!("temp: {}", defaults.temperature).dimmed(),
        format!("{}", defaults.max_tokens).dimmed(),
    );

    let orchestrator = &config.orchestrator;
    let timeout = match orchestrator.provider_timeout_secs {
        0 => "none".to_string(),
        secs => format!("{secs}s"),
    };
    println!(
        "  {:<18} {} / {} | timeout: {}",
        "Consensus:".bold(),
        orchestrator.consensus_provider.display_name(),
        orchestrator.consensus_model.as_deref().unwrap_or("provider default"),
        timeout
    );

    let encryption = if config.security.encryption_key.trim().is_empty() {
        format!("{}", "· not configured (user keys ignored)".dimmed())
    } else {
        format!("{} (key set)", "✓".green())
    };
    println!("  {:<18} {}", "Encryption:".bold(), encryption);

    println!();
    println!("  {}", "Providers:".bold());
    for info in &providers {
        let status = if info.available {
            format!("{} (key set)", "✓".green())
        } else {
            format!("{}", "· not configured".dimmed())
        };
        println!(
            "    {:<20} {:<28} {}",
            info.name,
            info.default_model.dimmed(),
            status
        );
        println!(
            "    {:<20} {}",
            "",
            format!("{} models", info.models.len()).dimmed()
        );
    }

    println!();

    Ok(())
}
