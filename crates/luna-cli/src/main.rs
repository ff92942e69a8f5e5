//! Luna CLI — entry point.
//!
//! # Commands
//!
//! - `luna status` — configuration and provider availability
//! - `luna chat -m MESSAGE` — one provider through the adapter service
//! - `luna compare -m MESSAGE` — the same prompt against several providers
//! - `luna consensus -m MESSAGE` — compare, then synthesize one answer
//! - `luna encrypt-key --key KEY` — the stored form of a per-user API key

mod chat;
mod compare;
mod encrypt_key;
mod helpers;
mod status;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use luna_core::config::{get_config_path, load_config};
use luna_core::types::ProviderId;
use luna_core::utils::expand_home;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🌙 Luna — one prompt, many models
#[derive(Parser)]
#[command(name = "luna", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    logs: bool,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Config file (default: ~/.luna/config.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration and provider status
    Status,

    /// Ask one provider
    Chat {
        #[command(flatten)]
        prompt: PromptArgs,

        /// Provider (openai, google/gemini, anthropic/claude)
        #[arg(short, long)]
        provider: Option<ProviderId>,

        /// Model; the provider default when omitted
        #[arg(long)]
        model: Option<String>,

        /// Stream the answer as it is generated
        #[arg(long, default_value_t = false)]
        stream: bool,
    },

    /// Ask several providers at once and show every answer
    Compare {
        #[command(flatten)]
        prompt: PromptArgs,

        /// Providers to ask, comma-separated; every available one when omitted
        #[arg(short, long, value_delimiter = ',')]
        providers: Vec<ProviderId>,

        /// Stream every provider concurrently
        #[arg(long, default_value_t = false)]
        stream: bool,
    },

    /// Ask several providers and merge their answers
    Consensus {
        #[command(flatten)]
        prompt: PromptArgs,

        /// Providers to ask, comma-separated; every available one when omitted
        #[arg(short, long, value_delimiter = ',')]
        providers: Vec<ProviderId>,
    },

    /// Encrypt an API key with the configured encryption key
    EncryptKey {
        /// The plaintext API key
        #[arg(long, required_unless_present = "generate")]
        key: Option<String>,

        /// Print a fresh base64 encryption key instead
        #[arg(long, default_value_t = false)]
        generate: bool,
    },
}

/// Prompt arguments shared by the generation commands.
#[derive(Args)]
struct PromptArgs {
    /// The user message
    #[arg(short, long)]
    message: String,

    /// Optional system prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Sampling temperature override
    #[arg(short, long)]
    temperature: Option<f64>,

    /// Max tokens override
    #[arg(long)]
    max_tokens: Option<u32>,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logs);
    let config_path = cli
        .config
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(get_config_path);
    let config = load_config(Some(&config_path));

    match cli.command {
        Commands::Status => status::run(&config, &config_path, cli.json),
        Commands::Chat {
            prompt,
            provider,
            model,
            stream,
        } => {
            let prompt = helpers::Prompt::from(prompt);
            chat::run(&config, prompt, provider, model, stream, cli.json).await
        }
        Commands::Compare {
            prompt,
            providers,
            stream,
        } => compare::run(&config, prompt.into(), providers, stream, cli.json).await,
        Commands::Consensus { prompt, providers } => {
            compare::run_consensus(&config, prompt.into(), providers, cli.json).await
        }
        Commands::EncryptKey { key, generate } => encrypt_key::run(&config, key, generate),
    }
}

impl From<PromptArgs> for helpers::Prompt {
    fn from(args: PromptArgs) -> Self {
        helpers::Prompt {
            message: args.message,
            system: args.system,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("luna=debug,luna_core=debug,luna_providers=debug,luna_orchestrator=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
