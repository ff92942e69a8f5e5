//! Configuration system — schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use luna_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Timeout: {}s", cfg.orchestrator.provider_timeout_secs);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    Config, DefaultsConfig, OrchestratorConfig, ProviderConfig, ProvidersConfig, SecurityConfig,
};
