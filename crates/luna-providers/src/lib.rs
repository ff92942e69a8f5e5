//! LLM provider layer for Luna.
//!
//! Three vendor wire protocols behind one contract.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — trait that all providers implement
//! - [`openai::OpenAiProvider`], [`google::GoogleProvider`], [`anthropic::AnthropicProvider`]
//! - [`registry::ProviderRegistry`] — id → provider lookup built from config
//! - [`sse`] / [`stream`] — shared streaming plumbing

mod client;

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod registry;
pub mod sse;
pub mod stream;
pub mod traits;

// Re-export main types for convenience
pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use stream::ChunkEmitter;
pub use traits::{ChunkSink, LlmProvider};
