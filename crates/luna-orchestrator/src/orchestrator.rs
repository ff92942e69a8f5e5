//! Orchestrator Service — one prompt, many providers.
//!
//! Every provider runs concurrently on the caller's task. A provider's
//! failure (error, bad model, timeout) becomes data in the result and never
//! aborts its siblings. Batch results keep the requested provider order.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use luna_core::config::OrchestratorConfig;
use luna_core::error::{LlmError, Result};
use luna_core::types::{
    ConsensusResponse, CredentialMap, GenerationOptions, GenerationRequest, Message,
    MultiModelReport, ProviderId, ProviderInfo, ProviderResponse, Role, StreamChunk,
};
use luna_providers::{LlmProvider, ProviderRegistry};

// ─────────────────────────────────────────────
// Request types
// ─────────────────────────────────────────────

/// One provider to include in a multi-model call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTarget {
    pub provider: ProviderId,
    /// The provider default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderTarget {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl From<ProviderId> for ProviderTarget {
    fn from(provider: ProviderId) -> Self {
        Self::new(provider)
    }
}

/// A prompt fanned out to several providers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiModelRequest {
    pub providers: Vec<ProviderTarget>,
    pub messages: Vec<Message>,
    /// Shared sampling options. `model` is ignored here; each target picks its own.
    #[serde(default)]
    pub options: GenerationOptions,
}

impl MultiModelRequest {
    pub fn new(providers: Vec<ProviderTarget>, messages: Vec<Message>) -> Self {
        Self {
            providers,
            messages,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(LlmError::InvalidRequest("at least one provider is required".into()));
        }
        if self.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".into()));
        }
        Ok(())
    }
}

/// Receives progress from every provider of a streaming multi-model call.
///
/// Callbacks from different providers interleave freely. Per provider, all
/// `on_chunk` calls come in stream order and are followed by exactly one of
/// `on_complete` or `on_error`.
pub trait MultiStreamObserver: Send + Sync {
    fn on_chunk(&self, provider: ProviderId, text: &str, model: &str);
    fn on_complete(&self, provider: ProviderId, model: &str);
    fn on_error(&self, provider: ProviderId, message: &str);
}

// ─────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────

const SYNTHESIS_SYSTEM_PROMPT: &str = "You combine answers from several AI assistants into one. \
Keep every correct point once, drop duplicates, resolve disagreements in favor of the best-supported \
claim and do not mention the individual assistants.";

pub struct OrchestratorService {
    registry: ProviderRegistry,
    /// Per-provider limit; `None` waits for as long as the call takes.
    provider_timeout: Option<Duration>,
    consensus_provider: ProviderId,
    consensus_model: Option<String>,
}

impl OrchestratorService {
    pub fn new(registry: ProviderRegistry, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            provider_timeout: limit(Duration::from_secs(config.provider_timeout_secs)),
            consensus_provider: config.consensus_provider,
            consensus_model: config.consensus_model.clone(),
        }
    }

    /// Replace the per-provider limit. Zero disables it.
    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = limit(provider_timeout);
        self
    }

    /// Await `call` under the per-provider limit; `None` once it is exceeded.
    async fn bounded<F: Future>(&self, call: F) -> Option<F::Output> {
        match self.provider_timeout {
            Some(max) => timeout(max, call).await.ok(),
            None => Some(call.await),
        }
    }

    /// Resolve the provider and build its request; the target's model (or
    /// the provider default) is validated here.
    fn prepare(
        &self,
        target: &ProviderTarget,
        messages: &[Message],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<(Arc<dyn LlmProvider>, GenerationRequest)> {
        let provider = self.registry.get(target.provider)?;
        let model = target
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        provider.check_model(&model)?;

        let shared = GenerationOptions {
            model: None,
            ..options.clone()
        };
        let request = GenerationRequest::new(model, messages.to_vec())
            .with_options(&shared)
            .streaming(stream);
        Ok((provider, request))
    }

    fn timeout_message(&self) -> String {
        format!("timed out after {:?}", self.provider_timeout.unwrap_or_default())
    }

    async fn run_one(
        &self,
        target: &ProviderTarget,
        messages: &[Message],
        options: &GenerationOptions,
        credentials: &CredentialMap,
    ) -> ProviderResponse {
        let start = Instant::now();
        let requested_model = target.model.clone().unwrap_or_default();

        let (provider, request) = match self.prepare(target, messages, options, false) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(provider = %target.provider, error = %e, "Provider rejected before dispatch");
                return ProviderResponse::failed(target.provider, requested_model, e.to_string(), start.elapsed());
            }
        };

        let credential = credentials.get(&target.provider);
        let outcome = self.bounded(provider.generate(&request, credential)).await;
        let latency = start.elapsed();

        match outcome {
            Some(Ok(response)) => {
                info!(
                    provider = %target.provider,
                    model = %request.model,
                    latency_ms = latency.as_millis() as u64,
                    "Provider succeeded"
                );
                ProviderResponse::succeeded(target.provider, request.model, response.content, latency)
            }
            Some(Err(e)) => {
                warn!(provider = %target.provider, model = %request.model, error = %e, "Provider failed");
                ProviderResponse::failed(target.provider, request.model, e.to_string(), latency)
            }
            None => {
                warn!(provider = %target.provider, model = %request.model, "Provider timed out");
                ProviderResponse::failed(target.provider, request.model, self.timeout_message(), latency)
            }
        }
    }

    /// Run every requested provider concurrently and collect all outcomes.
    ///
    /// Only malformed input fails the call; provider failures are reported
    /// per entry.
    pub async fn generate_multi_model_responses(
        &self,
        request: &MultiModelRequest,
        credentials: &CredentialMap,
    ) -> Result<MultiModelReport> {
        request.validate()?;
        let start = Instant::now();
        debug!(providers = request.providers.len(), "Dispatching multi-model batch");

        let responses = join_all(
            request
                .providers
                .iter()
                .map(|target| self.run_one(target, &request.messages, &request.options, credentials)),
        )
        .await;

        let report = MultiModelReport::new(responses, start.elapsed());
        info!(
            succeeded = report.success_count,
            failed = report.fail_count,
            latency_ms = report.total_latency.as_millis() as u64,
            "Multi-model batch complete"
        );
        Ok(report)
    }

    async fn stream_one(
        &self,
        target: &ProviderTarget,
        request: &MultiModelRequest,
        credentials: &CredentialMap,
        observer: &dyn MultiStreamObserver,
    ) {
        let (provider, generation) =
            match self.prepare(target, &request.messages, &request.options, true) {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(provider = %target.provider, error = %e, "Provider rejected before dispatch");
                    observer.on_error(target.provider, &e.to_string());
                    return;
                }
            };

        let id = target.provider;
        let model = generation.model.as_str();
        let mut forward = |chunk: StreamChunk| {
            if !chunk.done {
                observer.on_chunk(id, &chunk.content, model);
            }
        };

        let start = Instant::now();
        let credential = credentials.get(&id);
        let outcome = self
            .bounded(provider.generate_streaming(&generation, &mut forward, credential))
            .await;

        match outcome {
            Some(Ok(())) => {
                info!(
                    provider = %id,
                    model,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Provider stream complete"
                );
                observer.on_complete(id, model);
            }
            Some(Err(e)) => {
                warn!(provider = %id, model, error = %e, "Provider stream failed");
                observer.on_error(id, &e.to_string());
            }
            None => {
                warn!(provider = %id, model, "Provider stream timed out");
                observer.on_error(id, &self.timeout_message());
            }
        }
    }

    /// Stream from every requested provider at once. Returns when every
    /// provider has completed, failed or timed out.
    pub async fn generate_multi_model_streams(
        &self,
        request: &MultiModelRequest,
        credentials: &CredentialMap,
        observer: &dyn MultiStreamObserver,
    ) -> Result<()> {
        request.validate()?;
        debug!(providers = request.providers.len(), "Dispatching multi-model streams");

        join_all(
            request
                .providers
                .iter()
                .map(|target| self.stream_one(target, request, credentials, observer)),
        )
        .await;
        Ok(())
    }

    /// Batch the request, then merge the successful answers into one.
    ///
    /// Zero successes fail with [`LlmError::NoSuccessfulResponses`]. A single
    /// success is returned verbatim. Otherwise one synthesis call is made; if
    /// it fails, the first success stands in for the consensus.
    pub async fn generate_consensus_response(
        &self,
        request: &MultiModelRequest,
        credentials: &CredentialMap,
    ) -> Result<ConsensusResponse> {
        let report = self.generate_multi_model_responses(request, credentials).await?;
        let sources: Vec<ProviderResponse> = report.successes().cloned().collect();

        let Some(first) = sources.first() else {
            return Err(LlmError::NoSuccessfulResponses {
                attempted: report.responses.len(),
            });
        };
        if sources.len() == 1 {
            debug!(provider = %first.provider, "Single success; skipping synthesis");
            return Ok(ConsensusResponse {
                consensus: first.content.clone(),
                sources,
            });
        }

        let consensus = match self.synthesize(request, &sources, credentials).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    provider = %self.consensus_provider,
                    error = %e,
                    "Consensus synthesis failed; using first successful response"
                );
                first.content.clone()
            }
        };
        Ok(ConsensusResponse { consensus, sources })
    }

    async fn synthesize(
        &self,
        request: &MultiModelRequest,
        sources: &[ProviderResponse],
        credentials: &CredentialMap,
    ) -> Result<String> {
        let mut target = ProviderTarget::new(self.consensus_provider);
        target.model = self.consensus_model.clone();

        let messages = vec![
            Message::system(SYNTHESIS_SYSTEM_PROMPT),
            Message::user(synthesis_prompt(&request.messages, sources)),
        ];
        let (provider, generation) = self.prepare(&target, &messages, &request.options, false)?;

        let start = Instant::now();
        let credential = credentials.get(&self.consensus_provider);
        let response = self
            .bounded(provider.generate(&generation, credential))
            .await
            .ok_or_else(|| LlmError::ProviderCallFailed {
                provider: self.consensus_provider,
                model: generation.model.clone(),
                status: None,
                message: self.timeout_message(),
                available: provider.available_models(),
            })??;

        info!(
            provider = %self.consensus_provider,
            model = %generation.model,
            sources = sources.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Consensus synthesized"
        );
        Ok(response.content)
    }

    /// Providers that can serve a request without a user key.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.registry
            .all()
            .iter()
            .filter(|p| p.has_system_credential())
            .map(|p| p.id())
            .collect()
    }

    /// Name, default model, catalog and availability of every provider.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        self.registry
            .all()
            .iter()
            .map(|p| ProviderInfo {
                id: p.id(),
                name: p.name().to_string(),
                default_model: p.default_model().to_string(),
                models: p.available_models(),
                available: p.has_system_credential(),
            })
            .collect()
    }
}

/// A zero duration means no limit.
fn limit(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// The user turn for the synthesis call: the last user question followed by
/// each answer labeled with its provider and model.
fn synthesis_prompt(messages: &[Message], sources: &[ProviderResponse]) -> String {
    let question = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default();

    let mut prompt = format!(
        "Question:\n{}\n\nHere are {} answers to it.\n",
        question,
        sources.len()
    );
    for (i, source) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "\n### Response {} ({} / {})\n{}\n",
            i + 1,
            source.provider.display_name(),
            source.model,
            source.content.trim()
        ));
    }
    prompt.push_str("\nWrite a single answer that merges these responses without repeating points.");
    prompt
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
