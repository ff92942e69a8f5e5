//! Scriptable in-process provider for service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use luna_core::error::{LlmError, Result};
use luna_core::types::{Credential, GenerationRequest, GenerationResponse, ProviderId, StreamChunk, Usage};
use luna_providers::{ChunkEmitter, ChunkSink, LlmProvider};

#[derive(Clone, Debug)]
pub enum Behavior {
    Reply(String),
    Fail(String),
    /// Reply after a delay.
    Slow(Duration, String),
    Hang,
}

pub struct FakeProvider {
    id: ProviderId,
    behavior: Behavior,
    system_key: bool,
    calls: AtomicUsize,
    last_credential: Mutex<Option<String>>,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl FakeProvider {
    pub fn new(id: ProviderId, behavior: Behavior) -> Self {
        Self {
            id,
            behavior,
            system_key: true,
            calls: AtomicUsize::new(0),
            last_credential: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    pub fn replying(id: ProviderId, text: &str) -> Self {
        Self::new(id, Behavior::Reply(text.to_string()))
    }

    pub fn failing(id: ProviderId, message: &str) -> Self {
        Self::new(id, Behavior::Fail(message.to_string()))
    }

    pub fn without_system_key(mut self) -> Self {
        self.system_key = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_credential(&self) -> Option<String> {
        self.last_credential.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }

    async fn run(&self, request: &GenerationRequest, credential: Option<&Credential>) -> Result<String> {
        self.check_model(&request.model)?;
        if credential.is_none() && !self.system_key {
            return Err(LlmError::MissingCredential { provider: self.id });
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock().unwrap() = credential.map(|c| c.expose().to_string());
        *self.last_request.lock().unwrap() = Some(request.clone());

        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail(message) => Err(LlmError::ProviderCallFailed {
                provider: self.id,
                model: request.model.clone(),
                status: Some(500),
                message: message.clone(),
                available: self.available_models(),
            }),
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn default_model(&self) -> &str {
        "fake-default"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["fake-default".to_string(), "fake-large".to_string()]
    }

    fn has_system_credential(&self) -> bool {
        self.system_key
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
    ) -> Result<GenerationResponse> {
        let content = self.run(request, credential).await?;
        Ok(GenerationResponse {
            content,
            model: request.model.clone(),
            usage: Some(Usage::new(3, 2)),
            finish_reason: Some("stop".into()),
        })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut ChunkSink<'_>,
        credential: Option<&Credential>,
    ) -> Result<()> {
        let content = self.run(request, credential).await?;
        let mut emitter = ChunkEmitter::new(self.id, &request.model, on_chunk);
        for word in content.split_inclusive(' ') {
            emitter.text(word);
        }
        emitter.record_usage(Some(3), Some(2));
        emitter.finish();
        Ok(())
    }
}

/// Collects every chunk a stream delivers.
pub fn chunk_collector(chunks: &mut Vec<StreamChunk>) -> impl FnMut(StreamChunk) + Send + '_ {
    move |chunk| chunks.push(chunk)
}
