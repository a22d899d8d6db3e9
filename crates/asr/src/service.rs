//! High-level transcription service facade.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::asr::AsrEngine;
use crate::batch::{BatchItem, BatchOutcome, run_batch};
use crate::config::ServiceConfig;
use crate::error::EngineError;
use crate::registry::EngineRegistry;
use crate::resilience::{CircuitBreaker, EngineFallback, RetryStrategy};
use crate::transcript::{AudioPayload, Transcript};

/// Sample rate assumed for raw files; the audio pipeline upstream is
/// responsible for decoding and resampling.
const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Unified high-level API over the engine registry, retry strategy and
/// circuit breaker.
pub struct TranscriptionService {
    registry: Arc<EngineRegistry>,
    config: ServiceConfig,
    retry: RetryStrategy,
    breaker: CircuitBreaker,
    /// Currently selected engine.
    engine: RwLock<Option<Arc<dyn AsrEngine>>>,
}

impl TranscriptionService {
    pub fn new(registry: Arc<EngineRegistry>, config: ServiceConfig) -> Self {
        let retry = RetryStrategy::new(&config.retry);
        let breaker = CircuitBreaker::new(&config.circuit_breaker);
        Self {
            registry,
            config,
            retry,
            breaker,
            engine: RwLock::new(None),
        }
    }

    /// Selects and initializes an engine (the default when `None`).
    pub async fn initialize(&self, engine_name: Option<&str>) -> Result<(), EngineError> {
        let name = engine_name.unwrap_or(&self.config.default_engine);
        let engine = self
            .registry
            .get_or_create(name, self.config.engine_config(name))
            .await?;
        *self.engine.write().await = Some(engine);
        info!(engine = %name, "Transcription service initialized");
        Ok(())
    }

    /// Switches the current engine.
    pub async fn switch_engine(&self, engine_name: &str) -> Result<(), EngineError> {
        info!(engine = %engine_name, "Switching engine");
        self.initialize(Some(engine_name)).await
    }

    async fn current_engine(&self) -> Result<Arc<dyn AsrEngine>, EngineError> {
        self.engine.read().await.as_ref().map(Arc::clone).ok_or_else(|| {
            EngineError::Configuration("service not initialized; call initialize first".to_string())
        })
    }

    /// Recognizes a raw audio file (16 kHz mono PCM16; decoding belongs to
    /// the audio pipeline upstream).
    pub async fn recognize_file(
        &self,
        path: impl AsRef<Path>,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            EngineError::AudioProcessing(format!("failed to read '{}': {e}", path.display()))
        })?;
        info!(file = %path.display(), bytes = data.len(), "Processing file");
        self.recognize_buffer(AudioPayload::pcm16(data, DEFAULT_SAMPLE_RATE), language)
            .await
    }

    /// Recognizes a buffered payload on the current engine, with retries;
    /// the outcome feeds the circuit breaker.
    pub async fn recognize_buffer(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        let engine = self.current_engine().await?;
        let result = recognize_with_retry(&self.retry, &engine, &audio, language).await;
        match &result {
            Ok(_) => self.breaker.record_success(engine.name()),
            Err(e) => {
                self.breaker.record_failure(engine.name());
                warn!(engine = %engine.name(), error = %e, "Recognition failed");
            }
        }
        result
    }

    /// Walks the priority-ordered engine list until one succeeds.
    ///
    /// Engines whose circuit is open are skipped; every candidate gets the
    /// full retry budget and its outcome is recorded with the breaker.
    pub async fn recognize_with_fallback(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        let priority = if self.config.priority_engines.is_empty() {
            vec![self.config.default_engine.clone()]
        } else {
            self.config.priority_engines.clone()
        };
        let mut fallback = EngineFallback::new(priority);
        let mut candidate = fallback.current_engine().map(str::to_string);
        let mut last_error = None;

        while let Some(name) = candidate {
            if self.breaker.is_open(&name) {
                warn!(engine = %name, "Circuit open, skipping engine");
                candidate = fallback.next_engine().map(str::to_string);
                continue;
            }

            match self.try_engine(&name, audio.clone(), language).await {
                Ok(transcript) => {
                    self.breaker.record_success(&name);
                    return Ok(transcript);
                }
                Err(e) => {
                    self.breaker.record_failure(&name);
                    warn!(engine = %name, error = %e, "Engine failed, trying next candidate");
                    last_error = Some(e);
                    candidate = fallback.next_engine().map(str::to_string);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EngineError::Configuration("no fallback engines configured".to_string())
        }))
    }

    async fn try_engine(
        &self,
        name: &str,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        let engine = self
            .registry
            .get_or_create(name, self.config.engine_config(name))
            .await?;
        recognize_with_retry(&self.retry, &engine, &audio, language).await
    }

    /// Recognizes many inputs under a concurrency ceiling on the current
    /// engine. Retry composes underneath each item; the batch never fails
    /// as a whole.
    pub async fn recognize_batch(
        &self,
        items: Vec<BatchItem>,
        max_concurrency: usize,
    ) -> Result<BatchOutcome, EngineError> {
        let engine = self.current_engine().await?;
        let retry = self.retry.clone();

        let outcome = run_batch(items, max_concurrency, move |item| {
            let engine = Arc::clone(&engine);
            let retry = retry.clone();
            async move {
                recognize_with_retry(&retry, &engine, &item.audio, item.language.as_deref()).await
            }
        })
        .await;

        Ok(outcome)
    }

    /// Names of all registered engines.
    pub fn list_engines(&self) -> Vec<String> {
        self.registry.list_engines()
    }

    /// Drops the current engine and drains the registry.
    pub async fn cleanup(&self) {
        *self.engine.write().await = None;
        self.registry.cleanup_all().await;
        info!("Transcription service cleaned up");
    }
}

async fn recognize_with_retry(
    retry: &RetryStrategy,
    engine: &Arc<dyn AsrEngine>,
    audio: &AudioPayload,
    language: Option<&str>,
) -> Result<Transcript, EngineError> {
    retry
        .execute(|| {
            let engine = Arc::clone(engine);
            let audio = audio.clone();
            let language = language.map(str::to_string);
            async move { engine.recognize(audio, language.as_deref()).await }
        })
        .await
}
