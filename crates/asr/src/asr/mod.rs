#[cfg(feature = "local-whisper")]
pub mod local_whisper;

pub mod realtime;
pub mod remote_batch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::transcript::{AudioPayload, Transcript};

/// A streaming recognition result (partial or final).
///
/// Consumers may receive zero or more non-final results before exactly one
/// final result (or a failure) per logical utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Whether this is a final result or an interim/partial result.
    pub is_final: bool,
    /// Start time in seconds, relative to the utterance.
    pub start: f64,
    /// End time in seconds, relative to the utterance.
    pub end: f64,
    /// Detected language (if available).
    pub language: Option<String>,
    /// Confidence score in [0, 1] (if available).
    pub confidence: Option<f64>,
}

/// Trait for pluggable speech-recognition backends.
///
/// Implementations are held behind `Arc` and must accept concurrent
/// `recognize` calls once initialized.
#[async_trait]
pub trait AsrEngine: Send + Sync + 'static {
    /// Loads models or validates credentials. Idempotent; callable again
    /// after `cleanup`.
    async fn initialize(&self) -> Result<(), EngineError>;

    /// Transcribes a fully-buffered mono audio payload.
    async fn recognize(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError>;

    /// Transcribes a lazy sequence of audio chunks, producing a lazy
    /// sequence of partial and final results.
    ///
    /// Dropping the returned receiver cancels the session; implementations
    /// must release the underlying connection when that happens.
    async fn recognize_stream(
        &self,
        audio_rx: mpsc::Receiver<Vec<u8>>,
        language: Option<&str>,
    ) -> Result<mpsc::Receiver<RecognitionResult>, EngineError>;

    /// Supported language codes (ISO 639-1).
    fn supported_languages(&self) -> Vec<String>;

    /// Engine name, used for registry keys and transcript provenance.
    fn name(&self) -> &str;

    /// Releases model/connection resources. Safe to call multiple times.
    async fn cleanup(&self) -> Result<(), EngineError>;
}

impl std::fmt::Debug for dyn AsrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsrEngine")
            .field("name", &self.name())
            .finish()
    }
}
