//! Remote realtime ASR backend over a chunked WebSocket session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{AsrEngine, RecognitionResult};
use crate::error::EngineError;
use crate::streaming::{
    RealtimeConnector, StreamingSession, StreamingSessionConfig, TurnDetection, WsConnector,
};
use crate::transcript::{AudioPayload, Segment, Transcript};

pub const ENGINE_NAME: &str = "remote_realtime";

const SUPPORTED_LANGUAGES: [&str; 11] = [
    "zh", "en", "ja", "de", "ko", "ru", "fr", "pt", "ar", "it", "es",
];

/// Realtime engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub name: String,
    /// Model requested via the endpoint query string.
    pub model: String,
    pub api_key: String,
    pub url: String,
    /// Default language when the caller gives no hint.
    pub language: String,
    pub sample_rate: u32,
    /// Wire name of the audio encoding ("pcm", "opus").
    pub format: String,
    /// Server-side voice-activity end-of-turn detection. When false, the
    /// session commits turns explicitly.
    pub enable_vad: bool,
    /// Bytes per audio-append event (~0.1 s of PCM16 at 16 kHz).
    pub chunk_bytes: usize,
    /// Pacing between chunk appends, in milliseconds.
    pub chunk_interval_ms: u64,
    pub finalize_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: ENGINE_NAME.to_string(),
            model: "qwen3-asr-flash-realtime".to_string(),
            api_key: String::new(),
            url: "wss://dashscope.aliyuncs.com/api-ws/v1/realtime".to_string(),
            language: "en".to_string(),
            sample_rate: 16000,
            format: "pcm".to_string(),
            enable_vad: true,
            chunk_bytes: 3200,
            chunk_interval_ms: 100,
            finalize_timeout_secs: 60,
        }
    }
}

/// Remote realtime speech-recognition engine.
///
/// Each recognition call drives one streaming session: connect, negotiate,
/// append chunks, signal end-of-turn, collect the final transcript.
pub struct RealtimeEngine {
    config: RealtimeConfig,
    connector: Arc<dyn RealtimeConnector>,
    initialized: AtomicBool,
}

impl RealtimeEngine {
    pub fn new(config: RealtimeConfig) -> Self {
        let url = format!("{}?model={}", config.url, config.model);
        let connector = Arc::new(WsConnector::new(url, config.api_key.clone()));
        Self::with_connector(config, connector)
    }

    /// Builds the engine on an alternate connector (used by tests).
    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn RealtimeConnector>) -> Self {
        Self {
            config,
            connector,
            initialized: AtomicBool::new(false),
        }
    }

    fn session_config(&self, language: Option<&str>) -> StreamingSessionConfig {
        let turn_detection = if self.config.enable_vad {
            TurnDetection::default()
        } else {
            TurnDetection::ClientCommit
        };
        StreamingSessionConfig {
            language: language.unwrap_or(&self.config.language).to_string(),
            sample_rate: self.config.sample_rate,
            audio_format: self.config.format.clone(),
            turn_detection,
            chunk_interval: Duration::from_millis(self.config.chunk_interval_ms),
            negotiate_settle: Duration::from_secs(2),
            finalize_timeout: Duration::from_secs(self.config.finalize_timeout_secs),
        }
    }

    async fn ensure_initialized(&self) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.initialize().await
    }
}

#[async_trait]
impl AsrEngine for RealtimeEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.config.api_key.is_empty() {
            return Err(EngineError::initialization(
                ENGINE_NAME,
                "API key is not configured",
            ));
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            model = %self.config.model,
            language = %self.config.language,
            sample_rate = self.config.sample_rate,
            "Realtime engine initialized"
        );
        Ok(())
    }

    async fn recognize(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        self.ensure_initialized().await?;

        let duration = audio.duration_secs();
        let chunks: Vec<Vec<u8>> = audio
            .data
            .chunks(self.config.chunk_bytes.max(1))
            .map(|c| c.to_vec())
            .collect();

        let (audio_tx, audio_rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk; the only send failure is a
            // closed receiver, which cannot happen before the session runs.
            audio_tx
                .send(chunk)
                .await
                .map_err(|_| EngineError::recognition(ENGINE_NAME, "audio channel closed"))?;
        }
        drop(audio_tx);

        // Whole-buffer mode only needs the final text; partials are drained
        // so the session never blocks on a full results channel.
        let (results_tx, mut results_rx) = mpsc::channel(64);
        tokio::spawn(async move { while results_rx.recv().await.is_some() {} });

        let mut session =
            StreamingSession::new(ENGINE_NAME, self.session_config(language));
        let text = session.run(self.connector.as_ref(), audio_rx, &results_tx).await?;
        drop(results_tx);

        let language = language.unwrap_or(&self.config.language).to_string();
        info!(chars = text.len(), "Realtime recognition completed");

        // The backend reports no per-segment timestamps; the whole turn is
        // one segment spanning the payload.
        let segments = vec![Segment::new(0.0, duration, text.trim(), None)];
        Ok(Transcript::new(text.trim(), language, segments, ENGINE_NAME))
    }

    async fn recognize_stream(
        &self,
        audio_rx: mpsc::Receiver<Vec<u8>>,
        language: Option<&str>,
    ) -> Result<mpsc::Receiver<RecognitionResult>, EngineError> {
        self.ensure_initialized().await?;

        let (results_tx, results_rx) = mpsc::channel(64);
        let mut session =
            StreamingSession::new(ENGINE_NAME, self.session_config(language));
        let connector = Arc::clone(&self.connector);

        tokio::spawn(async move {
            if let Err(e) = session.run(connector.as_ref(), audio_rx, &results_tx).await {
                warn!(error = %e, "Realtime streaming session ended with error");
            }
        });

        Ok(results_rx)
    }

    fn supported_languages(&self) -> Vec<String> {
        SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect()
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}
