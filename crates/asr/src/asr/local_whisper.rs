//! Local Whisper ASR backend using whisper.cpp via whisper-rs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrEngine, RecognitionResult};
use crate::error::EngineError;
use crate::transcript::{AudioEncoding, AudioPayload, Segment, Transcript};

pub const ENGINE_NAME: &str = "local_whisper";

/// Streaming is emulated by transcribing buffered windows of this length.
const STREAM_WINDOW_SECS: usize = 30;

/// Local Whisper engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWhisperConfig {
    pub enabled: bool,
    pub name: String,
    /// Path to a GGML Whisper model file (e.g. ggml-base.bin).
    pub model_path: String,
    /// Default language. `None` enables auto-detection.
    pub language: Option<String>,
    pub sample_rate: u32,
}

impl Default for LocalWhisperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: ENGINE_NAME.to_string(),
            model_path: String::new(),
            language: None,
            sample_rate: 16000,
        }
    }
}

/// Local speech-recognition engine backed by whisper.cpp.
///
/// The model is loaded by `initialize` and dropped by `cleanup`; a new
/// inference state is created per call, so concurrent `recognize` calls
/// are safe.
pub struct LocalWhisperEngine {
    config: LocalWhisperConfig,
    ctx: RwLock<Option<Arc<WhisperContext>>>,
}

impl LocalWhisperEngine {
    pub fn new(config: LocalWhisperConfig) -> Self {
        Self {
            config,
            ctx: RwLock::new(None),
        }
    }

    async fn context(&self) -> Result<Arc<WhisperContext>, EngineError> {
        if let Some(ctx) = self.ctx.read().await.as_ref() {
            return Ok(Arc::clone(ctx));
        }
        self.initialize().await?;
        self.ctx
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| EngineError::initialization(ENGINE_NAME, "model not loaded"))
    }

    fn pcm_to_samples(&self, audio: &AudioPayload) -> Result<Vec<f32>, EngineError> {
        if audio.encoding != AudioEncoding::Pcm16 {
            return Err(EngineError::recognition(
                ENGINE_NAME,
                format!("unsupported input encoding {:?}, expected PCM16", audio.encoding),
            ));
        }
        Ok(audio
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect())
    }
}

/// Runs one Whisper inference pass on the blocking thread pool.
async fn transcribe_samples(
    ctx: Arc<WhisperContext>,
    samples: Vec<f32>,
    language: Option<String>,
) -> Result<(String, Option<String>, Vec<Segment>), EngineError> {
    let result = tokio::task::spawn_blocking(move || {
        let mut state = ctx
            .create_state()
            .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("state creation failed: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        });

        if let Some(ref lang) = language {
            params.set_language(Some(lang));
        } else {
            params.set_detect_language(true);
        }
        params.set_translate(false);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(false);
        params.set_no_speech_thold(0.6);
        params.set_suppress_blank(true);

        state
            .full(params, &samples)
            .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("inference failed: {e}")))?;

        let n_segments = state.full_n_segments();
        let mut text = String::new();
        let mut segments = Vec::new();
        for i in 0..n_segments {
            if let Some(segment) = state.get_segment(i)
                && let Ok(seg_text) = segment.to_str()
            {
                // Native timestamps are centiseconds.
                segments.push(Segment::new(
                    segment.start_timestamp() as f64 * 0.01,
                    segment.end_timestamp() as f64 * 0.01,
                    seg_text.trim(),
                    None,
                ));
                text.push_str(seg_text);
            }
        }

        let detected = whisper_rs::get_lang_str(state.full_lang_id_from_state())
            .map(|s| s.to_string())
            .or(language);

        Ok::<_, EngineError>((text.trim().to_string(), detected, segments))
    })
    .await
    .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("inference task join error: {e}")))??;

    Ok(result)
}

/// Transcribes one buffered window and forwards the result.
///
/// Returns false when the consumer has gone away or inference failed, so
/// the windowing loop can stop.
async fn emit_window(
    ctx: &Arc<WhisperContext>,
    lang: &Option<String>,
    sample_rate: u32,
    results_tx: &mpsc::Sender<RecognitionResult>,
    buffer: &mut Vec<u8>,
    window_start: &mut f64,
) -> bool {
    let window = std::mem::take(buffer);
    let duration = window.len() as f64 / 2.0 / sample_rate as f64;
    let samples: Vec<f32> = window
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    match transcribe_samples(Arc::clone(ctx), samples, lang.clone()).await {
        Ok((text, detected, _)) => {
            let result = RecognitionResult {
                text,
                is_final: true,
                start: *window_start,
                end: *window_start + duration,
                language: detected,
                confidence: None,
            };
            *window_start += duration;
            results_tx.send(result).await.is_ok()
        }
        Err(e) => {
            warn!(error = %e, "Windowed transcription failed");
            false
        }
    }
}

#[async_trait]
impl AsrEngine for LocalWhisperEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        let mut guard = self.ctx.write().await;
        if guard.is_some() {
            return Ok(());
        }
        if self.config.model_path.is_empty() {
            return Err(EngineError::initialization(
                ENGINE_NAME,
                "model_path is not configured",
            ));
        }

        let model_path = self.config.model_path.clone();
        info!(%model_path, "Loading Whisper model");
        let ctx = tokio::task::spawn_blocking(move || {
            WhisperContext::new_with_params(&model_path, WhisperContextParameters::default())
        })
        .await
        .map_err(|e| EngineError::initialization(ENGINE_NAME, format!("load task join error: {e}")))?
        .map_err(|e| {
            EngineError::initialization(
                ENGINE_NAME,
                format!("failed to load model '{}': {e}", self.config.model_path),
            )
        })?;

        *guard = Some(Arc::new(ctx));
        info!("Whisper model loaded");
        Ok(())
    }

    async fn recognize(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        let ctx = self.context().await?;
        let samples = self.pcm_to_samples(&audio)?;
        let lang = language
            .map(|l| l.to_string())
            .or_else(|| self.config.language.clone());

        let (text, detected, segments) = transcribe_samples(ctx, samples, lang).await?;
        debug!(chars = text.len(), ?detected, "Whisper transcription complete");

        Ok(Transcript::new(
            text,
            detected.unwrap_or_else(|| "unknown".to_string()),
            segments,
            ENGINE_NAME,
        ))
    }

    async fn recognize_stream(
        &self,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
        language: Option<&str>,
    ) -> Result<mpsc::Receiver<RecognitionResult>, EngineError> {
        let ctx = self.context().await?;
        let lang = language
            .map(|l| l.to_string())
            .or_else(|| self.config.language.clone());
        let window_bytes = self.config.sample_rate as usize * 2 * STREAM_WINDOW_SECS;
        let sample_rate = self.config.sample_rate;

        let (results_tx, results_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            let mut window_start = 0.0f64;

            while let Some(chunk) = audio_rx.recv().await {
                buffer.extend_from_slice(&chunk);
                if buffer.len() >= window_bytes
                    && !emit_window(&ctx, &lang, sample_rate, &results_tx, &mut buffer, &mut window_start)
                        .await
                {
                    return;
                }
            }
            if !buffer.is_empty() {
                emit_window(&ctx, &lang, sample_rate, &results_tx, &mut buffer, &mut window_start)
                    .await;
            }
        });

        Ok(results_rx)
    }

    fn supported_languages(&self) -> Vec<String> {
        // Whisper covers 99+ languages; advertise the commonly used set.
        [
            "zh", "en", "es", "fr", "de", "ja", "ko", "ru", "ar", "pt", "it", "nl", "tr", "pl",
            "sv", "vi",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        let mut guard = self.ctx.write().await;
        if guard.take().is_some() {
            info!("Whisper model released");
        }
        Ok(())
    }
}
