//! State machine driving one realtime transcription exchange.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

use super::events::{ClientEvent, ServerEvent, SessionParams, TranscriptionParams, TurnDetectionParams};
use super::{RealtimeConnector, RealtimeTransport};
use crate::asr::RecognitionResult;
use crate::error::EngineError;

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Negotiating,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

/// How the end of a turn is signaled to the backend.
#[derive(Debug, Clone)]
pub enum TurnDetection {
    /// The backend's own voice-activity detector ends the turn; the client
    /// appends a bounded run of synthetic silence after the last real chunk
    /// to trigger it.
    ServerVad {
        threshold: f64,
        silence_duration_ms: u64,
        silence_chunks: u32,
        silence_chunk_bytes: usize,
    },
    /// The client sends one explicit commit event after the last chunk.
    ClientCommit,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self::ServerVad {
            threshold: 0.2,
            silence_duration_ms: 800,
            silence_chunks: 30,
            silence_chunk_bytes: 1024,
        }
    }
}

/// Parameters for one streaming session.
#[derive(Debug, Clone)]
pub struct StreamingSessionConfig {
    pub language: String,
    pub sample_rate: u32,
    /// Wire name of the audio encoding ("pcm", "opus").
    pub audio_format: String,
    pub turn_detection: TurnDetection,
    /// Pacing delay between chunk appends. Zero disables pacing.
    pub chunk_interval: Duration,
    /// How long to wait for a negotiation ack before proceeding anyway.
    pub negotiate_settle: Duration,
    /// Overall deadline for the finalizing phase.
    pub finalize_timeout: Duration,
}

impl Default for StreamingSessionConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            sample_rate: 16000,
            audio_format: "pcm".to_string(),
            turn_detection: TurnDetection::default(),
            chunk_interval: Duration::from_millis(100),
            negotiate_settle: Duration::from_secs(2),
            finalize_timeout: Duration::from_secs(60),
        }
    }
}

/// One realtime network transcription exchange.
///
/// Connection, negotiation, chunked submission, end-of-turn signaling and
/// result collection are driven by awaiting events on the transport; the
/// connection is closed on every exit path, including abandonment by the
/// results consumer.
pub struct StreamingSession {
    backend: String,
    config: StreamingSessionConfig,
    state: SessionState,
    final_text: String,
}

impl StreamingSession {
    pub fn new(backend: &str, config: StreamingSessionConfig) -> Self {
        Self {
            backend: backend.to_string(),
            config,
            state: SessionState::Connecting,
            final_text: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    /// Runs the session to completion.
    ///
    /// Audio chunks are read from `audio_rx` until it closes; partial and
    /// final results are forwarded to `results_tx`. Returns the final
    /// transcript text, leaving the session in `Completed` or `Failed`.
    pub async fn run(
        &mut self,
        connector: &dyn RealtimeConnector,
        audio_rx: mpsc::Receiver<Vec<u8>>,
        results_tx: &mpsc::Sender<RecognitionResult>,
    ) -> Result<String, EngineError> {
        let mut transport = match connector.connect().await {
            Ok(t) => t,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(EngineError::recognition(&self.backend, e));
            }
        };

        let result = self
            .drive(transport.as_mut(), audio_rx, results_tx)
            .await;

        // Close before surfacing anything, on every path.
        transport.close().await;

        match result {
            Ok(text) => {
                self.state = SessionState::Completed;
                self.final_text = text.clone();
                let _ = results_tx
                    .send(RecognitionResult {
                        text: text.clone(),
                        is_final: true,
                        start: 0.0,
                        end: 0.0,
                        language: Some(self.config.language.clone()),
                        confidence: None,
                    })
                    .await;
                debug!(backend = %self.backend, chars = text.len(), "Streaming session completed");
                Ok(text)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!(backend = %self.backend, error = %e, "Streaming session failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        transport: &mut dyn RealtimeTransport,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
        results_tx: &mpsc::Sender<RecognitionResult>,
    ) -> Result<String, EngineError> {
        self.state = SessionState::Negotiating;
        transport
            .send(ClientEvent::session_update(self.session_params()))
            .await
            .map_err(|e| EngineError::recognition(&self.backend, e))?;

        // Wait for the ack, bounded. Dialects without an explicit ack
        // proceed after the settle delay.
        let settle_deadline = Instant::now() + self.config.negotiate_settle;
        loop {
            match timeout_at(settle_deadline, transport.recv()).await {
                Ok(Some(ServerEvent::SessionUpdated)) => break,
                Ok(Some(ServerEvent::Error { message })) => {
                    return Err(EngineError::recognition(
                        &self.backend,
                        format!("backend rejected session configuration: {message}"),
                    ));
                }
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(EngineError::recognition(
                        &self.backend,
                        "connection closed during negotiation",
                    ));
                }
                Err(_) => break,
            }
        }

        self.state = SessionState::Streaming;
        while let Some(chunk) = audio_rx.recv().await {
            transport
                .send(ClientEvent::audio_append(&chunk))
                .await
                .map_err(|e| EngineError::recognition(&self.backend, e))?;

            if let Some(text) = self.drain_inbound(transport, results_tx)? {
                return Ok(text);
            }
            if results_tx.is_closed() {
                return Err(EngineError::recognition(
                    &self.backend,
                    "consumer abandoned the session",
                ));
            }
            if !self.config.chunk_interval.is_zero() {
                sleep(self.config.chunk_interval).await;
            }
        }

        match self.config.turn_detection.clone() {
            TurnDetection::ServerVad {
                silence_chunks,
                silence_chunk_bytes,
                ..
            } => {
                let silence = vec![0u8; silence_chunk_bytes];
                for _ in 0..silence_chunks {
                    transport
                        .send(ClientEvent::audio_append(&silence))
                        .await
                        .map_err(|e| EngineError::recognition(&self.backend, e))?;
                    if let Some(text) = self.drain_inbound(transport, results_tx)? {
                        return Ok(text);
                    }
                }
            }
            TurnDetection::ClientCommit => {
                transport
                    .send(ClientEvent::commit())
                    .await
                    .map_err(|e| EngineError::recognition(&self.backend, e))?;
            }
        }

        self.state = SessionState::Finalizing;
        let deadline = Instant::now() + self.config.finalize_timeout;
        loop {
            match timeout_at(deadline, transport.recv()).await {
                Ok(Some(event)) => {
                    if let Some(text) = self.handle_event(event, results_tx)? {
                        return Ok(text);
                    }
                }
                Ok(None) => {
                    return Err(EngineError::recognition(
                        &self.backend,
                        "connection closed before completion",
                    ));
                }
                Err(_) => {
                    return Err(EngineError::recognition(
                        &self.backend,
                        format!(
                            "no completion event within {:.0?}",
                            self.config.finalize_timeout
                        ),
                    ));
                }
            }
            if results_tx.is_closed() {
                return Err(EngineError::recognition(
                    &self.backend,
                    "consumer abandoned the session",
                ));
            }
        }
    }

    /// Drains already-buffered inbound events without blocking chunk
    /// submission. Returns the final text on early completion.
    fn drain_inbound(
        &mut self,
        transport: &mut dyn RealtimeTransport,
        results_tx: &mpsc::Sender<RecognitionResult>,
    ) -> Result<Option<String>, EngineError> {
        while let Some(event) = transport.try_recv() {
            if let Some(text) = self.handle_event(event, results_tx)? {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Applies one inbound event. Partial transcripts are surfaced but do
    /// not change state; only completion and errors end the session.
    fn handle_event(
        &mut self,
        event: ServerEvent,
        results_tx: &mpsc::Sender<RecognitionResult>,
    ) -> Result<Option<String>, EngineError> {
        match event {
            ServerEvent::TranscriptText { stash } => {
                debug!(backend = %self.backend, "Partial transcript received");
                let _ = results_tx.try_send(RecognitionResult {
                    text: stash,
                    is_final: false,
                    start: 0.0,
                    end: 0.0,
                    language: Some(self.config.language.clone()),
                    confidence: None,
                });
                Ok(None)
            }
            ServerEvent::TranscriptCompleted { transcript } => Ok(Some(transcript)),
            ServerEvent::Error { message } => Err(EngineError::recognition(
                &self.backend,
                format!("backend error event: {message}"),
            )),
            ServerEvent::SessionUpdated | ServerEvent::Other => Ok(None),
        }
    }

    fn session_params(&self) -> SessionParams {
        let turn_detection = match &self.config.turn_detection {
            TurnDetection::ServerVad {
                threshold,
                silence_duration_ms,
                ..
            } => Some(TurnDetectionParams {
                kind: "server_vad".to_string(),
                threshold: *threshold,
                silence_duration_ms: *silence_duration_ms,
            }),
            TurnDetection::ClientCommit => None,
        };
        SessionParams {
            modalities: vec!["text".to_string()],
            input_audio_format: self.config.audio_format.clone(),
            sample_rate: self.config.sample_rate,
            input_audio_transcription: TranscriptionParams {
                language: self.config.language.clone(),
            },
            turn_detection,
        }
    }
}
