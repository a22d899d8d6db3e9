//! Wire events for the generic realtime transcription protocol.
//!
//! A persistent message-oriented connection exchanges JSON events: the
//! client configures the session, appends base64-encoded audio chunks and
//! optionally commits the turn; the server answers with partial and final
//! transcripts. Concrete backends map onto this shape with their own field
//! names.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input-transcription settings inside a session-configuration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionParams {
    pub language: String,
}

/// Server-side voice-activity turn detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionParams {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub silence_duration_ms: u64,
}

/// Negotiated session parameters.
///
/// `turn_detection: None` serializes as an explicit `null`, which tells the
/// backend the client will commit turns itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub sample_rate: u32,
    pub input_audio_transcription: TranscriptionParams,
    pub turn_detection: Option<TurnDetectionParams>,
}

/// Outbound (client -> server) events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: SessionParams,
    },
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        event_id: String,
        /// Base64-encoded audio chunk.
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    Commit { event_id: String },
}

impl ClientEvent {
    pub fn session_update(session: SessionParams) -> Self {
        Self::SessionUpdate {
            event_id: next_event_id(),
            session,
        }
    }

    pub fn audio_append(chunk: &[u8]) -> Self {
        Self::AudioAppend {
            event_id: next_event_id(),
            audio: BASE64.encode(chunk),
        }
    }

    pub fn commit() -> Self {
        Self::Commit {
            event_id: next_event_id(),
        }
    }
}

/// Inbound (server -> client) events. Unknown kinds parse as `Other` and
/// are ignored by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.updated")]
    SessionUpdated,
    /// Intermediate transcript for the in-progress turn.
    #[serde(rename = "conversation.item.input_audio_transcription.text")]
    TranscriptText {
        #[serde(default)]
        stash: String,
    },
    /// Final transcript for the turn.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

fn next_event_id() -> String {
    format!("event_{}", Uuid::new_v4().simple())
}
