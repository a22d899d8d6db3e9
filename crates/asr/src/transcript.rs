use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamped span of recognized text within a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds (>= start).
    pub end: f64,
    /// Text content. Empty only for non-speech placeholder segments.
    pub text: String,
    /// Confidence in [0, 1] when the backend reports one, `None` otherwise.
    pub confidence: Option<f64>,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            confidence,
        }
    }

    /// Segment duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Complete recognition output for one audio input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Complete transcribed text.
    pub text: String,
    /// Detected or declared language code.
    pub language: String,
    /// Time-stamped segments, ordered by non-decreasing start time.
    pub segments: Vec<Segment>,
    /// Name of the engine that produced this transcript.
    pub engine: String,
    pub created_at: DateTime<Utc>,
    /// Open-ended metadata (source label, inference timing, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Transcript {
    /// Builds a transcript, sorting segments by start time.
    pub fn new(
        text: impl Into<String>,
        language: impl Into<String>,
        mut segments: Vec<Segment>,
        engine: impl Into<String>,
    ) -> Self {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            text: text.into(),
            language: language.into(),
            segments,
            engine: engine.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Total duration in seconds: end time of the last segment, 0.0 if empty.
    pub fn duration(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Returns the segment covering `time` seconds, if any.
    pub fn segment_at(&self, time: f64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.start <= time && time <= s.end)
    }

    /// Renders the transcript in SRT subtitle format.
    pub fn to_srt(&self) -> String {
        let mut lines = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            lines.push(format!("{}", i + 1));
            lines.push(format!(
                "{} --> {}",
                format_srt_time(segment.start),
                format_srt_time(segment.end)
            ));
            lines.push(segment.text.clone());
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Formats seconds as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_srt_time(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds % 1.0) * 1000.0) as u64;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Audio encoding of a buffered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    Pcm16,
    Opus,
}

impl AudioEncoding {
    /// Wire name used in session-configuration events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm",
            Self::Opus => "opus",
        }
    }
}

/// A fully-buffered mono audio payload, as supplied by the audio pipeline.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
}

impl AudioPayload {
    pub fn pcm16(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            data,
            sample_rate,
            encoding: AudioEncoding::Pcm16,
        }
    }

    /// Payload duration in seconds. Only meaningful for PCM16 (2 bytes/sample).
    pub fn duration_secs(&self) -> f64 {
        match self.encoding {
            AudioEncoding::Pcm16 => self.data.len() as f64 / 2.0 / self.sample_rate as f64,
            AudioEncoding::Opus => 0.0,
        }
    }
}
