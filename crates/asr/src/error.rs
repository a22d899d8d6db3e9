use thiserror::Error;

/// Typed failure taxonomy for the recognition core.
///
/// Backend-internal failures always surface as one of these kinds; raw
/// transport or library errors never escape the crate boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine '{name}' not found. Available engines: {}", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("engine '{engine}' failed to initialize: {reason}")]
    Initialization { engine: String, reason: String },

    #[error("recognition failed on engine '{engine}': {reason}")]
    Recognition { engine: String, reason: String },

    #[error("audio processing failed: {0}")]
    AudioProcessing(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn initialization(engine: &str, reason: impl std::fmt::Display) -> Self {
        Self::Initialization {
            engine: engine.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn recognition(engine: &str, reason: impl std::fmt::Display) -> Self {
        Self::Recognition {
            engine: engine.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The documented failure kind for a mode a backend does not implement
    /// (e.g. raw-buffer recognition on a URL-only service).
    pub fn unsupported(engine: &str, operation: &str) -> Self {
        Self::Recognition {
            engine: engine.to_string(),
            reason: format!("operation not supported by this backend: {operation}"),
        }
    }

    /// Engine name this error is attributed to, when one is known.
    pub fn engine(&self) -> Option<&str> {
        match self {
            Self::NotFound { name, .. } => Some(name),
            Self::Initialization { engine, .. } | Self::Recognition { engine, .. } => Some(engine),
            Self::AudioProcessing(_) | Self::Configuration(_) => None,
        }
    }
}

/// Failures of the realtime message transport.
///
/// Internal to the streaming layer; the realtime engine maps these into
/// [`EngineError::Recognition`] before they reach a caller.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,
}
