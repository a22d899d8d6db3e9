//! Speech-recognition engine orchestration.
//!
//! Pluggable backends (a local model, remote streaming and async-task
//! services) behind one [`AsrEngine`] trait, with a registry managing
//! instance lifecycles, retry/circuit-breaker/fallback failure policies,
//! a bounded-concurrency batch scheduler and a realtime streaming session
//! state machine.

pub mod asr;
pub mod batch;
pub mod config;
pub mod error;
pub mod registry;
pub mod resilience;
pub mod service;
pub mod streaming;
pub mod transcript;

pub use asr::{AsrEngine, RecognitionResult};
pub use batch::{BatchItem, BatchOutcome};
pub use config::{CircuitBreakerConfig, RetryConfig, ServiceConfig};
pub use error::EngineError;
pub use registry::EngineRegistry;
pub use resilience::{CircuitBreaker, EngineFallback, RetryStrategy};
pub use service::TranscriptionService;
pub use streaming::{SessionState, StreamingSession, StreamingSessionConfig, TurnDetection};
pub use transcript::{AudioEncoding, AudioPayload, Segment, Transcript};
