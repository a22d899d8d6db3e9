use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Retry policy for a fallible asynchronous operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Enable retries. When false, the first failure propagates immediately.
    pub enabled: bool,
    /// Maximum number of attempts (>= 1).
    pub max_retries: u32,
    /// Fixed delay between attempts in seconds.
    pub retry_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_delay_secs: 1.0,
        }
    }
}

/// Circuit-breaker policy applied per engine name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown in seconds before an open circuit auto-recovers.
    pub timeout_secs: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60.0,
        }
    }
}

/// Top-level configuration for the transcription service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Engine used when the caller does not name one.
    pub default_engine: String,
    /// Priority-ordered engine names for fallback recognition.
    pub priority_engines: Vec<String>,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-engine settings, keyed by engine name. Each value is handed to
    /// the engine constructor as-is.
    pub engines: HashMap<String, serde_json::Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_engine: "remote_realtime".to_string(),
            priority_engines: Vec::new(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            engines: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Settings mapping for one engine, `null` if none were supplied.
    pub fn engine_config(&self, name: &str) -> serde_json::Value {
        self.engines
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}
