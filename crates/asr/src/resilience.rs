//! Retry, circuit-breaker and fallback policies for engine calls.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{error, warn};

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::EngineError;

/// Wraps a fallible asynchronous operation with bounded retries and a
/// fixed inter-attempt delay.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    enabled: bool,
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryStrategy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs_f64(config.retry_delay_secs.max(0.0)),
        }
    }

    /// Runs `operation` up to `max_retries` times.
    ///
    /// Disabled retries propagate the first failure immediately. The last
    /// failure is returned unchanged so callers can branch on its kind.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !self.enabled {
                        return Err(e);
                    }
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Execution failed"
                    );
                    if attempt >= self.max_retries {
                        error!(error = %e, "All retries failed");
                        return Err(e);
                    }
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }
}

/// Per-engine failure counter that trips after a threshold and suppresses
/// use until a cooldown elapses.
///
/// Advisory: callers check [`CircuitBreaker::is_open`] before dispatch and
/// record outcomes afterwards; the breaker itself never raises.
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    failures: DashMap<String, u32>,
    last_failure: DashMap<String, Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            timeout: Duration::from_secs_f64(config.timeout_secs.max(0.0)),
            failures: DashMap::new(),
            last_failure: DashMap::new(),
        }
    }

    pub fn record_failure(&self, engine: &str) {
        *self.failures.entry(engine.to_string()).or_insert(0) += 1;
        self.last_failure.insert(engine.to_string(), Instant::now());
    }

    pub fn record_success(&self, engine: &str) {
        self.failures.insert(engine.to_string(), 0);
    }

    /// True iff the engine should not be used right now.
    ///
    /// Once the cooldown has elapsed the failure count resets to zero and
    /// the circuit closes again (auto-recovery, no separate probe state).
    pub fn is_open(&self, engine: &str) -> bool {
        let count = self.failures.get(engine).map(|e| *e.value()).unwrap_or(0);
        if count < self.failure_threshold {
            return false;
        }

        let last = self.last_failure.get(engine).map(|e| *e.value());
        match last {
            Some(last) if last.elapsed() < self.timeout => true,
            _ => {
                self.failures.insert(engine.to_string(), 0);
                false
            }
        }
    }
}

/// Priority-ordered engine fallback cursor.
///
/// Pure bookkeeping: it never invokes engines itself.
#[derive(Debug, Clone)]
pub struct EngineFallback {
    priority_engines: Vec<String>,
    current_index: usize,
}

impl EngineFallback {
    pub fn new(priority_engines: Vec<String>) -> Self {
        Self {
            priority_engines,
            current_index: 0,
        }
    }

    /// The candidate the cursor currently points at.
    pub fn current_engine(&self) -> Option<&str> {
        self.priority_engines
            .get(self.current_index)
            .map(|s| s.as_str())
    }

    /// Advances to the next backup engine, or `None` once exhausted.
    pub fn next_engine(&mut self) -> Option<&str> {
        self.current_index += 1;
        self.priority_engines
            .get(self.current_index)
            .map(|s| s.as_str())
    }

    /// Returns the cursor to the primary engine.
    pub fn reset(&mut self) {
        self.current_index = 0;
    }
}
