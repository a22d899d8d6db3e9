//! Shared fixtures: a scriptable mock engine and a scripted realtime
//! transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use scriven_asr::asr::{AsrEngine, RecognitionResult};
use scriven_asr::error::{EngineError, TransportError};
use scriven_asr::streaming::{ClientEvent, RealtimeConnector, RealtimeTransport, ServerEvent};
use scriven_asr::transcript::{AudioPayload, Segment, Transcript};

/// Opt-in log output for debugging test runs (RUST_LOG=debug).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tracks how many mock recognitions run at once.
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Configurable in-memory engine.
pub struct MockEngine {
    name: String,
    fail_init: bool,
    fail_cleanup: bool,
    /// Recognition fails on zero-length payloads.
    fail_on_empty: bool,
    /// Fails this many upcoming recognize calls.
    fail_next: AtomicU32,
    init_delay: Duration,
    recognize_delay: Duration,
    pub init_calls: AtomicU32,
    pub recognize_calls: AtomicU32,
    pub cleanup_calls: AtomicU32,
    pub gauge: ConcurrencyGauge,
}

impl MockEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_init: false,
            fail_cleanup: false,
            fail_on_empty: false,
            fail_next: AtomicU32::new(0),
            init_delay: Duration::ZERO,
            recognize_delay: Duration::ZERO,
            init_calls: AtomicU32::new(0),
            recognize_calls: AtomicU32::new(0),
            cleanup_calls: AtomicU32::new(0),
            gauge: ConcurrencyGauge::default(),
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn failing_on_empty(mut self) -> Self {
        self.fail_on_empty = true;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_recognize_delay(mut self, delay: Duration) -> Self {
        self.recognize_delay = delay;
        self
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl AsrEngine for MockEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if self.fail_init {
            return Err(EngineError::initialization(&self.name, "credentials missing"));
        }
        Ok(())
    }

    async fn recognize(
        &self,
        audio: AudioPayload,
        language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        if !self.recognize_delay.is_zero() {
            tokio::time::sleep(self.recognize_delay).await;
        }
        let outcome = if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            Err(EngineError::recognition(&self.name, "transient backend failure"))
        } else if self.fail_on_empty && audio.data.is_empty() {
            Err(EngineError::recognition(&self.name, "empty payload"))
        } else {
            let duration = audio.duration_secs();
            let text = format!("hello from {}", self.name);
            Ok(Transcript::new(
                text.clone(),
                language.unwrap_or("en"),
                vec![Segment::new(0.0, duration, text, Some(0.9))],
                &self.name,
            ))
        };
        self.gauge.exit();
        outcome
    }

    async fn recognize_stream(
        &self,
        _audio_rx: mpsc::Receiver<Vec<u8>>,
        _language: Option<&str>,
    ) -> Result<mpsc::Receiver<RecognitionResult>, EngineError> {
        Err(EngineError::unsupported(&self.name, "chunked streaming"))
    }

    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string(), "de".to_string()]
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(EngineError::recognition(&self.name, "cleanup failed"));
        }
        Ok(())
    }
}

/// Inbound events gated on outbound progress: each event is delivered only
/// once at least `after_sent` client events have gone out.
pub type Script = Vec<(usize, ServerEvent)>;

/// Observation handles for a scripted session.
#[derive(Clone)]
pub struct TransportProbe {
    pub sent: Arc<Mutex<Vec<ClientEvent>>>,
    pub close_count: Arc<AtomicUsize>,
}

impl TransportProbe {
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

/// Scripted in-memory realtime transport.
pub struct ScriptedTransport {
    script: VecDeque<(usize, ServerEvent)>,
    sent: Arc<Mutex<Vec<ClientEvent>>>,
    close_count: Arc<AtomicUsize>,
    /// When true the connection reports closed once the script runs dry;
    /// otherwise `recv` hangs (a silent backend).
    close_after_script: bool,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new(script: Script, close_after_script: bool) -> (Self, TransportProbe) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let close_count = Arc::new(AtomicUsize::new(0));
        let probe = TransportProbe {
            sent: Arc::clone(&sent),
            close_count: Arc::clone(&close_count),
        };
        (
            Self {
                script: script.into(),
                sent,
                close_count,
                close_after_script,
                closed: false,
            },
            probe,
        )
    }

    fn ready(&self) -> bool {
        let sent_count = self.sent.lock().unwrap().len();
        self.script
            .front()
            .is_some_and(|(after, _)| *after <= sent_count)
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            if self.ready() {
                return self.script.pop_front().map(|(_, event)| event);
            }
            if self.script.is_empty() {
                if self.close_after_script {
                    return None;
                }
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        if self.ready() {
            self.script.pop_front().map(|(_, event)| event)
        } else {
            None
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        // An abandoned transport still counts as closed exactly once.
        if !self.closed {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector handing out one pre-scripted transport.
pub struct ScriptedConnector {
    transport: Mutex<Option<ScriptedTransport>>,
    fail_connect: bool,
}

impl ScriptedConnector {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            fail_connect: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            transport: Mutex::new(None),
            fail_connect: true,
        }
    }
}

#[async_trait]
impl RealtimeConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimeTransport>, TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        self.transport
            .lock()
            .unwrap()
            .take()
            .map(|t| Box::new(t) as Box<dyn RealtimeTransport>)
            .ok_or_else(|| TransportError::Connect("transport already taken".to_string()))
    }
}
