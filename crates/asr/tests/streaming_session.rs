//! Streaming session state machine tests over a scripted transport.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use scriven_asr::asr::AsrEngine;
use scriven_asr::asr::realtime::{RealtimeConfig, RealtimeEngine};
use scriven_asr::error::EngineError;
use scriven_asr::streaming::{
    ClientEvent, ServerEvent, SessionState, StreamingSession, StreamingSessionConfig,
    TurnDetection,
};
use scriven_asr::transcript::AudioPayload;
use support::{ScriptedConnector, ScriptedTransport, TransportProbe};

fn session_config(turn_detection: TurnDetection) -> StreamingSessionConfig {
    StreamingSessionConfig {
        language: "en".to_string(),
        sample_rate: 16000,
        audio_format: "pcm".to_string(),
        turn_detection,
        chunk_interval: Duration::ZERO,
        negotiate_settle: Duration::from_millis(50),
        finalize_timeout: Duration::from_secs(1),
    }
}

fn audio_channel(chunks: Vec<Vec<u8>>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(chunks.len().max(1));
    for chunk in chunks {
        tx.try_send(chunk).unwrap();
    }
    rx
}

async fn run_session(
    config: StreamingSessionConfig,
    script: support::Script,
    close_after_script: bool,
    chunks: Vec<Vec<u8>>,
) -> (
    Result<String, EngineError>,
    SessionState,
    TransportProbe,
    Vec<scriven_asr::RecognitionResult>,
) {
    let (transport, probe) = ScriptedTransport::new(script, close_after_script);
    let connector = ScriptedConnector::new(transport);
    let (results_tx, mut results_rx) = mpsc::channel(64);

    let mut session = StreamingSession::new("mock_realtime", config);
    let result = session
        .run(&connector, audio_channel(chunks), &results_tx)
        .await;
    drop(results_tx);

    let mut results = Vec::new();
    while let Some(r) = results_rx.recv().await {
        results.push(r);
    }
    (result, session.state(), probe, results)
}

#[tokio::test]
async fn test_commit_flow_completes() {
    // 1 configure + 3 appends + 1 commit = 5 outbound events.
    let script = vec![
        (1, ServerEvent::SessionUpdated),
        (
            5,
            ServerEvent::TranscriptText {
                stash: "hello".to_string(),
            },
        ),
        (
            5,
            ServerEvent::TranscriptCompleted {
                transcript: "hello world".to_string(),
            },
        ),
    ];
    let chunks = vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]];

    let (result, state, probe, results) = run_session(
        session_config(TurnDetection::ClientCommit),
        script,
        false,
        chunks,
    )
    .await;

    assert_eq!(result.unwrap(), "hello world");
    assert_eq!(state, SessionState::Completed);
    assert_eq!(probe.closes(), 1);

    // Outbound order: configure, appends in chunk order, commit.
    let sent = probe.sent_events();
    assert_eq!(sent.len(), 5);
    assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));
    for (i, expected) in [[1u8; 4], [2u8; 4], [3u8; 4]].iter().enumerate() {
        match &sent[i + 1] {
            ClientEvent::AudioAppend { audio, .. } => {
                use base64::Engine as _;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(audio)
                    .unwrap();
                assert_eq!(decoded, expected);
            }
            other => panic!("expected AudioAppend, got {other:?}"),
        }
    }
    assert!(matches!(sent[4], ClientEvent::Commit { .. }));

    // One partial surfaced before the final.
    assert_eq!(results.len(), 2);
    assert!(!results[0].is_final);
    assert_eq!(results[0].text, "hello");
    assert!(results[1].is_final);
    assert_eq!(results[1].text, "hello world");
}

#[tokio::test]
async fn test_server_vad_appends_silence_run() {
    let turn = TurnDetection::ServerVad {
        threshold: 0.2,
        silence_duration_ms: 800,
        silence_chunks: 5,
        silence_chunk_bytes: 4,
    };
    // 1 configure + 2 appends + 5 silence appends = 8 outbound events.
    let script = vec![
        (1, ServerEvent::SessionUpdated),
        (
            8,
            ServerEvent::TranscriptCompleted {
                transcript: "done".to_string(),
            },
        ),
    ];
    let chunks = vec![vec![9u8; 4], vec![8u8; 4]];

    let (result, state, probe, _) =
        run_session(session_config(turn), script, false, chunks).await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(state, SessionState::Completed);

    let sent = probe.sent_events();
    assert_eq!(sent.len(), 8);
    assert!(
        sent.iter()
            .all(|e| !matches!(e, ClientEvent::Commit { .. })),
        "server-vad mode must not send a commit event"
    );
    // The trailing run is all zero-byte silence.
    for event in &sent[3..] {
        match event {
            ClientEvent::AudioAppend { audio, .. } => {
                use base64::Engine as _;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(audio)
                    .unwrap();
                assert_eq!(decoded, vec![0u8; 4]);
            }
            other => panic!("expected silence AudioAppend, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_finalize_timeout_fails_and_closes_once() {
    let mut config = session_config(TurnDetection::ClientCommit);
    config.finalize_timeout = Duration::from_millis(50);

    // The backend acks the session and then goes silent forever.
    let script = vec![(1, ServerEvent::SessionUpdated)];
    let (result, state, probe, _) =
        run_session(config, script, false, vec![vec![1u8; 4]]).await;

    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::Recognition { .. }));
    assert!(err.to_string().contains("no completion event"));
    assert_eq!(state, SessionState::Failed);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn test_backend_error_event_fails_session() {
    let script = vec![
        (1, ServerEvent::SessionUpdated),
        (
            2,
            ServerEvent::Error {
                message: "quota exceeded".to_string(),
            },
        ),
    ];
    let (result, state, probe, _) = run_session(
        session_config(TurnDetection::ClientCommit),
        script,
        false,
        vec![vec![1u8; 4]],
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(state, SessionState::Failed);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn test_connection_close_before_completion_fails() {
    // Script dries up after the ack and the transport reports closed.
    let script = vec![(1, ServerEvent::SessionUpdated)];
    let (result, state, probe, _) = run_session(
        session_config(TurnDetection::ClientCommit),
        script,
        true,
        vec![vec![1u8; 4]],
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("connection closed"));
    assert_eq!(state, SessionState::Failed);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn test_early_completion_during_streaming() {
    // Server-side turn detection may finish before every chunk is sent.
    let script = vec![
        (1, ServerEvent::SessionUpdated),
        (
            2,
            ServerEvent::TranscriptCompleted {
                transcript: "early".to_string(),
            },
        ),
    ];
    let chunks = vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]];

    let (result, state, probe, _) = run_session(
        session_config(TurnDetection::ClientCommit),
        script,
        false,
        chunks,
    )
    .await;

    assert_eq!(result.unwrap(), "early");
    assert_eq!(state, SessionState::Completed);
    let sent = probe.sent_events();
    // No commit was needed; the session stopped appending once complete.
    assert!(
        sent.iter()
            .all(|e| !matches!(e, ClientEvent::Commit { .. }))
    );
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn test_connect_failure_fails_session() {
    let connector = ScriptedConnector::failing();
    let (results_tx, _results_rx) = mpsc::channel(8);
    let mut session = StreamingSession::new(
        "mock_realtime",
        session_config(TurnDetection::ClientCommit),
    );
    let result = session
        .run(&connector, audio_channel(vec![]), &results_tx)
        .await;

    assert!(matches!(
        result.unwrap_err(),
        EngineError::Recognition { .. }
    ));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_realtime_engine_recognize_drives_session() {
    let config = RealtimeConfig {
        api_key: "test-key".to_string(),
        enable_vad: false,
        chunk_bytes: 4,
        chunk_interval_ms: 0,
        finalize_timeout_secs: 1,
        ..RealtimeConfig::default()
    };

    // 8-byte payload with 4-byte chunks: configure + 2 appends + commit.
    let script = vec![
        (1, ServerEvent::SessionUpdated),
        (
            4,
            ServerEvent::TranscriptCompleted {
                transcript: "two chunks".to_string(),
            },
        ),
    ];
    let (transport, probe) = ScriptedTransport::new(script, false);
    let connector = Arc::new(ScriptedConnector::new(transport));
    let engine = RealtimeEngine::with_connector(config, connector);

    let payload = AudioPayload::pcm16(vec![0u8; 8], 16000);
    let expected_duration = payload.duration_secs();
    let transcript = engine.recognize(payload, Some("en")).await.unwrap();

    assert_eq!(transcript.text, "two chunks");
    assert_eq!(transcript.engine, "remote_realtime");
    assert_eq!(transcript.segments.len(), 1);
    assert!((transcript.duration() - expected_duration).abs() < 1e-9);
    assert_eq!(probe.sent_events().len(), 4);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test]
async fn test_realtime_engine_requires_api_key() {
    let config = RealtimeConfig::default();
    let engine = RealtimeEngine::new(config);
    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::Initialization { .. }));
}
