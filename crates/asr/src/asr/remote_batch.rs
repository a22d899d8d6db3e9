//! Remote async-task ASR backend (submit a job, poll for the result).
//!
//! The service transcribes pre-recorded files referenced by publicly
//! accessible URLs; raw audio buffers and chunk streams are not accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AsrEngine, RecognitionResult};
use crate::error::EngineError;
use crate::transcript::{AudioPayload, Segment, Transcript};

pub const ENGINE_NAME: &str = "remote_batch";

const SUPPORTED_LANGUAGES: [&str; 9] = ["zh", "en", "ja", "ko", "yue", "de", "fr", "es", "ru"];

/// Async-task engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBatchConfig {
    pub enabled: bool,
    pub name: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    /// Language hints passed with each task.
    pub language_hints: Vec<String>,
    /// Seconds between task-status checks.
    pub poll_interval_secs: u64,
    /// Maximum seconds to wait for a task before giving up.
    pub max_wait_secs: u64,
}

impl Default for RemoteBatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: ENGINE_NAME.to_string(),
            model: "fun-asr".to_string(),
            api_key: String::new(),
            base_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            language_hints: vec!["zh".to_string(), "en".to_string()],
            poll_interval_secs: 2,
            max_wait_secs: 300,
        }
    }
}

/// File-URL based remote recognition engine.
pub struct RemoteBatchEngine {
    config: RemoteBatchConfig,
    client: reqwest::Client,
    initialized: AtomicBool,
}

impl RemoteBatchEngine {
    pub fn new(config: RemoteBatchConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::initialization(ENGINE_NAME, e))?;
        Ok(Self {
            config,
            client,
            initialized: AtomicBool::new(false),
        })
    }

    /// Recognizes audio from a publicly accessible URL.
    pub async fn recognize_from_url(
        &self,
        file_url: &str,
        language_hints: Option<&[String]>,
    ) -> Result<Transcript, EngineError> {
        if !self.initialized.load(Ordering::Acquire) {
            self.initialize().await?;
        }

        let hints = language_hints.unwrap_or(&self.config.language_hints);
        info!(%file_url, "Submitting transcription task");

        let task_id = self.submit_task(file_url, hints).await?;
        debug!(%task_id, "Task submitted");

        let output = self.wait_for_task(&task_id).await?;
        let result_data = self.fetch_result(&output).await?;

        let text = extract_text(&result_data);
        let language = result_data["language"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        let segments = build_segments(&result_data);

        info!(chars = text.len(), "Transcription task completed");
        Ok(Transcript::new(text, language, segments, ENGINE_NAME))
    }

    async fn submit_task(&self, file_url: &str, hints: &[String]) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": { "file_urls": [file_url] },
            "parameters": { "language_hints": hints },
        });

        let response = self
            .client
            .post(format!(
                "{}/services/audio/asr/transcription",
                self.config.base_url
            ))
            .bearer_auth(&self.config.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("task submit failed: {e}")))?;

        let status = response.status();
        let value: serde_json::Value = response.json().await.map_err(|e| {
            EngineError::recognition(ENGINE_NAME, format!("malformed submit response: {e}"))
        })?;

        if !status.is_success() {
            let message = value["message"].as_str().unwrap_or("unknown error");
            return Err(EngineError::recognition(
                ENGINE_NAME,
                format!("task submit rejected ({status}): {message}"),
            ));
        }

        value["output"]["task_id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::recognition(ENGINE_NAME, "submit response carried no task_id")
            })
    }

    async fn wait_for_task(&self, task_id: &str) -> Result<serde_json::Value, EngineError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        loop {
            let response = self
                .client
                .get(format!("{}/tasks/{}", self.config.base_url, task_id))
                .bearer_auth(&self.config.api_key)
                .send()
                .await
                .map_err(|e| {
                    EngineError::recognition(ENGINE_NAME, format!("task poll failed: {e}"))
                })?;
            let value: serde_json::Value = response.json().await.map_err(|e| {
                EngineError::recognition(ENGINE_NAME, format!("malformed poll response: {e}"))
            })?;

            match value["output"]["task_status"].as_str() {
                Some("SUCCEEDED") => return Ok(value["output"].clone()),
                Some("FAILED") => {
                    let message = value["output"]["message"].as_str().unwrap_or("unknown");
                    return Err(EngineError::recognition(
                        ENGINE_NAME,
                        format!("task {task_id} failed: {message}"),
                    ));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(EngineError::recognition(
                    ENGINE_NAME,
                    format!("task timeout after {}s", self.config.max_wait_secs),
                ));
            }
            debug!(%task_id, "Waiting for transcription task");
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }

    /// Follows the per-file result URL from a finished task.
    async fn fetch_result(
        &self,
        output: &serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let results = output["results"].as_array().cloned().unwrap_or_default();
        for result in &results {
            if result["subtask_status"].as_str() != Some("SUCCEEDED") {
                warn!(?result, "Transcription subtask failed");
            }
        }
        let url = results
            .iter()
            .find(|r| r["subtask_status"].as_str() == Some("SUCCEEDED"))
            .and_then(|r| r["transcription_url"].as_str())
            .ok_or_else(|| {
                EngineError::recognition(ENGINE_NAME, "no successful transcriptions received")
            })?;

        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("result fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::recognition(ENGINE_NAME, format!("malformed result: {e}")))
    }
}

fn extract_text(result_data: &serde_json::Value) -> String {
    if let Some(text) = result_data["transcript"].as_str() {
        return text.to_string();
    }
    if let Some(text) = result_data["text"].as_str() {
        return text.to_string();
    }
    if let Some(sentences) = result_data["sentences"].as_array() {
        return sentences
            .iter()
            .filter_map(|s| s["text"].as_str())
            .collect::<Vec<_>>()
            .join(" ");
    }
    String::new()
}

fn build_segments(result_data: &serde_json::Value) -> Vec<Segment> {
    if let Some(sentences) = result_data["sentences"].as_array() {
        return sentences
            .iter()
            .map(|s| {
                Segment::new(
                    s["begin_time"].as_f64().unwrap_or(0.0),
                    s["end_time"].as_f64().unwrap_or(0.0),
                    s["text"].as_str().unwrap_or(""),
                    s["confidence"].as_f64(),
                )
            })
            .collect();
    }
    let duration = result_data["duration"].as_f64().unwrap_or(0.0);
    vec![Segment::new(0.0, duration, extract_text(result_data), None)]
}

#[async_trait]
impl AsrEngine for RemoteBatchEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.config.api_key.is_empty() {
            return Err(EngineError::initialization(
                ENGINE_NAME,
                "API key is not configured",
            ));
        }
        self.initialized.store(true, Ordering::Release);
        info!(model = %self.config.model, base_url = %self.config.base_url, "Async-task engine initialized");
        Ok(())
    }

    async fn recognize(
        &self,
        _audio: AudioPayload,
        _language: Option<&str>,
    ) -> Result<Transcript, EngineError> {
        // The service only accepts file URLs; see `recognize_from_url`.
        Err(EngineError::unsupported(
            ENGINE_NAME,
            "raw audio buffers (use recognize_from_url with a publicly accessible URL)",
        ))
    }

    async fn recognize_stream(
        &self,
        _audio_rx: mpsc::Receiver<Vec<u8>>,
        _language: Option<&str>,
    ) -> Result<mpsc::Receiver<RecognitionResult>, EngineError> {
        Err(EngineError::unsupported(ENGINE_NAME, "chunked streaming"))
    }

    fn supported_languages(&self) -> Vec<String> {
        SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect()
    }

    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}
