//! Bounded-concurrency batch recognition.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::error::EngineError;
use crate::transcript::{AudioPayload, Transcript};

/// One input of a batch run.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Caller-chosen label (file path, utterance id, ...) used to pair
    /// failures with inputs.
    pub label: String,
    pub audio: AudioPayload,
    pub language: Option<String>,
}

impl BatchItem {
    pub fn new(label: impl Into<String>, audio: AudioPayload, language: Option<String>) -> Self {
        Self {
            label: label.into(),
            audio,
            language,
        }
    }
}

/// Per-item results of a batch run. The batch itself never fails; callers
/// decide whether partial success is acceptable.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Successful transcripts, in input order, each carrying its source
    /// label under the `source` metadata key.
    pub transcripts: Vec<Transcript>,
    /// Failed items, in input order, paired with their errors.
    pub failures: Vec<(String, EngineError)>,
}

/// Runs `task` over every item with at most `max_concurrency` executing
/// concurrently.
///
/// All item futures start eagerly and block on a counting limiter; one
/// item's failure never cancels its siblings. Dropping the returned future
/// cancels every in-flight item.
pub async fn run_batch<F, Fut>(items: Vec<BatchItem>, max_concurrency: usize, task: F) -> BatchOutcome
where
    F: Fn(BatchItem) -> Fut,
    Fut: Future<Output = Result<Transcript, EngineError>>,
{
    let limiter = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let total = items.len();

    let item_futures: Vec<_> = items
        .into_iter()
        .map(|item| {
            let limiter = Arc::clone(&limiter);
            let label = item.label.clone();
            let fut = task(item);
            async move {
                // The semaphore is never closed; a failed acquire would
                // only mean running unthrottled.
                let _permit = limiter.acquire().await.ok();
                (label, fut.await)
            }
        })
        .collect();

    let results = join_all(item_futures).await;

    let mut transcripts = Vec::new();
    let mut failures = Vec::new();
    for (label, result) in results {
        match result {
            Ok(transcript) => transcripts.push(
                transcript.with_metadata("source", serde_json::Value::String(label)),
            ),
            Err(e) => {
                error!(item = %label, error = %e, "Batch item failed");
                failures.push((label, e));
            }
        }
    }

    info!(
        total,
        successes = transcripts.len(),
        failures = failures.len(),
        "Batch processing completed"
    );

    BatchOutcome {
        transcripts,
        failures,
    }
}
