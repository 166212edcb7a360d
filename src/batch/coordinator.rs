use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::batch::client::BatchApiClient;
use crate::error::GatewayError;
use crate::models::batch::{BatchInputLine, BatchOutputLine};
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};

/// Outcome delivered to every waiter of a job. A failed batch fans the
/// same error text out to all of its jobs.
pub type BatchResult = Result<ChatCompletionResponse, String>;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Idle window before an accruing batch dispatches; reset per enqueue
    pub accrual_window: Duration,
    /// Dispatch immediately once this many jobs are pending
    pub max_batch_size: usize,
    /// First monitor poll delay; doubles per poll
    pub initial_poll_interval: Duration,
    /// Poll backoff ceiling
    pub max_poll_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            accrual_window: Duration::from_secs(10),
            max_batch_size: 50_000,
            initial_poll_interval: Duration::from_secs(10),
            max_poll_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct PendingJob {
    request: ChatCompletionRequest,
    waiters: Vec<oneshot::Sender<BatchResult>>,
}

enum WorkerSignal {
    Enqueued,
    Flush,
}

/// Coalesces deferred requests into upstream batch jobs.
///
/// Jobs dedup by the SHA-256 of their canonical JSON encoding; identical
/// concurrent requests share one job and receive the same outcome. A single
/// worker drives the accrue/dispatch cycle; each dispatched batch gets its
/// own monitor task. Closing the signal channel makes the worker drain and
/// dispatch whatever is still pending before it exits.
pub struct BatchCoordinator {
    pending: Arc<Mutex<IndexMap<String, PendingJob>>>,
    signal: Mutex<Option<mpsc::Sender<WorkerSignal>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(client: Arc<BatchApiClient>, config: BatchConfig) -> Self {
        let pending = Arc::new(Mutex::new(IndexMap::new()));
        let (tx, rx) = mpsc::channel(64);

        let worker = tokio::spawn(worker_loop(
            rx,
            Arc::clone(&pending),
            client,
            config.clone(),
        ));

        Self {
            pending,
            signal: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            config,
        }
    }

    /// Queue a request, deduplicating against pending identical requests.
    /// The returned receiver resolves when the batch completes; dropping it
    /// withdraws the waiter.
    pub async fn enqueue(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<oneshot::Receiver<BatchResult>, GatewayError> {
        let id = job_id(&request)?;
        let (tx, rx) = oneshot::channel();

        let pending_count = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(&id) {
                Some(job) => job.waiters.push(tx),
                None => {
                    pending.insert(
                        id.clone(),
                        PendingJob {
                            request,
                            waiters: vec![tx],
                        },
                    );
                }
            }
            pending.len()
        };

        let signal = self.signal.lock().await;
        let sender = signal.as_ref().ok_or(GatewayError::Cancelled)?;
        let message = if pending_count >= self.config.max_batch_size {
            WorkerSignal::Flush
        } else {
            WorkerSignal::Enqueued
        };
        sender.send(message).await.map_err(|_| GatewayError::Cancelled)?;

        Ok(rx)
    }

    /// Close the enqueue channel; the worker dispatches the remaining
    /// pending jobs and exits.
    pub async fn shutdown(&self) {
        self.signal.lock().await.take();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Batch worker did not shut down cleanly");
            }
        }
    }
}

/// Job identity: SHA-256 over the canonical JSON encoding of the request
pub fn job_id(request: &ChatCompletionRequest) -> Result<String, GatewayError> {
    let canonical = serde_json::to_vec(request)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

async fn worker_loop(
    mut rx: mpsc::Receiver<WorkerSignal>,
    pending: Arc<Mutex<IndexMap<String, PendingJob>>>,
    client: Arc<BatchApiClient>,
    config: BatchConfig,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let signal = if let Some(at) = deadline {
            tokio::select! {
                signal = rx.recv() => signal,
                _ = tokio::time::sleep_until(at) => {
                    deadline = None;
                    dispatch(&pending, &client, &config).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match signal {
            Some(WorkerSignal::Enqueued) => {
                deadline = Some(Instant::now() + config.accrual_window);
            }
            Some(WorkerSignal::Flush) => {
                deadline = None;
                dispatch(&pending, &client, &config).await;
            }
            None => {
                // Shutdown: drain whatever accrued
                dispatch(&pending, &client, &config).await;
                break;
            }
        }
    }
}

async fn dispatch(
    pending: &Arc<Mutex<IndexMap<String, PendingJob>>>,
    client: &Arc<BatchApiClient>,
    config: &BatchConfig,
) {
    let jobs: IndexMap<String, PendingJob> = {
        let mut pending = pending.lock().await;
        std::mem::take(&mut *pending)
    };
    if jobs.is_empty() {
        return;
    }

    crate::metrics::record_batch_dispatch(jobs.len());
    tracing::info!(jobs = jobs.len(), "Dispatching deferred batch");

    let mut jsonl = Vec::new();
    for (id, job) in &jobs {
        let line = BatchInputLine::new(id.clone(), job.request.clone());
        match serde_json::to_vec(&line) {
            Ok(bytes) => {
                jsonl.extend_from_slice(&bytes);
                jsonl.push(b'\n');
            }
            Err(e) => {
                tracing::error!(job = %id, error = %e, "Failed to encode batch line");
            }
        }
    }

    let batch = async {
        let file = client.upload_batch_file(jsonl).await?;
        client.create_batch(&file.id).await
    }
    .await;

    match batch {
        Ok(batch) => {
            tracing::info!(batch_id = %batch.id, "Created upstream batch");
            let client = Arc::clone(client);
            let config = config.clone();
            tokio::spawn(monitor_batch(client, batch.id, jobs, config));
        }
        Err(e) => {
            fail_all(jobs, &format!("batch dispatch failed: {}", e));
        }
    }
}

async fn monitor_batch(
    client: Arc<BatchApiClient>,
    batch_id: String,
    jobs: IndexMap<String, PendingJob>,
    config: BatchConfig,
) {
    let mut interval = config.initial_poll_interval;

    loop {
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(config.max_poll_interval);

        let batch = match client.get_batch(&batch_id).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Batch status poll failed");
                continue;
            }
        };

        if !batch.is_terminal() {
            tracing::debug!(batch_id = %batch_id, status = %batch.status, "Batch still running");
            continue;
        }

        if batch.status == "completed" {
            let output_file_id = match batch.output_file_id {
                Some(id) => id,
                None => {
                    fail_all(jobs, "batch completed without an output file");
                    return;
                }
            };
            match client.download_file(&output_file_id).await {
                Ok(content) => deliver_output(jobs, &content),
                Err(e) => fail_all(jobs, &format!("batch output download failed: {}", e)),
            }
        } else {
            fail_all(jobs, &format!("batch {} ended as {}", batch_id, batch.status));
        }
        return;
    }
}

/// Hand each output line to its job's waiters, matched by custom_id.
/// Upstream documents positional order, but custom_id matching holds even
/// if that contract is violated.
fn deliver_output(mut jobs: IndexMap<String, PendingJob>, content: &str) {
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let parsed: BatchOutputLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(error = %e, "Unparseable batch output line");
                continue;
            }
        };

        let job = match jobs.shift_remove(&parsed.custom_id) {
            Some(job) => job,
            None => {
                tracing::warn!(custom_id = %parsed.custom_id, "Output line for unknown job");
                continue;
            }
        };

        let result = match (parsed.response, parsed.error) {
            (Some(response), _) if response.status_code < 400 => Ok(response.body),
            (Some(response), _) => Err(format!(
                "batch line failed with status {}",
                response.status_code
            )),
            (None, Some(error)) => Err(format!("batch line failed: {}", error.message)),
            (None, None) => Err("batch line carried neither response nor error".to_string()),
        };

        for waiter in job.waiters {
            let _ = waiter.send(result.clone());
        }
    }

    if !jobs.is_empty() {
        tracing::warn!(missing = jobs.len(), "Batch output omitted some jobs");
        fail_all(jobs, "batch output did not include a response for this job");
    }
}

fn fail_all(jobs: IndexMap<String, PendingJob>, message: &str) {
    tracing::error!(jobs = jobs.len(), message = message, "Failing batch jobs");
    for (_, job) in jobs {
        for waiter in job.waiters {
            let _ = waiter.send(Err(message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::ChatMessage;

    fn request(text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user(text)],
            ..Default::default()
        }
    }

    #[test]
    fn test_job_id_is_stable_and_hex() {
        let a = job_id(&request("ping")).unwrap();
        let b = job_id(&request("ping")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_id_differs_for_different_requests() {
        let a = job_id(&request("ping")).unwrap();
        let b = job_id(&request("pong")).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_enqueue_dedups_identical_requests() {
        let client = Arc::new(BatchApiClient::new(
            "http://127.0.0.1:0".to_string(),
            "sk-test".to_string(),
            Duration::from_secs(5),
        ));
        let coordinator = BatchCoordinator::new(
            client,
            BatchConfig {
                accrual_window: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let _rx1 = coordinator.enqueue(request("ping")).await.unwrap();
        let _rx2 = coordinator.enqueue(request("ping")).await.unwrap();
        let _rx3 = coordinator.enqueue(request("pong")).await.unwrap();

        let pending = coordinator.pending.lock().await;
        assert_eq!(pending.len(), 2);
        let first = pending.values().next().unwrap();
        assert_eq!(first.waiters.len(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let client = Arc::new(BatchApiClient::new(
            "http://127.0.0.1:0".to_string(),
            "sk-test".to_string(),
            Duration::from_secs(5),
        ));
        let coordinator = BatchCoordinator::new(client, BatchConfig::default());

        coordinator.shutdown().await;

        let result = coordinator.enqueue(request("ping")).await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[test]
    fn test_deliver_output_matches_by_custom_id() {
        let mut jobs = IndexMap::new();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        jobs.insert(
            "job-a".to_string(),
            PendingJob {
                request: request("a"),
                waiters: vec![tx_a],
            },
        );
        jobs.insert(
            "job-b".to_string(),
            PendingJob {
                request: request("b"),
                waiters: vec![tx_b],
            },
        );

        // Output arrives in reverse order; custom_id matching still routes it
        let content = concat!(
            r#"{"custom_id":"job-b","response":{"status_code":200,"body":{"id":"chatcmpl-b","object":"chat.completion","created":1,"model":"gpt-4o","choices":[{"index":0,"message":{"role":"assistant","content":"B"},"finish_reason":"stop"}]}}}"#,
            "\n",
            r#"{"custom_id":"job-a","response":{"status_code":200,"body":{"id":"chatcmpl-a","object":"chat.completion","created":1,"model":"gpt-4o","choices":[{"index":0,"message":{"role":"assistant","content":"A"},"finish_reason":"stop"}]}}}"#,
        );

        deliver_output(jobs, content);

        let a = rx_a.try_recv().unwrap().unwrap();
        let b = rx_b.try_recv().unwrap().unwrap();
        assert_eq!(a.id, "chatcmpl-a");
        assert_eq!(b.id, "chatcmpl-b");
    }

    #[test]
    fn test_deliver_output_fails_missing_jobs() {
        let mut jobs = IndexMap::new();
        let (tx, mut rx) = oneshot::channel();
        jobs.insert(
            "job-a".to_string(),
            PendingJob {
                request: request("a"),
                waiters: vec![tx],
            },
        );

        deliver_output(jobs, "");

        let result = rx.try_recv().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_failed_line_shares_error_with_all_waiters() {
        let mut jobs = IndexMap::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        jobs.insert(
            "job-a".to_string(),
            PendingJob {
                request: request("a"),
                waiters: vec![tx1, tx2],
            },
        );

        let content =
            r#"{"custom_id":"job-a","error":{"code":"server_error","message":"boom"}}"#;
        deliver_output(jobs, content);

        let e1 = rx1.try_recv().unwrap().unwrap_err();
        let e2 = rx2.try_recv().unwrap().unwrap_err();
        assert_eq!(e1, e2);
        assert!(e1.contains("boom"));
    }
}
