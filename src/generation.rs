//! Generation pipeline: one remote call per lead with batching, bounded
//! concurrency, fixed-delay retries, and resumable result accumulation.
//!
//! Batches run strictly sequentially in input order with a configurable
//! pause between them. Within a batch all items run concurrently, capped by
//! a semaphore. Item failures are captured as [`OutcomeRecord`]s and never
//! abort sibling items, the batch, or the run.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{MailrunError, Result};
use crate::http::{ApiRequest, HttpClient};
use crate::lead::Lead;
use crate::outcome::{AttemptRecord, AttemptStatus, OutcomeRecord, ResultSet};
use crate::plan::BatchPlan;
use crate::progress::{NullSink, ProgressEvent, ProgressSink};

/// Identifier for one pipeline run, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        RunId(uuid)
    }
}

/// Drives lead payloads through the remote generator.
///
/// The result set is threaded through each invocation and returned to the
/// caller; the pipeline holds no cross-run state.
pub struct GenerationPipeline<H: HttpClient> {
    http_client: Arc<H>,
    config: PipelineConfig,
    progress: Arc<dyn ProgressSink>,
    cancel_token: CancellationToken,
}

impl<H: HttpClient + std::fmt::Debug> std::fmt::Debug for GenerationPipeline<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("http_client", &self.http_client)
            .field("config", &self.config)
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl<H: HttpClient + 'static> GenerationPipeline<H> {
    /// Create a pipeline, rejecting malformed configuration before any
    /// network call can be made.
    pub fn new(http_client: Arc<H>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http_client,
            config,
            progress: Arc::new(NullSink),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Deliver progress events to the given sink instead of discarding them.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Use an externally controlled cancellation token (e.g. a UI "stop"
    /// signal or process shutdown).
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Token that cancels this pipeline: no new batches start, in-flight
    /// attempts are abandoned, completed outcomes are still returned.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Run over the given leads, accumulating into an empty result set.
    pub async fn run(&self, leads: &[Lead]) -> ResultSet {
        self.execute(leads, ResultSet::new()).await
    }

    /// Resume a prior run: outcomes produced by this run overwrite prior
    /// entries by lead identifier; untouched prior entries are preserved.
    pub async fn resume(&self, leads: &[Lead], prior: ResultSet) -> ResultSet {
        self.execute(leads, prior).await
    }

    async fn execute(&self, leads: &[Lead], seed: ResultSet) -> ResultSet {
        let run_id = RunId::from(Uuid::new_v4());
        let mut results = seed;

        if leads.is_empty() {
            tracing::info!(run_id = %run_id, "No leads submitted, nothing to do");
            return results;
        }

        let plan = BatchPlan::new(leads.len(), self.config.batch_size);
        let batch_count = plan.batch_count();
        let total = leads.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        let mut completed = 0usize;
        let mut successes = 0usize;
        let mut failures = 0usize;

        tracing::info!(
            run_id = %run_id,
            total,
            batch_count,
            batch_size = self.config.batch_size,
            max_concurrent = self.config.max_concurrent,
            max_retries = self.config.max_retries,
            "Starting generation run"
        );

        for (batch_index, range) in plan.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                tracing::info!(
                    run_id = %run_id,
                    batch_index,
                    "Cancellation requested, not starting further batches"
                );
                break;
            }

            let batch = &leads[range];
            self.progress.report(ProgressEvent::BatchStarted {
                batch_index,
                batch_count,
                batch_size: batch.len(),
            });
            tracing::debug!(run_id = %run_id, batch_index, batch_len = batch.len(), "Starting batch");

            let mut join_set: JoinSet<Option<OutcomeRecord>> = JoinSet::new();
            for lead in batch {
                let lead = lead.clone();
                let http_client = self.http_client.clone();
                let config = self.config.clone();
                let progress = self.progress.clone();
                let cancel_token = self.cancel_token.clone();
                let semaphore = semaphore.clone();

                join_set.spawn(async move {
                    // The semaphore is never closed, so this only fails if
                    // the runtime is torn down beneath us.
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return None;
                    };
                    process_lead(lead, http_client, &config, progress, cancel_token).await
                });
            }

            // Every item in the batch is awaited before the batch is done;
            // completion order is unconstrained.
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Some(outcome)) => {
                        completed += 1;
                        match outcome.status {
                            AttemptStatus::Success => successes += 1,
                            AttemptStatus::Failed => failures += 1,
                        }
                        self.progress.report(ProgressEvent::ItemCompleted {
                            lead_id: outcome.lead_id().clone(),
                            status: outcome.status,
                            completed,
                            total,
                            successes,
                            failures,
                        });
                        results.insert(outcome);
                    }
                    Ok(None) => {
                        // Attempt abandoned on cancellation: no record, the
                        // item stays eligible for a resume run.
                    }
                    Err(join_error) => {
                        tracing::error!(run_id = %run_id, error = %join_error, "Item task panicked");
                    }
                }
            }

            let percent_complete = completed as f64 / total as f64 * 100.0;
            self.progress.report(ProgressEvent::BatchCompleted {
                batch_index,
                batch_count,
                percent_complete,
                successes,
                failures,
            });
            tracing::info!(
                run_id = %run_id,
                batch_index,
                completed,
                successes,
                failures,
                "Batch finished"
            );

            let is_last = batch_index + 1 == batch_count;
            if !is_last && !self.config.inter_batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_batch_delay) => {}
                    _ = self.cancel_token.cancelled() => {
                        tracing::info!(run_id = %run_id, "Cancellation requested during inter-batch pause");
                    }
                }
            }
        }

        tracing::info!(
            run_id = %run_id,
            records = results.len(),
            successes,
            failures,
            "Generation run finished"
        );
        results
    }
}

/// Drive one lead through up to `max_retries + 1` attempts of the remote
/// call, recording every attempt.
///
/// Returns `None` only when an in-flight attempt is abandoned on
/// cancellation; the lead then has no terminal outcome and a resume run will
/// pick it up again. A lead cancelled while waiting between attempts
/// finalizes as failed with the attempts recorded so far.
async fn process_lead<H: HttpClient>(
    lead: Lead,
    http_client: Arc<H>,
    config: &PipelineConfig,
    progress: Arc<dyn ProgressSink>,
    cancel_token: CancellationToken,
) -> Option<OutcomeRecord> {
    let body = match lead.to_request_body() {
        Ok(body) => body,
        Err(e) => {
            // Data error: the request can never be built, so there is
            // nothing to retry.
            let error = format!("Failed to build request body: {}", e);
            tracing::error!(lead_id = %lead.lead_id, error = %error, "Unserializable payload");
            let attempt = AttemptRecord {
                attempt_number: 1,
                at: Utc::now(),
                status: AttemptStatus::Failed,
                error: Some(error.clone()),
                payload: lead.clone(),
            };
            progress.report(ProgressEvent::AttemptFinished {
                lead_id: lead.lead_id.clone(),
                attempt_number: 1,
                status: AttemptStatus::Failed,
                detail: Some(error.clone()),
            });
            return Some(OutcomeRecord {
                lead,
                status: AttemptStatus::Failed,
                attempts: vec![attempt],
                final_result: None,
                last_error: Some(error),
            });
        }
    };

    let request = ApiRequest::post(&config.endpoint, &config.path, body, &config.api_key);
    let total_attempts = config.max_retries + 1;
    let mut attempts: Vec<AttemptRecord> = Vec::new();

    for attempt_number in 1..=total_attempts {
        let call_result = tokio::select! {
            result = http_client.execute(&request, config.timeout) => result,
            _ = cancel_token.cancelled() => {
                tracing::debug!(
                    lead_id = %lead.lead_id,
                    attempt_number,
                    "In-flight attempt abandoned on cancellation"
                );
                return None;
            }
        };

        let error = match call_result {
            Ok(response) if response.is_success() => {
                match serde_json::from_str::<serde_json::Value>(&response.body) {
                    Ok(_) => {
                        attempts.push(AttemptRecord {
                            attempt_number,
                            at: Utc::now(),
                            status: AttemptStatus::Success,
                            error: None,
                            payload: lead.clone(),
                        });
                        counter!("mailrun_attempts_total", "status" => "success").increment(1);
                        progress.report(ProgressEvent::AttemptFinished {
                            lead_id: lead.lead_id.clone(),
                            attempt_number,
                            status: AttemptStatus::Success,
                            detail: None,
                        });
                        tracing::info!(
                            lead_id = %lead.lead_id,
                            attempt_number,
                            "Generated email for lead"
                        );
                        return Some(OutcomeRecord {
                            lead,
                            status: AttemptStatus::Success,
                            attempts,
                            final_result: Some(response.body),
                            last_error: None,
                        });
                    }
                    Err(e) => format!("Malformed response body: {}", e),
                }
            }
            Ok(response) => format!("HTTP {}: {}", response.status, response.body),
            Err(e) => describe_attempt_error(&e),
        };

        counter!("mailrun_attempts_total", "status" => "failed").increment(1);
        attempts.push(AttemptRecord {
            attempt_number,
            at: Utc::now(),
            status: AttemptStatus::Failed,
            error: Some(error.clone()),
            payload: lead.clone(),
        });
        progress.report(ProgressEvent::AttemptFinished {
            lead_id: lead.lead_id.clone(),
            attempt_number,
            status: AttemptStatus::Failed,
            detail: Some(error.clone()),
        });
        tracing::warn!(
            lead_id = %lead.lead_id,
            attempt_number,
            total_attempts,
            error = %error,
            "Attempt failed"
        );

        if attempt_number < total_attempts {
            if config.retry_delay.is_zero() {
                if cancel_token.is_cancelled() {
                    break;
                }
            } else {
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(config.retry_delay) => false,
                    _ = cancel_token.cancelled() => true,
                };
                if cancelled {
                    tracing::debug!(
                        lead_id = %lead.lead_id,
                        attempt_number,
                        "Cancellation between attempts, finalizing as failed"
                    );
                    break;
                }
            }
        }
    }

    let last_error = attempts.last().and_then(|a| a.error.clone());
    counter!("mailrun_leads_failed_total").increment(1);
    tracing::warn!(
        lead_id = %lead.lead_id,
        attempts = attempts.len(),
        "Lead failed after exhausting attempts"
    );
    Some(OutcomeRecord {
        lead,
        status: AttemptStatus::Failed,
        attempts,
        final_result: None,
        last_error,
    })
}

/// Human-readable detail for a transport-level attempt failure.
fn describe_attempt_error(error: &MailrunError) -> String {
    match error {
        MailrunError::HttpClient(e) if e.is_timeout() => format!("Request timed out: {}", e),
        MailrunError::HttpClient(e) if e.is_connect() => format!("Connection error: {}", e),
        other => format!("Transport error: {}", other),
    }
}
