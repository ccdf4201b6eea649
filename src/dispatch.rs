//! Dispatch pipeline: batched delivery of finished emails through the
//! remote mailer.
//!
//! Unlike generation, dispatch treats the batch as the request unit: one
//! POST per batch, all batches in flight concurrently, no retry. A
//! batch-level failure is recorded without halting other in-flight batches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::http::{ApiRequest, HttpClient};
use crate::lead::LeadId;
use crate::outcome::ResultSet;
use crate::persist::SummaryStore;
use crate::plan::BatchPlan;

/// One finished email ready for delivery. The mailer API expects the
/// recipient addresses as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    #[serde(rename = "email")]
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipients: vec![recipient.into()],
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Build dispatch payloads from successful generation outcomes.
    ///
    /// `addresses` maps lead identifiers to recipient addresses. Skipped:
    /// failed outcomes, leads without a usable address (absent, empty, or
    /// `"N/A"`), and generated results missing a subject or body.
    pub fn from_outcomes(
        results: &ResultSet,
        addresses: &HashMap<LeadId, String>,
    ) -> Vec<EmailMessage> {
        let mut messages = Vec::new();
        for record in results.iter() {
            if !record.is_success() {
                continue;
            }
            let Some(address) = addresses.get(record.lead_id()) else {
                continue;
            };
            if address.is_empty() || address == "N/A" {
                continue;
            }
            let Some(raw) = record.final_result.as_deref() else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
                continue;
            };
            let subject = value.get("subject").and_then(|v| v.as_str()).unwrap_or_default();
            let body = value.get("body").and_then(|v| v.as_str()).unwrap_or_default();
            if subject.is_empty() || body.is_empty() {
                continue;
            }
            messages.push(EmailMessage {
                recipients: vec![address.clone()],
                subject: subject.to_string(),
                body: body.to_string(),
            });
        }
        messages
    }
}

/// Readiness statistics over a set of candidate messages.
///
/// A message is sendable only if every required field independently
/// validates present, so `ready_to_send` is the minimum across the
/// per-field counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendingStatus {
    pub total_leads: usize,
    pub valid_addresses: usize,
    pub valid_subjects: usize,
    pub valid_bodies: usize,
    pub ready_to_send: usize,
}

impl SendingStatus {
    pub fn for_messages(messages: &[EmailMessage]) -> Self {
        let valid_addresses = messages
            .iter()
            .filter(|m| m.recipients.iter().any(|r| !r.is_empty()))
            .count();
        let valid_subjects = messages.iter().filter(|m| !m.subject.is_empty()).count();
        let valid_bodies = messages.iter().filter(|m| !m.body.is_empty()).count();
        Self {
            total_leads: messages.len(),
            valid_addresses,
            valid_subjects,
            valid_bodies,
            ready_to_send: valid_addresses.min(valid_subjects).min(valid_bodies),
        }
    }
}

/// Result summary for one dispatch run. This is the exact shape persisted
/// by [`crate::persist::JsonFileStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Run timestamp, `%Y%m%d_%H%M%S`
    pub timestamp: String,
    pub total_emails: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Summary plus the optional persisted file handle.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub summary: DispatchSummary,
    /// Path of the persisted summary, when the configured store wrote one
    pub results_file: Option<PathBuf>,
}

/// Outcome of one batch request.
enum BatchOutcome {
    /// 200 with aggregate acceptance (per-item capture disabled)
    Accepted { count: usize },
    /// 200 with parsed per-recipient outcomes (per-item capture enabled)
    PerItem {
        successful: usize,
        failed: usize,
        errors: Vec<String>,
    },
    /// Batch-level transport failure: every message in the batch failed
    BatchFailed { count: usize, error: String },
}

/// Sends finished emails through the remote mailer.
#[derive(Debug)]
pub struct DispatchPipeline<H: HttpClient, S: SummaryStore> {
    http_client: Arc<H>,
    config: DispatchConfig,
    store: S,
}

impl<H: HttpClient + 'static, S: SummaryStore> DispatchPipeline<H, S> {
    /// Create a pipeline, rejecting malformed configuration before any
    /// network call can be made.
    pub fn new(http_client: Arc<H>, config: DispatchConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http_client,
            config,
            store,
        })
    }

    /// Send all messages, one request per batch, all batches concurrently.
    ///
    /// Batch-level failures are recorded in the summary, never raised. The
    /// only hard errors are persistence I/O from the configured store.
    #[tracing::instrument(skip_all, fields(total = messages.len()))]
    pub async fn send(&self, messages: &[EmailMessage]) -> Result<DispatchReport> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut summary = DispatchSummary {
            timestamp,
            total_emails: messages.len(),
            successful: 0,
            failed: 0,
            errors: Vec::new(),
        };

        if messages.is_empty() {
            tracing::info!("No messages to dispatch");
            let results_file = self.store.save(&summary).await?;
            return Ok(DispatchReport {
                summary,
                results_file,
            });
        }

        let plan = BatchPlan::new(messages.len(), self.config.batch_size);
        tracing::info!(
            batch_count = plan.batch_count(),
            batch_size = self.config.batch_size,
            per_item_error_capture = self.config.per_item_error_capture,
            "Dispatching batches"
        );

        let mut join_set: JoinSet<(usize, BatchOutcome)> = JoinSet::new();
        for (batch_index, range) in plan.iter().enumerate() {
            let batch: Vec<EmailMessage> = messages[range].to_vec();
            let http_client = self.http_client.clone();
            let config = self.config.clone();
            join_set.spawn(async move {
                let outcome = send_batch(http_client, &config, &batch).await;
                (batch_index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((batch_index, BatchOutcome::Accepted { count })) => {
                    summary.successful += count;
                    tracing::debug!(batch_index, count, "Batch accepted");
                }
                Ok((batch_index, BatchOutcome::PerItem { successful, failed, errors })) => {
                    summary.successful += successful;
                    summary.failed += failed;
                    summary.errors.extend(errors);
                    tracing::debug!(batch_index, successful, failed, "Batch dispatched");
                }
                Ok((batch_index, BatchOutcome::BatchFailed { count, error })) => {
                    counter!("mailrun_dispatch_batches_failed_total").increment(1);
                    summary.failed += count;
                    tracing::warn!(batch_index, count, error = %error, "Batch dispatch failed");
                    summary.errors.push(error);
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Batch task panicked");
                }
            }
        }

        // Panicked batch tasks leave messages unaccounted for; keep the
        // total = successful + failed identity.
        let accounted = summary.successful + summary.failed;
        if accounted < summary.total_emails {
            let missing = summary.total_emails - accounted;
            summary.failed += missing;
            summary
                .errors
                .push(format!("{missing} messages unaccounted for"));
        }

        counter!("mailrun_emails_sent_total").increment(summary.successful as u64);
        counter!("mailrun_emails_failed_total").increment(summary.failed as u64);
        tracing::info!(
            total = summary.total_emails,
            successful = summary.successful,
            failed = summary.failed,
            "Dispatch run finished"
        );

        let results_file = self.store.save(&summary).await?;
        Ok(DispatchReport {
            summary,
            results_file,
        })
    }
}

async fn send_batch<H: HttpClient>(
    http_client: Arc<H>,
    config: &DispatchConfig,
    batch: &[EmailMessage],
) -> BatchOutcome {
    let body = match serde_json::to_string(batch) {
        Ok(body) => body,
        Err(e) => {
            return BatchOutcome::BatchFailed {
                count: batch.len(),
                error: format!("Failed to serialize batch: {}", e),
            };
        }
    };

    let request = ApiRequest::post(&config.endpoint, &config.path, body, &config.api_key);
    match http_client.execute(&request, config.timeout).await {
        Ok(response) if response.status == 200 => {
            if config.per_item_error_capture {
                parse_per_item(&response.body, batch.len())
            } else {
                BatchOutcome::Accepted { count: batch.len() }
            }
        }
        Ok(response) => BatchOutcome::BatchFailed {
            count: batch.len(),
            error: format!("Failed to send batch: HTTP {} - {}", response.status, response.body),
        },
        Err(e) => BatchOutcome::BatchFailed {
            count: batch.len(),
            error: format!("Error sending batch: {}", e),
        },
    }
}

/// Parse a 200 response body as a JSON array of per-recipient outcomes.
/// Entries carrying an `"error"` key count as failed.
fn parse_per_item(body: &str, batch_len: usize) -> BatchOutcome {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(body) {
        Ok(entries) => entries,
        Err(e) => {
            return BatchOutcome::BatchFailed {
                count: batch_len,
                error: format!("Unparseable mailer response: {}", e),
            };
        }
    };

    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut errors = Vec::new();
    for entry in &entries {
        match entry.get("error") {
            Some(error) => {
                failed += 1;
                let detail = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                errors.push(detail);
            }
            None => successful += 1,
        }
    }

    // The mailer reports one entry per recipient; treat missing entries as
    // failures so every submitted message is accounted for.
    let accounted = successful + failed;
    if accounted < batch_len {
        let missing = batch_len - accounted;
        failed += missing;
        errors.push(format!("Mailer response missing {missing} recipient outcomes"));
    }

    BatchOutcome::PerItem {
        successful,
        failed,
        errors,
    }
}
