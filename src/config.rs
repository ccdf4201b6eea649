//! Configuration for the generation and dispatch pipelines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MailrunError, Result};

/// Configuration for the generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the remote generator (e.g. <https://generator.example.com>)
    pub endpoint: String,

    /// Path of the generation route
    pub path: String,

    /// API key sent as Authorization: Bearer; empty disables the header
    pub api_key: String,

    /// Number of leads per batch
    pub batch_size: usize,

    /// Cap on simultaneous in-flight item requests within a batch
    pub max_concurrent: usize,

    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Fixed delay between a failed attempt and the next retry.
    /// No exponential backoff, no jitter.
    pub retry_delay: Duration,

    /// Timeout for each individual remote call
    pub timeout: Duration,

    /// Pause between batches to respect the remote service's rate limits.
    /// Not applied after the last batch.
    pub inter_batch_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            path: "/generate-email".to_string(),
            api_key: String::new(),
            batch_size: 5,
            max_concurrent: 3,
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            inter_batch_delay: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    /// Reject malformed configuration before any network call is made.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(MailrunError::Validation(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MailrunError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(MailrunError::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MailrunError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base URL of the remote mailer
    pub endpoint: String,

    /// Path of the send route
    pub path: String,

    /// API key sent as Authorization: Bearer; empty disables the header
    pub api_key: String,

    /// Number of messages per batch request (the batch is the request unit)
    pub batch_size: usize,

    /// Timeout for each batch request
    pub timeout: Duration,

    /// When true, a 200 response body is parsed as a JSON array of
    /// per-recipient outcomes and individual errors are captured. When
    /// false, a 200 counts the whole batch as accepted.
    pub per_item_error_capture: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            path: "/send-emails".to_string(),
            api_key: String::new(),
            batch_size: 5,
            timeout: Duration::from_secs(30),
            per_item_error_capture: false,
        }
    }
}

impl DispatchConfig {
    /// Reject malformed configuration before any network call is made.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(MailrunError::Validation(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MailrunError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MailrunError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
