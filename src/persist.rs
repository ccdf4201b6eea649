//! Pluggable persistence for dispatch run summaries.
//!
//! Whether a deployment writes real files is decided here, not in the
//! pipeline: the pipeline always calls through [`SummaryStore`], and the
//! no-op store is an explicit choice.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::dispatch::DispatchSummary;
use crate::error::Result;

/// Persistence seam for dispatch summaries.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Persist a run summary, returning the file path when one was written.
    async fn save(&self, summary: &DispatchSummary) -> Result<Option<PathBuf>>;
}

/// Writes one pretty-printed JSON file per run under `dir`, named
/// `email_results_{timestamp}.json`. The directory is created if absent.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SummaryStore for JsonFileStore {
    async fn save(&self, summary: &DispatchSummary) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("email_results_{}.json", summary.timestamp));
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!(path = %path.display(), "Wrote dispatch summary");
        Ok(Some(path))
    }
}

/// Discards summaries; for deployments that keep results in memory only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl SummaryStore for NullStore {
    async fn save(&self, _summary: &DispatchSummary) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
