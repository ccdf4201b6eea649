//! Batch outreach pipelines for rate-limited HTTP APIs.
//!
//! Two pipelines share one engine. The generation pipeline turns lead
//! payloads into generated email text: one remote call per lead, sequential
//! batches with an inter-batch pause, semaphore-bounded concurrency within a
//! batch, fixed-delay retries with a full per-attempt audit trail, and a
//! resumable [`ResultSet`]. The dispatch pipeline delivers finished emails:
//! one remote call per batch, all batches in flight concurrently, no retry,
//! and aggregate or per-recipient error capture selected by configuration.
//!
//! Item and batch failures are captured as data, never raised; only
//! malformed configuration (and explicit persistence I/O) produce hard
//! errors. Cancellation stops new work while preserving everything already
//! completed, so a run can be resumed over just the failed or unprocessed
//! subset.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod http;
pub mod lead;
pub mod outcome;
pub mod persist;
pub mod plan;
pub mod progress;

pub use config::{DispatchConfig, PipelineConfig};
pub use dispatch::{DispatchPipeline, DispatchReport, DispatchSummary, EmailMessage, SendingStatus};
pub use error::{MailrunError, Result};
pub use generation::{GenerationPipeline, RunId};
pub use http::{ApiRequest, HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use lead::{Lead, LeadId};
pub use outcome::{AttemptRecord, AttemptStatus, OutcomeRecord, ResultSet};
pub use persist::{JsonFileStore, NullStore, SummaryStore};
pub use plan::BatchPlan;
pub use progress::{ChannelSink, NullSink, ProgressEvent, ProgressSink};
