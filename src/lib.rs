/// Workflow Harvester
///
/// Polite, fault-tolerant batch extraction of workflow templates: per-domain rate
/// limiting, retries behind a circuit breaker, checkpointed progress, and
/// reconciliation of nodes, annotations, videos and transcripts.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;
pub mod reconcile;
pub mod retry;
pub mod source;
pub mod storage;
pub mod transcripts;

// Re-export main types for easy access
pub use crate::config::{ConfigBuilder, HarvestConfig};
pub use crate::error::{HarvestError, Result};
pub use crate::orchestrator::{BatchSummary, FailureKind, ItemRecord, ItemResult, Orchestrator, WorkItem};
pub use crate::progress::{Checkpoint, ItemStatus, ProgressTracker};
pub use crate::rate_limiter::RateLimiter;
pub use crate::reconcile::{ReconciliationEngine, Reconciliation, VideoReference};
pub use crate::retry::RetryHandler;
pub use crate::source::{ExtractionPayload, Extractor, WorkflowApiSource};
pub use crate::storage::{ItemStore, JsonFileStore, MemoryStore};
pub use crate::transcripts::{TranscriptFetcher, TranscriptRetriever};
