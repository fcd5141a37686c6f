//! Batch orchestration: rate limit, retried extraction, reconciliation,
//! transcripts and persistence for every item, in bounded-concurrency chunks.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::progress::{ItemStatus, ProgressStats, ProgressTracker};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::reconcile::{
    quality_score, NodeContext, NodeRecord, ReconciliationEngine, StandaloneAnnotation, VideoReference,
};
use crate::retry::{RetryHandler, RetryStats};
use crate::source::Extractor;
use crate::storage::ItemStore;
use crate::transcripts::{TranscriptFetcher, TranscriptResult, TranscriptRetriever};

/// One unit of work as submitted by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub url: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Where an item is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Pending,
    RateLimited,
    Extracting,
    Reconciling,
    Persisting,
    Succeeded,
    Failed,
}

/// Why an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NonRetryable,
    RetriesExhausted,
    CircuitOpen,
    /// The item's task panicked
    Exception,
}

impl From<&HarvestError> for FailureKind {
    fn from(error: &HarvestError) -> Self {
        match error {
            HarvestError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            HarvestError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            _ => FailureKind::NonRetryable,
        }
    }
}

/// Result record for one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    pub url: String,
    pub success: bool,
    pub status: ItemStatus,
    /// Last stage reached
    pub stage: ItemStage,
    pub quality_score: Option<f64>,
    pub duration_seconds: f64,
    pub stored: bool,
    pub error: Option<String>,
    pub error_type: Option<FailureKind>,
    pub node_count: usize,
    pub context_count: usize,
    pub video_count: usize,
    pub transcript_count: usize,
}

impl ItemResult {
    fn new(item: &WorkItem) -> Self {
        Self {
            id: item.id.clone(),
            url: item.url.clone(),
            success: false,
            status: ItemStatus::Failed,
            stage: ItemStage::Pending,
            quality_score: None,
            duration_seconds: 0.0,
            stored: false,
            error: None,
            error_type: None,
            node_count: 0,
            context_count: 0,
            video_count: 0,
            transcript_count: 0,
        }
    }

    fn enter(&mut self, stage: ItemStage) {
        debug!("{} → {:?}", self.id, stage);
        self.stage = stage;
    }

    fn fail(&mut self, kind: FailureKind, message: String) {
        self.enter(ItemStage::Failed);
        self.success = false;
        self.status = ItemStatus::Failed;
        self.error_type = Some(kind);
        self.error = Some(message);
    }
}

/// Everything persisted for a successfully processed item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub url: String,
    pub extracted_at: DateTime<Utc>,
    pub source: Option<String>,
    pub connection_count: usize,
    pub nodes: Vec<NodeRecord>,
    pub contexts: Vec<NodeContext>,
    pub standalone: Vec<StandaloneAnnotation>,
    pub videos: Vec<VideoReference>,
    pub transcripts: Vec<TranscriptResult>,
    pub quality_score: f64,
    pub node_count: usize,
    pub context_count: usize,
    pub video_count: usize,
    pub transcript_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub total_stored: u64,
    pub total_skipped: u64,
}

/// Statistics from every component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub progress: ProgressStats,
    pub rate_limiter: RateLimiterStats,
    pub retry_handler: RetryStats,
    pub orchestrator: OrchestratorStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Every submitted item, including those skipped by resume
    pub total: usize,
    pub start_index: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Successful share of the items actually attempted; skipped items are left out
    pub success_rate: f64,
    pub resumed_from: Option<String>,
    /// In submission order
    pub results: Vec<ItemResult>,
    pub statistics: Statistics,
}

/// Batch orchestrator owning one rate limiter, retry handler and progress tracker
pub struct Orchestrator {
    config: HarvestConfig,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ItemStore>,
    rate_limiter: RateLimiter,
    retry_handler: RetryHandler,
    progress: ProgressTracker,
    engine: ReconciliationEngine,
    transcripts: Option<TranscriptRetriever>,
    stats: Mutex<OrchestratorStats>,
}

impl Orchestrator {
    pub async fn new(
        config: HarvestConfig,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn ItemStore>,
    ) -> Result<Self> {
        info!(
            "🔧 Initializing orchestrator: {} req/s, concurrency {}",
            config.rate_limit.rate, config.batch.concurrency_limit
        );

        config
            .validate()
            .map_err(|e| HarvestError::Config(e.to_string()))?;
        let progress = ProgressTracker::new(&config.progress).await?;

        Ok(Self {
            rate_limiter: RateLimiter::new(&config.rate_limit),
            retry_handler: RetryHandler::new(&config.retry),
            engine: ReconciliationEngine::new(&config.reconcile),
            progress,
            extractor,
            store,
            transcripts: None,
            stats: Mutex::new(OrchestratorStats::default()),
            config,
        })
    }

    /// Enable the transcript phase with the given browser collaborator
    pub fn with_transcripts(mut self, fetcher: Arc<dyn TranscriptFetcher>) -> Self {
        self.transcripts = Some(TranscriptRetriever::new(self.config.transcripts.clone(), fetcher));
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_handler(&self) -> &RetryHandler {
        &self.retry_handler
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Process one item end to end. Never fails: every error lands in the result.
    pub async fn process_item(&self, item: &WorkItem) -> ItemResult {
        let result = self.execute_item(item).await;
        self.record_progress(&result).await;
        result
    }

    async fn execute_item(&self, item: &WorkItem) -> ItemResult {
        let start_time = Instant::now();
        let mut result = ItemResult::new(item);

        if self.config.batch.skip_existing && self.store.contains(&item.id).await {
            debug!("⏭️ Skipping {} (already stored)", item.id);
            result.success = true;
            result.status = ItemStatus::Skipped;
            result.stored = true;
        } else {
            self.progress.set_current_item(&item.id).await;

            let outcome = AssertUnwindSafe(self.run_item(item, &mut result))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let kind = FailureKind::from(&e);
                    warn!("❌ {} failed ({:?}): {}", item.id, kind, e);
                    result.fail(kind, e.to_string());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("💥 {} panicked during {:?}: {}", item.id, result.stage, message);
                    result.fail(FailureKind::Exception, message);
                }
            }
        }

        result.duration_seconds = start_time.elapsed().as_secs_f64();
        result
    }

    /// Feed a finished item to the tracker; a checkpoint it cuts names this item as the last one done
    async fn record_progress(&self, result: &ItemResult) {
        let checkpoint = self
            .progress
            .update(
                &result.id,
                result.status,
                Some(Duration::from_secs_f64(result.duration_seconds)),
                result.quality_score,
                result.error.as_deref(),
            )
            .await;

        if let Some(checkpoint) = checkpoint {
            if let Err(e) = self.store.upsert_checkpoint(&checkpoint).await {
                warn!("Failed to store checkpoint {}: {}", checkpoint.checkpoint_id, e);
            }
        }

        self.record(result).await;
    }

    async fn run_item(&self, item: &WorkItem, result: &mut ItemResult) -> Result<()> {
        result.enter(ItemStage::RateLimited);
        let waited = self.rate_limiter.acquire_for_url(&item.url).await;
        if !waited.is_zero() {
            debug!("⏳ {} waited {:.2}s for a token", item.id, waited.as_secs_f64());
        }

        result.enter(ItemStage::Extracting);
        let extractor = &self.extractor;
        let timeout = self.config.batch.extraction_timeout();
        let payload = self
            .retry_handler
            .retry_with_backoff(&format!("extract {}", item.id), move || async move {
                match tokio::time::timeout(timeout, extractor.extract(&item.id, &item.url)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HarvestError::Timeout(timeout)),
                }
            })
            .await?;

        result.enter(ItemStage::Reconciling);
        let reconciliation = self
            .engine
            .reconcile(&payload.raw_items, &payload.embedded_documents);

        let transcripts = match &self.transcripts {
            Some(retriever) if self.config.transcripts.enabled => {
                retriever.retrieve_all(&reconciliation.videos).await
            }
            _ => Vec::new(),
        };

        let transcript_count = transcripts.iter().filter(|transcript| transcript.success).count();
        let quality = quality_score(
            reconciliation.nodes.len(),
            reconciliation.contexts.len(),
            reconciliation.videos.len(),
            transcript_count,
        );

        result.node_count = reconciliation.nodes.len();
        result.context_count = reconciliation.contexts.len();
        result.video_count = reconciliation.videos.len();
        result.transcript_count = transcript_count;
        result.quality_score = Some(quality);

        result.enter(ItemStage::Persisting);
        if self.config.batch.store_results {
            let record = ItemRecord {
                id: item.id.clone(),
                url: item.url.clone(),
                extracted_at: Utc::now(),
                source: payload.source,
                connection_count: payload.connection_count,
                node_count: result.node_count,
                context_count: result.context_count,
                video_count: result.video_count,
                transcript_count,
                nodes: reconciliation.nodes,
                contexts: reconciliation.contexts,
                standalone: reconciliation.standalone,
                videos: reconciliation.videos,
                transcripts,
                quality_score: quality,
            };

            match self.store.upsert_item(&item.id, &record).await {
                Ok(()) => result.stored = true,
                Err(e) => warn!("💾 {} processed but not stored: {}", item.id, e),
            }
        }

        result.enter(ItemStage::Succeeded);
        result.success = true;
        result.status = ItemStatus::Success;

        info!(
            "✅ {}: {} nodes, {} contexts, 🎬 {} videos, 📝 {} transcripts (quality {:.2})",
            item.id, result.node_count, result.context_count, result.video_count, transcript_count, quality
        );
        Ok(())
    }

    async fn record(&self, result: &ItemResult) {
        let mut stats = self.stats.lock().await;
        stats.total_processed += 1;
        match result.status {
            ItemStatus::Success => stats.total_successful += 1,
            ItemStatus::Failed => stats.total_failed += 1,
            ItemStatus::Skipped => stats.total_skipped += 1,
        }
        if result.stored && result.status == ItemStatus::Success {
            stats.total_stored += 1;
        }
    }

    /// Process `items` in chunks of `concurrency_limit`, optionally resuming after `resume_from`.
    pub async fn process_batch(
        &self,
        items: &[WorkItem],
        resume_from: Option<&str>,
        concurrency_limit: usize,
    ) -> BatchSummary {
        let start_index = match resume_from {
            Some(last_id) => match items.iter().position(|item| item.id == last_id) {
                Some(index) => {
                    info!("🔄 Resuming after {} ({} items already done)", last_id, index + 1);
                    index + 1
                }
                None => {
                    warn!("Resume point {} not found in item list, starting from the beginning", last_id);
                    0
                }
            },
            None => 0,
        };

        let remaining = &items[start_index..];
        let chunk_size = concurrency_limit.max(1);

        info!(
            "🚀 Starting batch: {} items ({} to process, chunks of {})",
            items.len(),
            remaining.len(),
            chunk_size
        );
        self.progress.start_batch(remaining.len()).await;

        // Items finish out of order; progress only advances over the contiguous finished prefix
        let ledger = Mutex::new(CompletionLedger::default());
        for (chunk_index, chunk) in remaining.chunks(chunk_size).enumerate() {
            debug!("Chunk {} ({} items)", chunk_index + 1, chunk.len());
            let offset = chunk_index * chunk_size;

            join_all(chunk.iter().enumerate().map(|(position, item)| {
                let ledger = &ledger;
                async move {
                    let result = self.execute_item(item).await;

                    let mut ledger = ledger.lock().await;
                    ledger.finished.insert(offset + position, result);
                    while let Some(result) = ledger.take_next() {
                        self.record_progress(&result).await;
                        ledger.results.push(result);
                    }
                }
            }))
            .await;

            info!("{}", self.progress.progress_bar(40).await);
        }

        self.progress.finish_batch().await;
        let results = ledger.into_inner().results;

        let count = |status: ItemStatus| results.iter().filter(|result| result.status == status).count();
        let successful = count(ItemStatus::Success);
        let failed = count(ItemStatus::Failed);
        let skipped = count(ItemStatus::Skipped);
        let processed = results.len();
        let attempted = processed - skipped;

        let summary = BatchSummary {
            total: items.len(),
            start_index,
            processed,
            successful,
            failed,
            skipped,
            success_rate: if attempted > 0 {
                successful as f64 / attempted as f64 * 100.0
            } else {
                0.0
            },
            resumed_from: resume_from.map(str::to_string),
            results,
            statistics: self.get_statistics().await,
        };

        info!(
            "🎉 Batch complete: {}/{} successful ({:.1}%), {} failed, {} skipped",
            summary.successful, summary.processed, summary.success_rate, summary.failed, summary.skipped
        );
        summary
    }

    /// Load a checkpoint (the latest when `checkpoint_id` is `None`) and resume after it
    pub async fn resume_from_checkpoint(
        &self,
        items: &[WorkItem],
        checkpoint_id: Option<&str>,
    ) -> Result<BatchSummary> {
        let checkpoint = self.progress.load_checkpoint(checkpoint_id).await?;
        info!("🔄 Resuming from checkpoint {}", checkpoint.checkpoint_id);

        Ok(self
            .process_batch(items, Some(&checkpoint.last_item_id), self.config.batch.concurrency_limit)
            .await)
    }

    pub async fn get_statistics(&self) -> Statistics {
        Statistics {
            progress: self.progress.get_statistics().await,
            rate_limiter: self.rate_limiter.get_statistics().await,
            retry_handler: self.retry_handler.get_statistics().await,
            orchestrator: self.stats.lock().await.clone(),
        }
    }

    /// Zero orchestrator, limiter and retry counters
    pub async fn reset_statistics(&self) {
        *self.stats.lock().await = OrchestratorStats::default();
        self.rate_limiter.reset_statistics().await;
        self.retry_handler.reset_statistics().await;
        info!("📊 Statistics reset");
    }
}

/// Results held back until every earlier item in the batch has finished
#[derive(Default)]
struct CompletionLedger {
    next: usize,
    finished: BTreeMap<usize, ItemResult>,
    results: Vec<ItemResult>,
}

impl CompletionLedger {
    fn take_next(&mut self) -> Option<ItemResult> {
        let result = self.finished.remove(&self.next)?;
        self.next += 1;
        Some(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::source::ExtractionPayload;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Answers by id: "missing" is a 404, "slow" never returns, "late" sleeps first
    struct FakeExtractor {
        calls: AtomicU32,
    }

    impl FakeExtractor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(&self, id: &str, _url: &str) -> Result<ExtractionPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match id {
                "missing" => {
                    return Err(HarvestError::Http {
                        status: 404,
                        message: "not found".to_string(),
                    })
                }
                "slow" => std::future::pending::<()>().await,
                "late" => tokio::time::sleep(Duration::from_secs(5)).await,
                _ => {}
            }

            Ok(ExtractionPayload {
                raw_items: serde_json::from_value(json!([
                    {"id": "n1", "name": "Webhook", "type": "n8n-nodes-base.webhook", "position": [0, 0]},
                    {"id": "s1", "name": "Intro", "type": "n8n-nodes-base.stickyNote", "position": [0, -120],
                     "parameters": {"content": "Watch https://www.youtube.com/watch?v=AAAAAAAAAAA"}}
                ]))
                .unwrap(),
                ..Default::default()
            })
        }
    }

    async fn orchestrator(
        temp_dir: &TempDir,
        extractor: Arc<FakeExtractor>,
        store: Arc<MemoryStore>,
        skip_existing: bool,
    ) -> Orchestrator {
        let mut config = ConfigBuilder::new()
            .with_rate_limit(100.0, 100.0)
            .with_retry(2, 10, 100)
            .with_checkpoint_dir(temp_dir.path().to_path_buf())
            .skip_existing(skip_existing)
            .build();
        config.batch.extraction_timeout_seconds = 1;

        Orchestrator::new(config, extractor, store).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_item_success() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&temp_dir, FakeExtractor::new(), store.clone(), false).await;

        let result = orchestrator
            .process_item(&WorkItem::new("1", "https://n8n.io/workflows/1"))
            .await;

        assert!(result.success);
        assert!(result.stored);
        assert_eq!(result.stage, ItemStage::Succeeded);
        assert_eq!(result.node_count, 1);
        assert_eq!(result.context_count, 1);
        assert_eq!(result.video_count, 1);
        assert_eq!(result.transcript_count, 0);
        assert!((result.quality_score.unwrap() - 0.8).abs() < 1e-9);

        let record = store.get("1").await.unwrap();
        assert_eq!(record.videos[0].canonical_id.as_deref(), Some("AAAAAAAAAAA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_non_retryable() {
        let temp_dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::new();
        let orchestrator = orchestrator(&temp_dir, extractor.clone(), Arc::new(MemoryStore::new()), false).await;

        let result = orchestrator.process_item(&WorkItem::new("missing", "")).await;
        assert!(!result.success);
        assert_eq!(result.stage, ItemStage::Failed);
        assert_eq!(result.error_type, Some(FailureKind::NonRetryable));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_extraction_times_out_and_exhausts_retries() {
        let temp_dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::new();
        let orchestrator = orchestrator(&temp_dir, extractor.clone(), Arc::new(MemoryStore::new()), false).await;

        let result = orchestrator.process_item(&WorkItem::new("slow", "")).await;
        assert_eq!(result.error_type, Some(FailureKind::RetriesExhausted));
        assert!(result.error.unwrap().contains("Timed out"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_existing() {
        let temp_dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::new();
        let store = Arc::new(MemoryStore::new());
        store.upsert_item("1", &ItemRecord::default()).await.unwrap();
        let orchestrator = orchestrator(&temp_dir, extractor.clone(), store, true).await;

        let summary = orchestrator
            .process_batch(&[WorkItem::new("1", ""), WorkItem::new("2", "")], None, 5)
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 0);
        assert!((summary.success_rate - 100.0).abs() < 1e-9);
        assert_eq!(summary.results[0].status, ItemStatus::Skipped);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.statistics.orchestrator.total_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_submission_order() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, FakeExtractor::new(), Arc::new(MemoryStore::new()), false).await;

        let items = vec![
            WorkItem::new("late", ""),
            WorkItem::new("a", ""),
            WorkItem::new("b", ""),
        ];
        // "late" outlasts the 1s extraction timeout on both attempts
        let summary = orchestrator.process_batch(&items, None, 3).await;
        let ids: Vec<&str> = summary.results.iter().map(|result| result.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "a", "b"]);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.results[0].error_type, Some(FailureKind::RetriesExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_point_not_found_starts_at_beginning() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, FakeExtractor::new(), Arc::new(MemoryStore::new()), false).await;

        let items = vec![WorkItem::new("a", ""), WorkItem::new("b", "")];
        let summary = orchestrator.process_batch(&items, Some("zzz"), 2).await;
        assert_eq!(summary.start_index, 0);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.resumed_from.as_deref(), Some("zzz"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_statistics() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp_dir, FakeExtractor::new(), Arc::new(MemoryStore::new()), false).await;

        orchestrator.process_item(&WorkItem::new("a", "https://n8n.io/a")).await;
        assert_eq!(orchestrator.get_statistics().await.orchestrator.total_processed, 1);

        orchestrator.reset_statistics().await;
        let stats = orchestrator.get_statistics().await;
        assert_eq!(stats.orchestrator, OrchestratorStats::default());
        assert_eq!(stats.rate_limiter.total_requests, 0);
        assert_eq!(stats.retry_handler.total_attempts, 0);
    }

    #[tokio::test]
    async fn test_zero_rate_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .with_rate_limit(0.0, 1.0)
            .with_checkpoint_dir(temp_dir.path().to_path_buf())
            .build();

        let result = Orchestrator::new(config, FakeExtractor::new(), Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_completion_ledger_releases_contiguous_prefix() {
        let mut ledger = CompletionLedger::default();
        let result = |id: &str| ItemResult::new(&WorkItem::new(id, ""));

        ledger.finished.insert(1, result("b"));
        ledger.finished.insert(2, result("c"));
        assert!(ledger.take_next().is_none());

        ledger.finished.insert(0, result("a"));
        let released: Vec<String> = std::iter::from_fn(|| ledger.take_next()).map(|r| r.id).collect();
        assert_eq!(released, vec!["a", "b", "c"]);
        assert!(ledger.finished.is_empty());
    }

    #[test]
    fn test_failure_kind_mapping() {
        let open = HarvestError::CircuitOpen { consecutive_failures: 3 };
        let exhausted = HarvestError::RetriesExhausted {
            attempts: 3,
            source: Box::new(HarvestError::Network("reset".to_string())),
        };
        let permanent = HarvestError::NonRetryable("gone".to_string());

        assert_eq!(FailureKind::from(&open), FailureKind::CircuitOpen);
        assert_eq!(FailureKind::from(&exhausted), FailureKind::RetriesExhausted);
        assert_eq!(FailureKind::from(&permanent), FailureKind::NonRetryable);
        assert_eq!(serde_json::to_value(FailureKind::NonRetryable).unwrap(), json!("non_retryable"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
