use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProgressConfig;
use crate::error::{HarvestError, Result};

const CHECKPOINT_PREFIX: &str = "checkpoint_";

/// Outcome of one processed item, as counted by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

/// Immutable snapshot of batch progress, one JSON file per checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "total_workflows")]
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(default)]
    pub skipped: usize,
    pub remaining: usize,
    #[serde(rename = "last_workflow_id")]
    pub last_item_id: String,
    #[serde(rename = "avg_processing_time")]
    pub avg_time: f64,
    pub eta_seconds: f64,
    pub success_rate: f64,
    #[serde(rename = "workflows_per_minute")]
    pub throughput: f64,
}

/// Short listing entry for a checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub processed: usize,
    pub total: usize,
    pub success_rate: f64,
    pub file: String,
}

/// Live progress statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub remaining: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub progress_percentage: f64,
    pub elapsed_seconds: f64,
    pub avg_time: f64,
    pub eta_seconds: f64,
    pub throughput_per_minute: f64,
    pub avg_quality_score: f64,
    pub quality_samples: usize,
    pub is_complete: bool,
    pub last_item_id: Option<String>,
    pub current_item_id: Option<String>,
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    processed: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    processing_times: VecDeque<f64>,
    quality_scores: VecDeque<f64>,
    last_item_id: Option<String>,
    current_item_id: Option<String>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl ProgressState {
    fn statistics(&self) -> ProgressStats {
        let Some(start_time) = self.start_time else {
            return ProgressStats {
                total: self.total,
                remaining: self.total,
                ..Default::default()
            };
        };

        let elapsed = self
            .end_time
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(start_time)
            .as_secs_f64();

        let avg_time = mean(&self.processing_times);
        let remaining = self.total.saturating_sub(self.processed);
        let ratio = |count: usize, of: usize| {
            if of > 0 {
                count as f64 / of as f64 * 100.0
            } else {
                0.0
            }
        };

        ProgressStats {
            total: self.total,
            processed: self.processed,
            successful: self.successful,
            failed: self.failed,
            skipped: self.skipped,
            remaining,
            success_rate: ratio(self.successful, self.processed),
            failure_rate: ratio(self.failed, self.processed),
            progress_percentage: ratio(self.processed, self.total),
            elapsed_seconds: elapsed,
            avg_time,
            eta_seconds: avg_time * remaining as f64,
            throughput_per_minute: if elapsed > 0.0 {
                self.processed as f64 / elapsed * 60.0
            } else {
                0.0
            },
            avg_quality_score: mean(&self.quality_scores),
            quality_samples: self.quality_scores.len(),
            is_complete: self.processed >= self.total,
            last_item_id: self.last_item_id.clone(),
            current_item_id: self.current_item_id.clone(),
        }
    }
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

fn push_bounded(samples: &mut VecDeque<f64>, value: f64, limit: usize) {
    samples.push_back(value);
    while samples.len() > limit {
        samples.pop_front();
    }
}

/// Progress tracker with periodic checkpoints for resume
pub struct ProgressTracker {
    checkpoint_dir: PathBuf,
    checkpoint_interval: usize,
    log_interval: usize,
    history_limit: usize,
    state: RwLock<ProgressState>,
    sequence: AtomicU32,
}

impl ProgressTracker {
    /// Create a tracker, creating the checkpoint directory if needed
    pub async fn new(config: &ProgressConfig) -> Result<Self> {
        fs::create_dir_all(&config.checkpoint_dir).await?;

        // Continue numbering after whatever is already on disk
        let last_sequence = list_checkpoint_files(&config.checkpoint_dir)
            .await?
            .iter()
            .filter_map(|path| checkpoint_id_of(path))
            .filter_map(|id| sequence_of(&id))
            .max()
            .unwrap_or(0);

        info!(
            "📊 Progress tracker initialized (checkpoints in {})",
            config.checkpoint_dir.display()
        );

        Ok(Self {
            checkpoint_dir: config.checkpoint_dir.clone(),
            checkpoint_interval: config.checkpoint_interval.max(1),
            log_interval: config.log_interval.max(1),
            history_limit: config.history_limit.max(1),
            state: RwLock::new(ProgressState::default()),
            sequence: AtomicU32::new(last_sequence),
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Reset all counters and start the clock
    pub async fn start_batch(&self, total: usize) {
        let mut state = self.state.write().await;
        *state = ProgressState {
            total,
            start_time: Some(Instant::now()),
            ..Default::default()
        };
        info!("📊 Progress tracking started: {} items", total);
    }

    pub async fn set_current_item(&self, item_id: &str) {
        self.state.write().await.current_item_id = Some(item_id.to_string());
    }

    /// Record one processed item.
    ///
    /// Returns the checkpoint when this update crossed a checkpoint interval
    /// and the snapshot was written successfully.
    pub async fn update(
        &self,
        item_id: &str,
        status: ItemStatus,
        duration: Option<Duration>,
        quality: Option<f64>,
        error: Option<&str>,
    ) -> Option<Checkpoint> {
        let processed = {
            let mut state = self.state.write().await;
            state.processed += 1;
            state.last_item_id = Some(item_id.to_string());
            state.current_item_id = None;

            match status {
                ItemStatus::Success => state.successful += 1,
                ItemStatus::Failed => state.failed += 1,
                ItemStatus::Skipped => state.skipped += 1,
            }

            if let Some(duration) = duration {
                push_bounded(&mut state.processing_times, duration.as_secs_f64(), self.history_limit);
            }
            if let Some(quality) = quality {
                push_bounded(&mut state.quality_scores, quality, self.history_limit);
            }

            state.processed
        };

        if let Some(error) = error {
            debug!("Item {} failed: {}", item_id, error);
        }

        if processed % self.log_interval == 0 {
            self.log_progress().await;
        }

        if processed % self.checkpoint_interval == 0 {
            match self.save_checkpoint(item_id).await {
                Ok(checkpoint) => return Some(checkpoint),
                Err(e) => warn!("Failed to save checkpoint after {}: {}", item_id, e),
            }
        }

        None
    }

    async fn log_progress(&self) {
        let stats = self.get_statistics().await;
        info!(
            "📊 Progress: {}/{} ({:.1}%) | Success: {:.1}% | Rate: {:.1}/min | ETA: {:.1} min",
            stats.processed,
            stats.total,
            stats.progress_percentage,
            stats.success_rate,
            stats.throughput_per_minute,
            stats.eta_seconds / 60.0
        );
    }

    fn next_checkpoint_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{:04}", Utc::now().format("%Y%m%d_%H%M%S"), sequence)
    }

    /// Write an immutable snapshot of the current state
    pub async fn save_checkpoint(&self, last_item_id: &str) -> Result<Checkpoint> {
        let stats = self.get_statistics().await;

        let checkpoint = Checkpoint {
            checkpoint_id: self.next_checkpoint_id(),
            timestamp: Utc::now(),
            total: stats.total,
            processed: stats.processed,
            successful: stats.successful,
            failed: stats.failed,
            skipped: stats.skipped,
            remaining: stats.remaining,
            last_item_id: last_item_id.to_string(),
            avg_time: stats.avg_time,
            eta_seconds: stats.eta_seconds,
            success_rate: stats.success_rate,
            throughput: stats.throughput_per_minute,
        };

        let path = checkpoint_path(&self.checkpoint_dir, &checkpoint.checkpoint_id);
        let json_content = serde_json::to_string_pretty(&checkpoint)?;
        fs::write(&path, json_content).await?;

        info!(
            "💾 Checkpoint saved: {} ({}/{} processed)",
            checkpoint.checkpoint_id, checkpoint.processed, checkpoint.total
        );
        Ok(checkpoint)
    }

    /// Load a specific checkpoint, or the most recent one
    pub async fn load_checkpoint(&self, checkpoint_id: Option<&str>) -> Result<Checkpoint> {
        load_checkpoint_from(&self.checkpoint_dir, checkpoint_id).await
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointSummary>> {
        list_checkpoints_in(&self.checkpoint_dir).await
    }

    pub async fn get_statistics(&self) -> ProgressStats {
        self.state.read().await.statistics()
    }

    /// Freeze elapsed time
    pub async fn finish_batch(&self) {
        self.state.write().await.end_time = Some(Instant::now());
        info!("📊 Batch processing complete");
    }

    /// Wall-clock estimate of when the batch will finish
    pub async fn estimate_completion(&self) -> Option<DateTime<Utc>> {
        let stats = self.get_statistics().await;
        if stats.eta_seconds <= 0.0 {
            return None;
        }
        let eta = chrono::Duration::from_std(Duration::from_secs_f64(stats.eta_seconds)).ok()?;
        Some(Utc::now() + eta)
    }

    /// One-line ASCII progress bar
    pub async fn progress_bar(&self, width: usize) -> String {
        let stats = self.get_statistics().await;
        let filled = ((width as f64 * stats.progress_percentage / 100.0) as usize).min(width);

        format!(
            "[{}{}] {:.1}% | {}/{} | ✓{} ✗{} | ETA: {:.1}min",
            "█".repeat(filled),
            "░".repeat(width - filled),
            stats.progress_percentage,
            stats.processed,
            stats.total,
            stats.successful,
            stats.failed,
            stats.eta_seconds / 60.0
        )
    }
}

fn checkpoint_path(dir: &Path, checkpoint_id: &str) -> PathBuf {
    dir.join(format!("{}{}.json", CHECKPOINT_PREFIX, checkpoint_id))
}

fn checkpoint_id_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix(CHECKPOINT_PREFIX)?.strip_suffix(".json")?;
    Some(id.to_string())
}

fn sequence_of(checkpoint_id: &str) -> Option<u32> {
    checkpoint_id.rsplit('_').next()?.parse().ok()
}

/// Checkpoint files in `dir`, oldest first
async fn list_checkpoint_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !fs::try_exists(dir).await? {
        return Ok(files);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if checkpoint_id_of(&path).is_some() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

async fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Load a checkpoint from `dir` by id, or the latest one when `checkpoint_id` is `None`
pub async fn load_checkpoint_from(dir: &Path, checkpoint_id: Option<&str>) -> Result<Checkpoint> {
    let path = match checkpoint_id {
        Some(id) => {
            let path = checkpoint_path(dir, id);
            if !fs::try_exists(&path).await? {
                return Err(HarvestError::CheckpointNotFound(id.to_string()));
            }
            path
        }
        None => list_checkpoint_files(dir)
            .await?
            .pop()
            .ok_or_else(|| HarvestError::CheckpointNotFound(format!("no checkpoints in {}", dir.display())))?,
    };

    let checkpoint = read_checkpoint(&path).await?;
    info!(
        "📂 Loaded checkpoint {}: {}/{} processed, last item {}",
        checkpoint.checkpoint_id, checkpoint.processed, checkpoint.total, checkpoint.last_item_id
    );
    Ok(checkpoint)
}

/// Summaries of every readable checkpoint in `dir`, oldest first
pub async fn list_checkpoints_in(dir: &Path) -> Result<Vec<CheckpointSummary>> {
    let mut summaries = Vec::new();

    for path in list_checkpoint_files(dir).await? {
        match read_checkpoint(&path).await {
            Ok(checkpoint) => summaries.push(CheckpointSummary {
                checkpoint_id: checkpoint.checkpoint_id,
                timestamp: checkpoint.timestamp,
                processed: checkpoint.processed,
                total: checkpoint.total,
                success_rate: checkpoint.success_rate,
                file: path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            }),
            Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
        }
    }

    Ok(summaries)
}
