//! Persistence collaborators for item records and checkpoints

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{HarvestError, Result};
use crate::orchestrator::ItemRecord;
use crate::progress::Checkpoint;

/// Idempotent sink for processed items
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn upsert_item(&self, id: &str, record: &ItemRecord) -> Result<()>;

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Whether `id` was stored by an earlier run
    async fn contains(&self, _id: &str) -> bool {
        false
    }
}

/// One pretty-printed JSON file per item under `{base}/items/`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
    items_dir: PathBuf,
}

impl JsonFileStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        let items_dir = base_dir.join("items");
        fs::create_dir_all(&items_dir).await?;

        info!("💾 JSON store ready at {}", base_dir.display());
        Ok(Self { base_dir, items_dir })
    }

    pub fn item_path(&self, id: &str) -> PathBuf {
        self.items_dir.join(format!("{}.json", file_stem_for(id)))
    }

    pub fn latest_checkpoint_path(&self) -> PathBuf {
        self.base_dir.join("latest_checkpoint.json")
    }

    pub async fn load_item(&self, id: &str) -> Result<ItemRecord> {
        let content = fs::read_to_string(self.item_path(id)).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl ItemStore for JsonFileStore {
    async fn upsert_item(&self, id: &str, record: &ItemRecord) -> Result<()> {
        let path = self.item_path(id);
        write_atomically(&path, &serde_json::to_string_pretty(record)?).await?;
        debug!("💾 Stored item {} at {}", id, path.display());
        Ok(())
    }

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let content = serde_json::to_string_pretty(checkpoint)?;
        write_atomically(&self.latest_checkpoint_path(), &content).await
    }

    async fn contains(&self, id: &str) -> bool {
        fs::try_exists(self.item_path(id)).await.unwrap_or(false)
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| HarvestError::Storage(format!("not a file path: {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Percent-encoded, so distinct ids never share a file and none escapes the items dir.
/// A lone `%` is never produced by the encoder, which frees it for the empty id.
fn file_stem_for(id: &str) -> String {
    if id.is_empty() {
        "%".to_string()
    } else {
        urlencoding::encode(id).into_owned()
    }
}

/// In-process store for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, ItemRecord>>,
    checkpoints: RwLock<Vec<Checkpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<ItemRecord> {
        self.items.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.read().await.clone()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert_item(&self, id: &str, record: &ItemRecord) -> Result<()> {
        self.items.write().await.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.write().await.push(checkpoint.clone());
        Ok(())
    }

    async fn contains(&self, id: &str) -> bool {
        self.items.read().await.contains_key(id)
    }
}
