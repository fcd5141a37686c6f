use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the workflow harvester
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Outbound request throttling
    pub rate_limit: RateLimitConfig,

    /// Retry and circuit breaker settings
    pub retry: RetryConfig,

    /// Progress tracking and checkpoint settings
    pub progress: ProgressConfig,

    /// Batch processing settings
    pub batch: BatchConfig,

    /// Item classification and annotation matching
    pub reconcile: ReconcileConfig,

    /// Video transcript retrieval
    pub transcripts: TranscriptConfig,

    /// Workflow JSON API settings
    pub source: SourceConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second, per domain
    pub rate: f64,

    /// Bucket capacity (burst size)
    pub capacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first one
    pub max_attempts: u32,

    /// Base delay for exponential backoff (milliseconds)
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds)
    pub max_delay_ms: u64,

    /// Consecutive failed calls before the breaker opens
    pub circuit_breaker_threshold: u32,

    /// Time before an open breaker closes on its own (seconds)
    pub circuit_breaker_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Directory holding one JSON file per checkpoint
    pub checkpoint_dir: PathBuf,

    /// Save a checkpoint every N processed items
    pub checkpoint_interval: usize,

    /// Log a progress line every N processed items
    pub log_interval: usize,

    /// Number of timing/quality samples kept for statistics
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items processed concurrently per chunk
    pub concurrency_limit: usize,

    /// Deadline for a single extraction call (seconds)
    pub extraction_timeout_seconds: u64,

    /// Record items already present in the store as skipped
    pub skip_existing: bool,

    /// Persist item records through the store
    pub store_results: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Kind string that marks a free-text annotation
    pub annotation_kind: String,

    /// Kind prefixes recognized as functional nodes
    pub node_namespaces: Vec<String>,

    /// Kinds inside the namespaces that are UI/system artifacts
    pub excluded_kinds: Vec<String>,

    /// Minimum confidence for binding an annotation to a node (exclusive)
    pub match_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Run the transcript phase when a fetcher is available
    pub enabled: bool,

    /// Attempts per video
    pub max_attempts: u32,

    /// Attempts run with a hidden browser before switching to visible
    pub hidden_attempts: u32,

    /// Timeout for the first attempt (seconds)
    pub base_timeout_seconds: u64,

    /// Added to the timeout for every further attempt (seconds)
    pub timeout_step_seconds: u64,

    /// Transcripts must be longer than this many characters
    pub min_length: usize,

    /// Pause between two videos of the same item (milliseconds)
    pub inter_video_delay_ms: u64,

    /// Backoff unit, doubled per attempt (milliseconds)
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Primary workflow JSON endpoint, `{id}` is replaced by the item id
    pub api_url_template: String,

    /// Endpoint tried when the primary one answers 404
    pub fallback_url_template: Option<String>,

    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Also download the item page for the embedded video pass
    pub fetch_page_html: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base output directory (item records, batch summary)
    pub base_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// File name of the batch summary written by the CLI
    pub summary_file: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 2.0,
            capacity: 5.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            circuit_breaker_threshold: 10,
            circuit_breaker_timeout_seconds: 300, // 5 minutes
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(".checkpoints"),
            checkpoint_interval: 50,
            log_interval: 10,
            history_limit: 1000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 20,
            extraction_timeout_seconds: 120,
            skip_existing: false,
            store_results: true,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            annotation_kind: "n8n-nodes-base.stickyNote".to_string(),
            node_namespaces: vec!["n8n-nodes-base.".to_string()],
            excluded_kinds: [
                "canvas",
                "workflow",
                "credentials",
                "execution",
                "connection",
                "trigger",
                "action",
                "condition",
                "transform",
                "output",
                "input",
            ]
            .iter()
            .map(|kind| format!("n8n-nodes-base.{}", kind))
            .collect(),
            match_threshold: 0.1,
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            hidden_attempts: 3,
            base_timeout_seconds: 60,
            timeout_step_seconds: 10,
            min_length: 50,
            inter_video_delay_ms: 1000,
            backoff_base_ms: 1000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url_template: "https://api.n8n.io/api/workflows/templates/{id}".to_string(),
            fallback_url_template: Some("https://n8n.io/api/workflows/by-id/{id}".to_string()),
            request_timeout_seconds: 30,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            fetch_page_html: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./output"),
            log_level: "info".to_string(),
            summary_file: "batch_summary.json".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_seconds)
    }
}

impl BatchConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_seconds)
    }
}

impl TranscriptConfig {
    /// Hidden browser for the first attempts, visible afterwards
    pub fn visible_for_attempt(&self, attempt: u32) -> bool {
        attempt >= self.hidden_attempts
    }

    /// Base timeout plus one step per previous attempt
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_timeout_seconds + self.timeout_step_seconds * attempt as u64)
    }

    /// 1x, 2x, 4x, 8x the backoff unit
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << attempt.min(20)))
    }

    pub fn inter_video_delay(&self) -> Duration {
        Duration::from_millis(self.inter_video_delay_ms)
    }
}

impl HarvestConfig {
    /// Load configuration from the first config file found, else from environment
    pub fn load() -> Result<Self> {
        let config_paths = [
            "workflow-harvester.toml",
            "config/workflow-harvester.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                match Self::load_from(Path::new(path)) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific TOML file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let mut config: HarvestConfig = toml::from_str(&config_str)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_env_overrides();

        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(rate) = std::env::var("HARVESTER_RATE") {
            self.rate_limit.rate = rate.parse().unwrap_or(self.rate_limit.rate);
        }

        if let Ok(concurrency) = std::env::var("HARVESTER_CONCURRENCY") {
            self.batch.concurrency_limit = concurrency.parse().unwrap_or(self.batch.concurrency_limit);
        }

        if let Ok(attempts) = std::env::var("HARVESTER_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts.parse().unwrap_or(self.retry.max_attempts);
        }

        if let Ok(dir) = std::env::var("HARVESTER_CHECKPOINT_DIR") {
            self.progress.checkpoint_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("HARVESTER_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(dir);
        }

        if let Ok(log_level) = std::env::var("HARVESTER_LOG_LEVEL") {
            self.output.log_level = log_level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_limit.rate > 0.0) {
            return Err(anyhow!("rate_limit.rate must be greater than 0"));
        }

        if self.rate_limit.capacity < 1.0 {
            return Err(anyhow!("rate_limit.capacity must be at least 1"));
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be greater than 0"));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(anyhow!("retry.max_delay_ms must not be smaller than retry.base_delay_ms"));
        }

        if self.retry.circuit_breaker_threshold == 0 {
            return Err(anyhow!("retry.circuit_breaker_threshold must be greater than 0"));
        }

        if self.batch.concurrency_limit == 0 {
            return Err(anyhow!("batch.concurrency_limit must be greater than 0"));
        }

        if self.progress.checkpoint_interval == 0 {
            return Err(anyhow!("progress.checkpoint_interval must be greater than 0"));
        }

        if self.transcripts.max_attempts == 0 {
            return Err(anyhow!("transcripts.max_attempts must be greater than 0"));
        }

        if !self.source.api_url_template.contains("{id}") {
            return Err(anyhow!("source.api_url_template must contain an {{id}} placeholder"));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Workflow Harvester Configuration:\n\
            - Rate Limit: {} req/s (burst {})\n\
            - Retries: {} attempts, {}ms base delay, breaker at {} failures\n\
            - Concurrency: {}\n\
            - Checkpoints: every {} items in {}\n\
            - Transcripts: {}\n\
            - Output Directory: {}",
            self.rate_limit.rate,
            self.rate_limit.capacity,
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.circuit_breaker_threshold,
            self.batch.concurrency_limit,
            self.progress.checkpoint_interval,
            self.progress.checkpoint_dir.display(),
            if self.transcripts.enabled { "enabled" } else { "disabled" },
            self.output.base_dir.display()
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: HarvestConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HarvestConfig::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate: f64, capacity: f64) -> Self {
        self.config.rate_limit.rate = rate;
        self.config.rate_limit.capacity = capacity;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self.config.retry.base_delay_ms = base_delay_ms;
        self.config.retry.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, timeout_seconds: u64) -> Self {
        self.config.retry.circuit_breaker_threshold = threshold;
        self.config.retry.circuit_breaker_timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_concurrency(mut self, concurrency_limit: usize) -> Self {
        self.config.batch.concurrency_limit = concurrency_limit;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: PathBuf) -> Self {
        self.config.progress.checkpoint_dir = dir;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.config.progress.checkpoint_interval = interval;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn enable_transcripts(mut self, enable: bool) -> Self {
        self.config.transcripts.enabled = enable;
        self
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.config.batch.skip_existing = skip;
        self
    }

    pub fn build(self) -> HarvestConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
