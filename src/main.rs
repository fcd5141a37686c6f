use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use workflow_harvester::{
    HarvestConfig, ItemStore, JsonFileStore, MemoryStore, Orchestrator, WorkItem, WorkflowApiSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Workflow Harvester")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Polite, fault-tolerant batch extraction of workflow templates")
        .arg(
            Arg::new("items")
                .short('i')
                .long("items")
                .value_name("FILE")
                .help("JSON array of {id, url} items to process")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("resume-from")
                .long("resume-from")
                .value_name("ITEM_ID")
                .help("Skip every item up to and including this id")
                .conflicts_with("resume"),
        )
        .arg(
            Arg::new("resume")
                .long("resume")
                .value_name("CHECKPOINT_ID")
                .help("Resume after a checkpoint (the latest one if no id is given)")
                .num_args(0..=1)
                .default_missing_value(""),
        )
        .arg(
            Arg::new("concurrency")
                .short('n')
                .long("concurrency")
                .value_name("NUM")
                .help("Items processed concurrently per chunk"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for item records and the batch summary"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Keep item records in memory instead of writing them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => HarvestConfig::load_from(&PathBuf::from(path))?,
        None => HarvestConfig::load()?,
    };

    let level = if matches.get_flag("verbose") {
        "debug".to_string()
    } else {
        config.output.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("workflow_harvester={},warn", level))),
        )
        .init();

    if let Some(concurrency) = matches.get_one::<String>("concurrency") {
        config.batch.concurrency_limit = concurrency.parse().context("--concurrency must be a number")?;
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.output.base_dir = PathBuf::from(output);
    }
    config.validate()?;

    let items_path = PathBuf::from(matches.get_one::<String>("items").map(String::as_str).unwrap_or_default());
    let items_json = tokio::fs::read_to_string(&items_path)
        .await
        .with_context(|| format!("Cannot read items file {}", items_path.display()))?;
    let items: Vec<WorkItem> = serde_json::from_str(&items_json)
        .with_context(|| format!("Items file {} is not a JSON array of {{id, url}}", items_path.display()))?;

    info!("🚀 Workflow Harvester starting...");
    info!("📄 Items: {} from {}", items.len(), items_path.display());
    info!("{}", config.summary());

    if config.transcripts.enabled {
        warn!("📝 No browser collaborator available, transcript phase is skipped");
    }

    let output_dir = config.output.base_dir.clone();
    tokio::fs::create_dir_all(&output_dir).await?;

    let store: Arc<dyn ItemStore> = if matches.get_flag("dry-run") {
        info!("🧪 Dry run: item records stay in memory");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::new(output_dir.clone()).await?)
    };
    let extractor = Arc::new(WorkflowApiSource::new(&config.source));
    let concurrency = config.batch.concurrency_limit;

    let orchestrator = Orchestrator::new(config.clone(), extractor, store).await?;

    let start_time = std::time::Instant::now();
    let summary = match (matches.get_one::<String>("resume-from"), matches.get_one::<String>("resume")) {
        (Some(item_id), _) => orchestrator.process_batch(&items, Some(item_id.as_str()), concurrency).await,
        (None, Some(checkpoint_id)) => {
            let checkpoint_id = Some(checkpoint_id.as_str()).filter(|id| !id.is_empty());
            orchestrator.resume_from_checkpoint(&items, checkpoint_id).await?
        }
        (None, None) => orchestrator.process_batch(&items, None, concurrency).await,
    };
    let duration = start_time.elapsed();

    let summary_path = output_dir.join(&config.output.summary_file);
    tokio::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?).await?;

    info!("🎉 Batch completed in {:.2}s", duration.as_secs_f64());
    info!("✅ Successful: {}", summary.successful);
    info!("❌ Failed: {}", summary.failed);
    info!("⏭️ Skipped: {}", summary.skipped);
    info!("📊 Success rate: {:.1}%", summary.success_rate);
    info!("💾 Summary saved to: {}", summary_path.display());

    for failed in summary.results.iter().filter(|result| !result.success) {
        warn!(
            "  {} [{:?}]: {}",
            failed.id,
            failed.error_type,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
