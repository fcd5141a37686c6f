use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use workflow_harvester::progress::{list_checkpoints_in, load_checkpoint_from};

#[derive(Parser)]
#[command(name = "checkpoint-manager")]
#[command(about = "Inspect batch checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = ".checkpoints")]
    checkpoint_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List all checkpoints, oldest first
    List,
    /// Show one checkpoint in full
    Show {
        /// Checkpoint id (e.g. 20240101_120000_0003)
        checkpoint_id: String,
    },
    /// Show the most recent checkpoint
    Latest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let checkpoints = list_checkpoints_in(&cli.checkpoint_dir).await?;

            if checkpoints.is_empty() {
                info!("📭 No checkpoints found in {}", cli.checkpoint_dir.display());
                return Ok(());
            }

            info!("💾 Found {} checkpoints:", checkpoints.len());
            for checkpoint in checkpoints {
                info!(
                    "  {} - {}/{} processed, {:.1}% success, {}",
                    checkpoint.checkpoint_id,
                    checkpoint.processed,
                    checkpoint.total,
                    checkpoint.success_rate,
                    checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::Show { checkpoint_id } => {
            let checkpoint = load_checkpoint_from(&cli.checkpoint_dir, Some(&checkpoint_id)).await?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        }

        Commands::Latest => {
            let checkpoint = load_checkpoint_from(&cli.checkpoint_dir, None).await?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
            info!("🔄 Resume with: workflow-harvester --resume {}", checkpoint.checkpoint_id);
        }
    }

    Ok(())
}
