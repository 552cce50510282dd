//! Reprise relay CLI
//!
//! Supervises a preemptible worker, forwards scheduler termination signals,
//! and offers operational views over the checkpoint root.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reprise_config::{RelaySettings, SchedulerIds};
use reprise_coordinator::store::run_ids;
use reprise_coordinator::{SnapshotStore, describe_lineage};
use reprise_relay::Supervisor;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "reprise-relay",
    about = "Preemption relay: supervise a worker and keep its checkpoint lineage resumable"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch and supervise a worker process
    Run {
        /// Path to a relay.toml settings file
        #[arg(short, long)]
        config: Option<String>,

        /// Worker command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        worker: Vec<String>,
    },

    /// List run lineages under a checkpoint root
    Status {
        /// Checkpoint root directory
        #[arg(short, long, default_value = "./checkpoints")]
        root: String,
    },

    /// Remove all snapshots of the given run lineages
    Clean {
        /// Checkpoint root directory
        #[arg(short, long, default_value = "./checkpoints")]
        root: String,

        /// Run ids to clean
        #[arg(required = true)]
        run_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, worker } => {
            let settings = match config {
                Some(path) => RelaySettings::load(path)?,
                None => RelaySettings::default(),
            };
            let code = Supervisor::new(settings, worker).run().await?;
            std::process::exit(code);
        }

        Commands::Status { root } => {
            let root = PathBuf::from(root);
            let run_ids = run_ids(&root)?;
            if run_ids.is_empty() {
                println!("No snapshots under {}", root.display());
                return Ok(());
            }

            let store = SnapshotStore::new(&root, SchedulerIds::from_env().partition_name());
            for run_id in run_ids {
                let summary = describe_lineage(&store, &run_id)?;
                match summary.latest {
                    Some(latest) => println!(
                        "{run_id}: sequence {} ({} resumes{}{})",
                        latest.sequence,
                        latest.resumes,
                        if latest.terminal { ", preempted" } else { "" },
                        if summary.sequences.len() > 1 {
                            ", prune pending"
                        } else {
                            ""
                        },
                    ),
                    None => println!(
                        "{run_id}: {} snapshots, none loadable",
                        summary.sequences.len()
                    ),
                }
            }
        }

        Commands::Clean { root, run_ids } => {
            let store = SnapshotStore::new(
                PathBuf::from(root),
                SchedulerIds::from_env().partition_name(),
            );
            for run_id in &run_ids {
                let sequences = store.list(run_id)?;
                for sequence in &sequences {
                    store.delete(run_id, *sequence)?;
                }
                println!("{run_id}: removed {} snapshots", sequences.len());
            }
        }
    }

    Ok(())
}
