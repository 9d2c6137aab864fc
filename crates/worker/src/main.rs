//! HydraAI Worker - Main Entry Point
//!
//! Trains the shared model on coordinator tasks in exchange for tokens, and
//! spends tokens on model queries.

use clap::{Parser, Subcommand};
use hydra_common::{BigramModel, HydraConfig, HydraError, Result};
use hydra_worker::{AgentSettings, CoordinatorClient, LocalTrainer, WorkerAgent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// HydraAI training worker
#[derive(Parser)]
#[command(name = "hydra-worker")]
#[command(about = "Earn tokens by training the HydraAI model", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "HYDRA_CONFIG", default_value = "configs/worker-config.yaml")]
    config: PathBuf,

    /// Worker identifier (overrides the config file)
    #[arg(long, env = "HYDRA_WORKER_ID")]
    worker_id: Option<String>,

    /// Coordinator base URL (overrides the config file)
    #[arg(long, env = "HYDRA_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    /// Named model preset: default, slow_computer or fast_training
    #[arg(long)]
    preset: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, train and submit tasks until stopped (default)
    Work {
        /// Stop after this many completed tasks
        #[arg(long)]
        max_tasks: Option<usize>,
    },

    /// Show the account balance
    Balance,

    /// Spend tokens on a model query
    Query {
        /// Prompt text
        prompt: String,
    },

    /// List the account's token transactions
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydra_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = HydraConfig::load(&cli.config, HydraConfig::worker_default())?;
    if let Some(preset) = &cli.preset {
        config.model = hydra_common::config::ModelConfig::preset(preset)?;
    }

    let mut worker_config = config.worker()?.clone();
    if let Some(url) = cli.coordinator_url {
        worker_config.coordinator_url = url;
    }
    let worker_id = cli
        .worker_id
        .or_else(|| worker_config.worker_id.clone())
        .unwrap_or_else(random_worker_id);

    if worker_id.trim().is_empty() {
        return Err(HydraError::config("worker_id must not be empty"));
    }

    info!(
        "Worker {} using coordinator {}",
        worker_id, worker_config.coordinator_url
    );

    let client = CoordinatorClient::new(
        worker_config.coordinator_url.clone(),
        worker_config.timeouts.clone(),
    )?;

    match cli.command.unwrap_or(Commands::Work { max_tasks: None }) {
        Commands::Work { max_tasks } => {
            if max_tasks.is_some() {
                worker_config.max_tasks = max_tasks;
            }

            let model = Arc::new(BigramModel::new(config.model.clone()));
            let trainer = LocalTrainer::from_config(model, &worker_config);
            let settings = AgentSettings::from_config(&worker_config);
            let mut agent = WorkerAgent::new(worker_id, client, trainer, settings);

            let shutdown = async {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Received shutdown signal");
            };

            let stats = agent.run(shutdown).await?;
            info!(
                "HydraAI Worker shutdown complete ({} tasks this session)",
                stats.tasks_completed
            );
        }
        Commands::Balance => {
            let balance = client.balance(&worker_id).await?;
            println!("Worker:          {}", balance.worker_id);
            println!("Balance:         {} tokens", balance.balance);
            println!("Tasks completed: {}", balance.tasks_completed);
            println!("Member since:    {}", balance.member_since);
        }
        Commands::Query { prompt } => {
            let answer = client.query(&worker_id, &prompt).await?;
            println!("{}", answer.response);
            println!();
            println!("Cost: {} tokens, remaining balance: {}", answer.cost, answer.new_balance);
        }
        Commands::History => {
            let history = client.transactions(&worker_id).await?;
            for tx in history.transactions {
                println!("{}  {:>8.2}  {:<7} {}", tx.timestamp, tx.delta, tx.kind, tx.reason);
            }
        }
    }

    Ok(())
}

fn random_worker_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}
