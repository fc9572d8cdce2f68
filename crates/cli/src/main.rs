// Conveyor CLI - worker host, producer and queue administration

mod commands;
mod handlers;
mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conveyor_core::application::QueueManager;
use conveyor_infra_sqlite::SqliteBroker;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor - named job queues on SQLite", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./conveyor.toml when present)
    #[arg(short, long, global = true, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers until Ctrl+C
    Listen {
        /// Queues to process (repeatable); defaults to the configured queues
        #[arg(short, long = "queue")]
        queues: Vec<String>,
    },

    /// Enqueue a job
    Dispatch {
        /// Job name, e.g. echo or exec
        job: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Target queue
        #[arg(short, long)]
        queue: Option<String>,

        #[arg(long)]
        attempts: Option<u32>,

        /// Delay in milliseconds
        #[arg(long)]
        delay: Option<u64>,

        #[arg(long)]
        priority: Option<u32>,

        /// Fixed backoff between attempts in milliseconds
        #[arg(long)]
        backoff: Option<u64>,

        /// Use exponential instead of fixed backoff
        #[arg(long, requires = "backoff")]
        exponential: bool,

        /// Block until a worker finishes the job and print its result
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many milliseconds
        #[arg(long, requires = "wait")]
        timeout_ms: Option<u64>,
    },

    /// Remove a queue and every job in it
    Clear {
        /// Queue to clear (default: "default")
        queue: Option<String>,
    },

    /// Show job counts per queue
    Queues {
        /// Extra queues to include besides the configured ones
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = settings::load(cli.config.as_deref())?;
    settings::ensure_database_dir(&config.connection.database_url)?;

    let broker = SqliteBroker::connect(&config.connection.database_url)
        .await
        .context("Failed to open the queue database")?;

    let manager = QueueManager::new(
        Arc::new(broker),
        Arc::new(handlers::builtin_handlers()),
        config,
    )
    .await
    .context("Failed to initialise queues")?;

    match cli.command {
        Commands::Listen { queues } => commands::listen(&manager, &queues).await,
        Commands::Dispatch {
            job,
            payload,
            queue,
            attempts,
            delay,
            priority,
            backoff,
            exponential,
            wait,
            timeout_ms,
        } => {
            let request = commands::DispatchRequest {
                job,
                payload,
                queue,
                attempts,
                delay,
                priority,
                backoff,
                exponential,
                wait,
                timeout_ms,
            };
            commands::dispatch(&manager, request).await
        }
        Commands::Clear { queue } => commands::clear(&manager, queue.as_deref()).await,
        Commands::Queues { names } => commands::queues(&manager, &names).await,
    }
}
