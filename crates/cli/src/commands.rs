// Subcommand implementations

use anyhow::{Context, Result};
use colored::Colorize;
use conveyor_core::application::{shutdown_all, QueueManager};
use conveyor_core::domain::{Backoff, DispatchOptions, DEFAULT_QUEUE};
use std::collections::BTreeSet;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::info;

pub async fn listen(manager: &QueueManager, queues: &[String]) -> Result<()> {
    let workers = manager.listen(queues).await?;

    let names: Vec<&str> = workers.iter().map(|w| w.queue_name()).collect();
    println!(
        "{} {}",
        "✓ Listening on".green().bold(),
        names.join(", ").bold()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutdown signal received, stopping workers");
    shutdown_all(workers).await;
    println!("{}", "✓ Workers stopped".green());
    Ok(())
}

pub struct DispatchRequest {
    pub job: String,
    pub payload: String,
    pub queue: Option<String>,
    pub attempts: Option<u32>,
    pub delay: Option<u64>,
    pub priority: Option<u32>,
    pub backoff: Option<u64>,
    pub exponential: bool,
    pub wait: bool,
    pub timeout_ms: Option<u64>,
}

impl DispatchRequest {
    fn options(&self) -> DispatchOptions {
        let mut options = DispatchOptions {
            queue_name: self.queue.clone(),
            ..Default::default()
        };
        options.job.attempts = self.attempts;
        options.job.delay = self.delay;
        options.job.priority = self.priority;
        options.job.backoff = self.backoff.map(|delay| {
            if self.exponential {
                Backoff::exponential(delay)
            } else {
                Backoff::fixed(delay)
            }
        });
        options
    }
}

#[derive(Tabled)]
struct DispatchedRow {
    id: String,
    queue: String,
    name: String,
    state: String,
}

pub async fn dispatch(manager: &QueueManager, request: DispatchRequest) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&request.payload).context("Payload is not valid JSON")?;

    let job = manager
        .dispatch(request.job.as_str(), payload, request.options())
        .await?;

    println!("{}", "✓ Job dispatched".green().bold());
    let row = DispatchedRow {
        id: job.id().clone(),
        queue: job.queue_name().to_string(),
        name: job.name().to_string(),
        state: job.job().state.to_string(),
    };
    println!("{}", Table::new(vec![row]));

    if request.wait {
        let timeout = request.timeout_ms.map(Duration::from_millis);
        let result = manager.wait_until_finished(&job, None, timeout).await?;
        println!("{}", "✓ Job finished".green().bold());
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

pub async fn clear(manager: &QueueManager, queue: Option<&str>) -> Result<()> {
    let name = queue.unwrap_or(DEFAULT_QUEUE);
    // A fresh process only knows the default queue
    manager.get_or_create(name).await?;

    if manager.clear(Some(name)).await? {
        println!("{} {}", "✓ Cleared queue".green().bold(), name.bold());
    } else {
        println!("{} {}", "Queue doesn't exist:".yellow(), name);
    }
    Ok(())
}

#[derive(Tabled)]
struct CountsRow {
    queue: String,
    waiting: u64,
    delayed: u64,
    active: u64,
    completed: u64,
    failed: u64,
}

pub async fn queues(manager: &QueueManager, extra: &[String]) -> Result<()> {
    let names: BTreeSet<String> = manager
        .config()
        .listen_targets(&[])
        .into_iter()
        .chain(extra.iter().cloned())
        .collect();

    for name in &names {
        manager.get_or_create(name).await?;
    }

    let mut rows = Vec::new();
    for name in manager.list().await.into_keys() {
        let counts = manager.counts(&name).await?;
        rows.push(CountsRow {
            queue: name,
            waiting: counts.waiting,
            delayed: counts.delayed,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
        });
    }

    println!("{}", Table::new(rows));
    Ok(())
}
