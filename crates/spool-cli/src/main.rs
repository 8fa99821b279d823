//! spool デモ CLI
//!
//! シミュレーション worker を登録した queue を起動し、task を投入して
//! すべて決着するか ctrl-c まで待ち、最後に一覧と集計を JSON で出力する。

mod cli;
mod simulated;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use spool_core::app::{QueueBuilder, QueueConfig};
use spool_core::domain::TaskStatus;
use spool_core::ports::ListFilter;

use crate::cli::{CliArgs, Command, DemoArgs};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => QueueConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => QueueConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    match args.command {
        Command::Config => print!("{}", config.to_toml()?),
        Command::Demo(demo) => run_demo(config, demo).await?,
    }
    Ok(())
}

async fn run_demo(config: QueueConfig, demo: DemoArgs) -> Result<()> {
    let app = simulated::register(QueueBuilder::new().config(config), demo.scale)?
        .expect_types(&simulated::simulated_types())
        .build()
        .context("failed to build queue")?;
    let running = app.start();
    let queue = app.queue();

    let mut ids = Vec::with_capacity(demo.types.len());
    for (i, task_type) in demo.types.iter().enumerate() {
        let task = queue
            .enqueue(format!("{task_type} #{i}"), task_type.as_str(), demo.max_retries)
            .await?;
        ids.push(task.id);
    }

    if demo.delete_first
        && let Some(&first) = ids.first()
    {
        while queue.get(first).await?.status == TaskStatus::Pending {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let task = queue.delete(first).await?;
        info!(task_id = %first, status = %task.status, "deleted first task");
    }

    // 全 task の決着か ctrl-c まで待つ
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let counts = queue.counts().await?;
        if counts.outstanding() == 0 {
            break;
        }
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("failed to listen for ctrl-c")?;
                warn!(pending = counts.pending, running = counts.running, "interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }

    let drained = running.shutdown().await;

    let page = queue.list_page(&ListFilter::default()).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    let counts = queue.counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);

    for id in ids {
        let task = queue.get(id).await?;
        if let Some(err) = task.last_error() {
            info!(task_id = %id, status = %task.status, attempts = task.attempts, last_error = err, "task summary");
        }
    }
    if !drained {
        warn!("some executions were cancelled at shutdown");
    }
    Ok(())
}
