//! queue-mediator
//!
//! An asynchronous request/response mediator: messages are accepted over
//! HTTP, queued, routed by content, optionally transformed, pinned to a
//! partition owner, and dispatched to HTTP endpoints or a custom handler.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────────┐
//!                         │                     QUEUE MEDIATOR                        │
//!                         │                                                           │
//!   POST /api/v1/submit   │  ┌─────────┐    ┌───────────────┐    ┌─────────────────┐  │
//!   ──────────────────────┼─▶│  http   │───▶│ request queue │───▶│  worker pool    │  │
//!                         │  │ ingress │    └───────────────┘    │ (N slots)       │  │
//!                         │  └────┬────┘                         └────────┬────────┘  │
//!                         │       │                                       ▼           │
//!                         │       │        ┌─────────┐  ┌───────────┐  ┌──────────┐   │
//!                         │       │        │ routing │─▶│ partition │─▶│transform │   │
//!                         │       │        └─────────┘  └───────────┘  └────┬─────┘   │
//!                         │       │                                         ▼         │
//!   GET /api/v1/response  │  ┌────┴─────────┐   ┌──────────────┐     ┌────────────┐   │
//!   ◀─────────────────────┼──│ result store │◀──│ worker       │◀────│ dispatch   │◀──┼── Endpoint /
//!                         │  └──────────────┘   │ retry / DLQ  │     │ HTTP/handler│  │   handler
//!                         │                     └──────────────┘     └────────────┘   │
//!                         │                                                           │
//!                         │  Cross-cutting: config (+ route hot reload), observability,│
//!                         │  resilience (timeouts, backoff), lifecycle                 │
//!                         └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use queue_mediator::config::loader::load_config;
use queue_mediator::lifecycle::signals::wait_for_signal;
use queue_mediator::{Mediator, MediatorConfig, StartOptions};

#[derive(Parser)]
#[command(name = "queue-mediator")]
#[command(about = "Asynchronous request/response mediator", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override worker.count
    #[arg(short, long)]
    worker_count: Option<usize>,

    /// Run workers only, without the ingress API
    #[arg(long)]
    no_ingress: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => MediatorConfig::default(),
    };
    if let Some(count) = args.worker_count {
        config.worker.count = count;
    }

    let options = StartOptions {
        ingress: !args.no_ingress,
        ..StartOptions::default()
    };
    let mediator = Mediator::start(config, options).await?;

    tracing::info!(
        config = ?args.config,
        ingress = ?mediator.ingress_addr(),
        "Configuration loaded"
    );

    tokio::spawn(wait_for_signal(mediator.shutdown_handle()));
    mediator.wait().await;
    Ok(())
}
