//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (result purge, route watcher, session sweep)
//! - Bind the ingress listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Workers start before the ingress (traffic only when ready)
//! - Shutdown order: ingress stops accepting, workers drain, then exit

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::loader::{build_route_table, ConfigError};
use crate::config::schema::MediatorConfig;
use crate::config::validation::{validate_config, validate_in_process};
use crate::config::watcher::RouteWatcher;
use crate::dispatch::{CustomHandler, Dispatcher, EchoHandler};
use crate::error::DispatchError;
use crate::http::IngressServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::{logging, metrics};
use crate::partition::PartitionStats;
use crate::queue::{InMemoryQueue, QueueError};
use crate::results::{InMemoryResultStore, ResultStore};
use crate::routing::{self, SharedRouteTable};
use crate::worker::WorkerPool;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to bind ingress listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// A rebalance that would hand partitions to slots this process does not run.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot rebalance to {requested} workers: {local} worker slots run in this process")]
pub struct RebalanceError {
    pub requested: usize,
    pub local: usize,
}

/// Knobs that are not part of the file configuration.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Serve the ingress API.
    pub ingress: bool,
    /// Install the tracing subscriber and metrics exporter.
    pub telemetry: bool,
    /// Handler used when HTTP dispatch is disabled; [`EchoHandler`] when unset.
    pub handler: Option<Arc<dyn CustomHandler>>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            ingress: true,
            telemetry: true,
            handler: None,
        }
    }
}

/// A running mediator process.
pub struct Mediator {
    config: Arc<MediatorConfig>,
    queue: Arc<InMemoryQueue>,
    results: Arc<InMemoryResultStore>,
    routes: SharedRouteTable,
    pool: WorkerPool,
    shutdown: Shutdown,
    ingress_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Mediator {
    pub async fn start(config: MediatorConfig, options: StartOptions) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        validate_in_process(&config).map_err(ConfigError::Validation)?;
        let config = Arc::new(config);

        if options.telemetry {
            logging::init_logging(&config.observability);
            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => metrics::init_metrics(addr),
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }
        }

        let routes = routing::shared(build_route_table(&config)?);
        tracing::info!(
            routes = routes.load().len(),
            routing_enabled = config.routing.enabled,
            proxy_enabled = config.proxy.enabled,
            "Route table loaded"
        );

        let mut tasks = Vec::new();
        let watcher = match (&config.routing.config_path, config.routing.enabled && config.routing.watch) {
            (Some(path), true) => {
                let (watcher, mut updates) = RouteWatcher::new(path, config.clone(), routes.clone());
                match watcher.run() {
                    Ok(handle) => {
                        tasks.push(tokio::spawn(async move {
                            while let Some(count) = updates.recv().await {
                                tracing::info!(routes = count, "Routes reloaded");
                            }
                        }));
                        Some(handle)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Route watcher failed to start, hot reload disabled");
                        None
                    }
                }
            }
            _ => None,
        };

        let mut dispatcher = Dispatcher::new(&config, routes.clone())?;
        if !config.proxy.enabled {
            let handler = options
                .handler
                .clone()
                .unwrap_or_else(|| Arc::new(EchoHandler));
            dispatcher = dispatcher.with_handler(handler);
        }

        let queue = Arc::new(InMemoryQueue::with_retention(config.queue.max_unconsumed));
        let results = Arc::new(InMemoryResultStore::new(Duration::from_secs(
            config.results.ttl_secs,
        )));
        let shutdown = Shutdown::new();

        let pool = WorkerPool::start(
            &config,
            queue.clone(),
            results.clone(),
            Arc::new(dispatcher),
            &shutdown,
        )
        .await?;

        tasks.push(tokio::spawn(purge_results(
            results.clone(),
            Duration::from_secs(config.results.purge_interval_secs.max(1)),
            shutdown.subscribe(),
        )));

        let mut ingress_addr = None;
        if options.ingress && config.listener.enabled {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            let addr = listener.local_addr()?;
            ingress_addr = Some(addr);

            let server = IngressServer::new(&config, queue.clone(), results.clone());
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(listener, rx).await {
                    tracing::error!(error = %e, "Ingress server failed");
                }
            }));
        }

        tracing::info!(
            workers = config.worker.count,
            ingress = ?ingress_addr,
            "queue-mediator started"
        );

        Ok(Self {
            config,
            queue,
            results,
            routes,
            pool,
            shutdown,
            ingress_addr,
            tasks,
            _watcher: watcher,
        })
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<InMemoryQueue> {
        self.queue.clone()
    }

    pub fn results(&self) -> Arc<InMemoryResultStore> {
        self.results.clone()
    }

    pub fn routes(&self) -> &SharedRouteTable {
        &self.routes
    }

    /// Bound ingress address, when the ingress is running.
    pub fn ingress_addr(&self) -> Option<SocketAddr> {
        self.ingress_addr
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn partition_stats(&self) -> Vec<PartitionStats> {
        self.pool.stats()
    }

    /// Spread partitions over the first `worker_count` local slots.
    pub fn rebalance(&self, worker_count: usize) -> Result<(), RebalanceError> {
        let local = self.pool.indices().len();
        if worker_count == 0 || worker_count > local {
            return Err(RebalanceError {
                requested: worker_count,
                local,
            });
        }
        self.pool.rebalance(worker_count);
        Ok(())
    }

    /// Wait until shutdown is triggered and every task has stopped.
    pub async fn wait(self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.recv().await;
        self.drain().await;
    }

    /// Trigger shutdown and wait for every task to stop.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.drain().await;
    }

    async fn drain(self) {
        self.pool.join().await;
        for task in self.tasks {
            // The route watcher's update loop only ends with the watcher.
            if task.is_finished() {
                let _ = task.await;
            } else {
                task.abort();
            }
        }
        tracing::info!("Shutdown complete");
    }
}

async fn purge_results(
    results: Arc<InMemoryResultStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let removed = results.purge_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Expired results purged");
                }
            }
        }
    }
}
