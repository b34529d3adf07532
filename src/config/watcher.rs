//! Route file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{compile_route_file, load_route_file, ConfigError};
use crate::config::schema::MediatorConfig;
use crate::routing::{RouteTable, SharedRouteTable};

/// Monitors a route file and swaps the live route table on change.
pub struct RouteWatcher {
    path: PathBuf,
    config: Arc<MediatorConfig>,
    routes: SharedRouteTable,
    update_tx: mpsc::UnboundedSender<usize>,
}

impl RouteWatcher {
    /// Create a watcher for `path`.
    ///
    /// Returns the watcher and a receiver that yields the route count after
    /// every successful reload.
    pub fn new(
        path: &Path,
        config: Arc<MediatorConfig>,
        routes: SharedRouteTable,
    ) -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                config,
                routes,
                update_tx,
            },
            update_rx,
        )
    }

    /// Reload once. On failure the current table stays in place.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        reload_into(&self.path, &self.config, &self.routes)
    }

    /// Start watching the file in a background thread.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let config = self.config.clone();
        let routes = self.routes.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Route file change detected, reloading");
                        match reload_into(&path, &config, &routes) {
                            Ok(count) => {
                                let _ = tx.send(count);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload routes, keeping current table");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Route watcher started");
        Ok(watcher)
    }
}

fn reload_into(
    path: &Path,
    config: &MediatorConfig,
    routes: &SharedRouteTable,
) -> Result<usize, ConfigError> {
    let file = load_route_file(path)?;
    let table: RouteTable = compile_route_file(config, &file)?;
    let count = table.len();
    routes.store(Arc::new(table));
    tracing::info!(routes = count, "Route table swapped");
    Ok(count)
}
