//! Worker pool: spawns one task per worker slot and supervises them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::schema::MediatorConfig;
use crate::dispatch::Dispatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::partition::{PartitionAssigner, PartitionStats};
use crate::queue::{MessageQueue, QueueError};
use crate::results::ResultStore;
use crate::worker::runtime::{Worker, WorkerSettings};

/// Consumer group of worker slot `index`.
///
/// Partitioned workers each read the whole stream through their own group
/// and filter by ownership; unpartitioned workers share one group.
pub fn consumer_group(base: &str, index: usize, partitioned: bool) -> String {
    if partitioned {
        format!("{}-{}", base, index)
    } else {
        base.to_string()
    }
}

/// Running worker slots of this process.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    assigners: Vec<Arc<PartitionAssigner>>,
    indices: Vec<usize>,
}

impl WorkerPool {
    /// Register consumer groups, then spawn every worker slot.
    pub async fn start(
        config: &MediatorConfig,
        queue: Arc<dyn MessageQueue>,
        results: Arc<dyn ResultStore>,
        dispatcher: Arc<Dispatcher>,
        shutdown: &Shutdown,
    ) -> Result<Self, QueueError> {
        let partitioned = config.partitioning.enabled;
        let total = config.worker.total_workers();
        let settings = WorkerSettings::from_config(config);
        let indices: Vec<usize> = (0..config.worker.count)
            .map(|i| config.worker.index_offset + i)
            .collect();

        // Groups must exist before any message is published and trimmed.
        for &index in &indices {
            let group = consumer_group(&config.queue.consumer_group, index, partitioned);
            queue
                .create_group(&settings.request_queue, &group)
                .await?;
        }

        let mut handles = Vec::with_capacity(indices.len());
        let mut assigners = Vec::new();

        for &index in &indices {
            let assigner = partitioned
                .then(|| Arc::new(PartitionAssigner::new(&config.partitioning, index, total)));
            if let Some(assigner) = &assigner {
                assigners.push(assigner.clone());
            }

            let worker = Worker::new(
                index,
                consumer_group(&config.queue.consumer_group, index, partitioned),
                queue.clone(),
                results.clone(),
                dispatcher.clone(),
                assigner,
                settings.clone(),
            );
            handles.push(tokio::spawn(worker.run(shutdown.subscribe())));
        }

        if !assigners.is_empty() {
            let interval = Duration::from_secs(config.partitioning.sweep_interval_secs.max(1));
            handles.push(tokio::spawn(sweep_sessions(
                assigners.clone(),
                interval,
                shutdown.subscribe(),
            )));
        }

        tracing::info!(
            workers = indices.len(),
            total_workers = total,
            partitioned,
            "Worker pool started"
        );

        Ok(Self {
            handles,
            assigners,
            indices,
        })
    }

    /// Global indices of the local worker slots.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Partition statistics per local worker (empty when unpartitioned).
    pub fn stats(&self) -> Vec<PartitionStats> {
        self.assigners.iter().map(|a| a.stats()).collect()
    }

    /// Recompute partition ownership for a new global worker count.
    pub fn rebalance(&self, worker_count: usize) {
        for assigner in &self.assigners {
            assigner.reassign(worker_count);
        }
        tracing::info!(worker_count, "Partitions rebalanced");
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn sweep_sessions(
    assigners: Vec<Arc<PartitionAssigner>>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                for assigner in &assigners {
                    let removed = assigner.sweep_sessions();
                    if removed > 0 {
                        tracing::debug!(worker = assigner.worker_index(), removed, "Expired sessions swept");
                    }
                    metrics::set_active_sessions(assigner.worker_index(), assigner.sessions().len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EchoHandler;
    use crate::message::Message;
    use crate::queue::InMemoryQueue;
    use crate::results::InMemoryResultStore;
    use crate::routing::{self, RouteTable};
    use serde_json::json;

    #[test]
    fn test_consumer_group_naming() {
        assert_eq!(consumer_group("workers", 3, true), "workers-3");
        assert_eq!(consumer_group("workers", 3, false), "workers");
    }

    #[tokio::test]
    async fn test_partitioned_pool_processes_each_message_once() {
        let mut config = MediatorConfig::default();
        config.worker.count = 3;
        config.queue.receive_wait_ms = 50;
        config.partitioning.enabled = true;
        config.partitioning.partition_count = 6;

        let queue = InMemoryQueue::shared();
        let results = Arc::new(InMemoryResultStore::default());
        let dispatcher = Arc::new(
            Dispatcher::new(&config, routing::shared(RouteTable::default()))
                .unwrap()
                .with_handler(Arc::new(EchoHandler)),
        );
        let shutdown = Shutdown::new();

        let pool = WorkerPool::start(&config, queue.clone(), results.clone(), dispatcher, &shutdown)
            .await
            .unwrap();
        assert_eq!(pool.indices(), &[0, 1, 2]);

        for i in 0..30 {
            let msg = Message::with_id(format!("m-{}", i), json!({"operation": "echo", "data": i}))
                .with_metadata("partition_key", format!("user-{}", i % 7));
            queue.publish("mediator-requests", msg).await.unwrap();
        }

        let mut done = 0;
        for _ in 0..200 {
            done = 0;
            for i in 0..30 {
                if results.get(&format!("m-{}", i)).await.unwrap().is_some() {
                    done += 1;
                }
            }
            if done == 30 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(done, 30);

        let handled: u64 = pool.stats().iter().map(|s| s.total_messages).sum();
        assert_eq!(handled, 30);
        assert_eq!(queue.snapshot("mediator-responses").len(), 30);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .unwrap();
    }
}
