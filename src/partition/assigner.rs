//! Partition assignment.
//!
//! # Responsibilities
//! - Map a partition key (or delivery sequence) to a partition id
//! - Decide whether this worker owns that partition
//! - Track sticky sessions and expose assignment stats
//! - Recompute ownership when the declared worker count changes
//!
//! # Design Decisions
//! - Static, config-driven table: no membership protocol
//! - SHA-256 based hash so every process agrees on placement
//! - Ownership set swapped atomically on rebalance (ArcSwap), readers never block
//! - ROUND_ROBIN rotates by the queue's delivery sequence so that every
//!   worker reaches the same verdict for the same delivery

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::schema::{AssignmentScheme, PartitionStrategy, PartitioningConfig};
use crate::partition::sessions::SessionTable;

/// `SHA-256(key)` read as a big-endian integer, modulo `count`.
pub fn stable_hash(key: &str, count: u32) -> u32 {
    let count = u128::from(count.max(1));
    let digest = Sha256::digest(key.as_bytes());
    let rem = digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + u128::from(*byte)) % count);
    rem as u32
}

/// Worker index owning `partition_id` under `scheme`.
pub fn owner_of(
    scheme: AssignmentScheme,
    partition_id: u32,
    partition_count: u32,
    worker_count: usize,
) -> usize {
    let workers = worker_count.max(1) as u64;
    match scheme {
        AssignmentScheme::Modulo => (u64::from(partition_id) % workers) as usize,
        AssignmentScheme::ContiguousRange => {
            let partitions = u64::from(partition_count.max(1));
            (u64::from(partition_id) * workers / partitions) as usize
        }
    }
}

/// Partitions owned by `worker_index`.
pub fn partitions_for_worker(
    scheme: AssignmentScheme,
    partition_count: u32,
    worker_index: usize,
    worker_count: usize,
) -> BTreeSet<u32> {
    (0..partition_count)
        .filter(|pid| owner_of(scheme, *pid, partition_count, worker_count) == worker_index)
        .collect()
}

/// Ownership verdict for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionDecision {
    Owned { partition_id: u32 },
    NotOwned { partition_id: u32, owner: usize },
    /// The strategy needs a key and the message has none.
    MissingKey,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub worker_index: usize,
    pub worker_count: usize,
    pub active_sessions: usize,
    pub assigned_partitions: usize,
    pub partition_ids: Vec<u32>,
    pub total_messages: u64,
}

#[derive(Debug)]
struct Assignment {
    worker_count: usize,
    owned: BTreeSet<u32>,
}

/// Per-worker view of the partition table.
#[derive(Debug)]
pub struct PartitionAssigner {
    strategy: PartitionStrategy,
    scheme: AssignmentScheme,
    partition_count: u32,
    worker_index: usize,
    assignment: ArcSwap<Assignment>,
    sessions: SessionTable,
    total_messages: AtomicU64,
}

impl PartitionAssigner {
    pub fn new(config: &PartitioningConfig, worker_index: usize, worker_count: usize) -> Self {
        let partition_count = config.partition_count.max(1);
        let owned =
            partitions_for_worker(config.assignment, partition_count, worker_index, worker_count);
        Self {
            strategy: config.strategy,
            scheme: config.assignment,
            partition_count,
            worker_index,
            assignment: ArcSwap::from_pointee(Assignment {
                worker_count: worker_count.max(1),
                owned,
            }),
            sessions: SessionTable::new(config.sticky_session_ttl, config.max_sessions),
            total_messages: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> PartitionStrategy {
        self.strategy
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn worker_count(&self) -> usize {
        self.assignment.load().worker_count
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Recompute ownership for a new declared worker count.
    pub fn reassign(&self, worker_count: usize) {
        let owned = partitions_for_worker(
            self.scheme,
            self.partition_count,
            self.worker_index,
            worker_count,
        );
        tracing::info!(
            worker_index = self.worker_index,
            worker_count,
            partitions = ?owned,
            "Partition ownership recomputed"
        );
        self.assignment.store(Arc::new(Assignment {
            worker_count: worker_count.max(1),
            owned,
        }));
    }

    /// Pin this worker to an explicit set of partitions.
    pub fn set_assigned_partitions(&self, partitions: impl IntoIterator<Item = u32>) {
        let current = self.assignment.load();
        let owned = partitions
            .into_iter()
            .filter(|pid| *pid < self.partition_count)
            .collect();
        self.assignment.store(Arc::new(Assignment {
            worker_count: current.worker_count,
            owned,
        }));
    }

    /// Partition for a key under the configured strategy. `sequence` only
    /// matters for ROUND_ROBIN.
    pub fn partition_for(&self, key: Option<&str>, sequence: u64) -> Option<u32> {
        match self.strategy {
            PartitionStrategy::RoundRobin => Some((sequence % u64::from(self.partition_count)) as u32),
            PartitionStrategy::Sticky => {
                let key = key?;
                Some(
                    self.sessions
                        .get(key)
                        .unwrap_or_else(|| stable_hash(key, self.partition_count)),
                )
            }
            PartitionStrategy::Hash => key.map(|k| stable_hash(k, self.partition_count)),
            PartitionStrategy::Key => key.map(|k| match k.trim().parse::<u64>() {
                Ok(n) => (n % u64::from(self.partition_count)) as u32,
                Err(_) => stable_hash(k, self.partition_count),
            }),
        }
    }

    pub fn owns_partition_id(&self, partition_id: u32) -> bool {
        self.assignment.load().owned.contains(&partition_id)
    }

    /// Whether this worker owns the partition `key` maps to.
    pub fn owns_partition(&self, key: &str) -> bool {
        self.partition_for(Some(key), 0)
            .map(|pid| self.owns_partition_id(pid))
            .unwrap_or(false)
    }

    /// Ownership verdict for one delivery.
    pub fn decide(&self, key: Option<&str>, sequence: u64) -> PartitionDecision {
        let Some(partition_id) = self.partition_for(key, sequence) else {
            return PartitionDecision::MissingKey;
        };
        let assignment = self.assignment.load();
        if assignment.owned.contains(&partition_id) {
            PartitionDecision::Owned { partition_id }
        } else {
            PartitionDecision::NotOwned {
                partition_id,
                owner: owner_of(
                    self.scheme,
                    partition_id,
                    self.partition_count,
                    assignment.worker_count,
                ),
            }
        }
    }

    /// Record that this worker processed a message for `key`.
    pub fn touch(&self, key: &str, partition_id: u32) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        if self.strategy == PartitionStrategy::Sticky {
            self.sessions.touch(key, partition_id);
        }
    }

    /// Count a processed message that carried no key.
    pub fn record_unkeyed(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweep_sessions(&self) -> usize {
        self.sessions.sweep_expired()
    }

    pub fn stats(&self) -> PartitionStats {
        let assignment = self.assignment.load();
        PartitionStats {
            worker_index: self.worker_index,
            worker_count: assignment.worker_count,
            active_sessions: self.sessions.len(),
            assigned_partitions: assignment.owned.len(),
            partition_ids: assignment.owned.iter().copied().collect(),
            total_messages: self.total_messages.load(Ordering::Relaxed),
        }
    }
}
