//! Queue abstraction.
//!
//! # Responsibilities
//! - Publish messages (immediately or after a delay)
//! - Deliver batches to consumer groups with at-least-once semantics
//! - Acknowledge, reject and release in-flight deliveries
//!
//! # Design Decisions
//! - Every consumer group sees every message; consumers within a group compete
//! - A delivery carries the queue-assigned sequence and its attempt number,
//!   so redeliveries are visible to the worker
//! - Unacknowledged deliveries are never lost: `release` puts them back

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

pub use memory::InMemoryQueue;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue '{0}' is closed")]
    Closed(String),

    #[error("delivery {delivery_id} is not in flight for group '{group}' on '{queue}'")]
    UnknownDelivery {
        queue: String,
        group: String,
        delivery_id: u64,
    },
}

/// One message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Handle for acknowledge / reject.
    pub delivery_id: u64,
    /// Position of the message in the queue, assigned at publish.
    pub sequence: u64,
    /// 1 on first delivery to this group, incremented on every redelivery.
    pub attempt: u32,
    pub message: Message,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync + std::fmt::Debug {
    /// Register `group` so it sees every message retained from now on. Idempotent.
    async fn create_group(&self, queue: &str, group: &str) -> Result<(), QueueError>;

    /// Append a message; returns its sequence number.
    async fn publish(&self, queue: &str, message: Message) -> Result<u64, QueueError>;

    /// Make a message visible after `delay`.
    async fn publish_delayed(
        &self,
        queue: &str,
        message: Message,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Up to `max` deliveries for `group`, waiting at most `wait` for the first one.
    async fn receive(
        &self,
        queue: &str,
        group: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    async fn acknowledge(&self, queue: &str, group: &str, delivery_id: u64)
        -> Result<(), QueueError>;

    /// Drop a delivery, or hand it back to the group when `requeue` is set.
    async fn reject(
        &self,
        queue: &str,
        group: &str,
        delivery_id: u64,
        requeue: bool,
    ) -> Result<(), QueueError>;

    /// Return every in-flight delivery of `group` to the queue. Returns the count.
    async fn release(&self, queue: &str, group: &str) -> Result<usize, QueueError>;

    /// Messages not yet consumed by the slowest group, including delayed ones.
    async fn depth(&self, queue: &str) -> usize;
}
