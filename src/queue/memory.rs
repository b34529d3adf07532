//! In-process queue with consumer groups.
//!
//! Each named queue is an append-only log. A consumer group keeps a cursor
//! into the log plus its own redelivery and in-flight sets; the log prefix
//! that every group has read is trimmed. A group created late starts from
//! the oldest retained entry. Queues nobody consumes from (responses, dead
//! letters) keep at most the retention limit, oldest entries dropped first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::message::Message;
use crate::queue::{Delivery, MessageQueue, QueueError};

#[derive(Debug, Clone)]
struct Entry {
    sequence: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Next sequence to read from the log.
    cursor: u64,
    redeliver: VecDeque<(Entry, u32)>,
    in_flight: HashMap<u64, (Entry, u32)>,
}

#[derive(Debug, Default)]
struct QueueState {
    log: VecDeque<Entry>,
    /// Sequence of `log[0]`.
    base: u64,
    next_sequence: u64,
    groups: HashMap<String, GroupState>,
    delayed: Vec<(Instant, Message)>,
}

impl QueueState {
    fn append(&mut self, message: Message) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.log.push_back(Entry { sequence, message });
        sequence
    }

    fn promote_due(&mut self, now: Instant) -> bool {
        if self.delayed.is_empty() {
            return false;
        }
        let mut due = Vec::new();
        self.delayed.retain(|(at, message)| {
            if *at <= now {
                due.push((*at, message.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        let promoted = !due.is_empty();
        for (_, message) in due {
            self.append(message);
        }
        promoted
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn group(&mut self, name: &str) -> &mut GroupState {
        let base = self.base;
        self.groups.entry(name.to_string()).or_insert_with(|| GroupState {
            cursor: base,
            ..GroupState::default()
        })
    }

    fn trim(&mut self) {
        let Some(min_cursor) = self.groups.values().map(|g| g.cursor).min() else {
            return;
        };
        while self.base < min_cursor && !self.log.is_empty() {
            self.log.pop_front();
            self.base += 1;
        }
    }

    /// Bound the log of a queue without consumer groups.
    fn cap_unconsumed(&mut self, retention: Option<usize>) {
        let Some(limit) = retention else {
            return;
        };
        if !self.groups.is_empty() {
            return;
        }
        while self.log.len() > limit {
            self.log.pop_front();
            self.base += 1;
        }
    }
}

/// Reference [`MessageQueue`] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    next_delivery: AtomicU64,
    closed: AtomicBool,
    /// Maximum entries kept on a queue without consumer groups.
    retention: Option<usize>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose group-less logs keep at most `limit` entries.
    pub fn with_retention(limit: usize) -> Self {
        Self {
            retention: Some(limit),
            ..Self::default()
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Refuse all further operations, as if the broker went away.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Messages currently retained in the log of `queue`, oldest first.
    pub fn snapshot(&self, queue: &str) -> Vec<Message> {
        let mut queues = self.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Vec::new();
        };
        state.promote_due(Instant::now());
        state.log.iter().map(|e| e.message.clone()).collect()
    }

    /// In-flight deliveries of `group`.
    pub fn in_flight(&self, queue: &str, group: &str) -> usize {
        self.lock()
            .get(queue)
            .and_then(|q| q.groups.get(group))
            .map(|g| g.in_flight.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_open(&self, queue: &str) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed(queue.to_string()))
        } else {
            Ok(())
        }
    }

    fn take(&self, queue: &str, group: &str, max: usize) -> (Vec<Delivery>, Option<Instant>) {
        let mut queues = self.lock();
        let state = queues.entry(queue.to_string()).or_default();
        state.promote_due(Instant::now());
        let next_due = state.next_due();

        let mut picked = Vec::new();
        {
            let base = state.base;
            let log_len = state.log.len() as u64;
            let group_state = state.group(group);

            while picked.len() < max {
                if let Some(item) = group_state.redeliver.pop_front() {
                    picked.push(item);
                } else {
                    break;
                }
            }
            let mut log_items = Vec::new();
            while picked.len() + log_items.len() < max && group_state.cursor < base + log_len {
                log_items.push(group_state.cursor - base);
                group_state.cursor += 1;
            }
            for index in log_items {
                if let Some(entry) = state.log.get(index as usize) {
                    picked.push((entry.clone(), 0));
                }
            }
        }

        let group_state = state.group(group);
        let mut deliveries = Vec::with_capacity(picked.len());
        for (entry, attempts) in picked {
            let delivery_id = self.next_delivery.fetch_add(1, Ordering::Relaxed);
            let attempt = attempts + 1;
            deliveries.push(Delivery {
                delivery_id,
                sequence: entry.sequence,
                attempt,
                message: entry.message.clone(),
            });
            group_state.in_flight.insert(delivery_id, (entry, attempt));
        }
        state.trim();
        (deliveries, next_due)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn create_group(&self, queue: &str, group: &str) -> Result<(), QueueError> {
        self.check_open(queue)?;
        let mut queues = self.lock();
        queues.entry(queue.to_string()).or_default().group(group);
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<u64, QueueError> {
        self.check_open(queue)?;
        let sequence = {
            let mut queues = self.lock();
            let state = queues.entry(queue.to_string()).or_default();
            let sequence = state.append(message);
            state.cap_unconsumed(self.retention);
            sequence
        };
        self.notify.notify_waiters();
        Ok(sequence)
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        message: Message,
        delay: Duration,
    ) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.publish(queue, message).await.map(|_| ());
        }
        self.check_open(queue)?;
        {
            let mut queues = self.lock();
            queues
                .entry(queue.to_string())
                .or_default()
                .delayed
                .push((Instant::now() + delay, message));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        group: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            self.check_open(queue)?;
            let notified = self.notify.notified();
            let (deliveries, next_due) = self.take(queue, group, max.max(1));
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn acknowledge(
        &self,
        queue: &str,
        group: &str,
        delivery_id: u64,
    ) -> Result<(), QueueError> {
        let mut queues = self.lock();
        let removed = queues
            .get_mut(queue)
            .and_then(|q| q.groups.get_mut(group))
            .and_then(|g| g.in_flight.remove(&delivery_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownDelivery {
                queue: queue.to_string(),
                group: group.to_string(),
                delivery_id,
            }),
        }
    }

    async fn reject(
        &self,
        queue: &str,
        group: &str,
        delivery_id: u64,
        requeue: bool,
    ) -> Result<(), QueueError> {
        {
            let mut queues = self.lock();
            let group_state = queues
                .get_mut(queue)
                .and_then(|q| q.groups.get_mut(group));
            let Some(group_state) = group_state else {
                return Err(QueueError::UnknownDelivery {
                    queue: queue.to_string(),
                    group: group.to_string(),
                    delivery_id,
                });
            };
            let Some(item) = group_state.in_flight.remove(&delivery_id) else {
                return Err(QueueError::UnknownDelivery {
                    queue: queue.to_string(),
                    group: group.to_string(),
                    delivery_id,
                });
            };
            if requeue {
                group_state.redeliver.push_front(item);
            }
        }
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn release(&self, queue: &str, group: &str) -> Result<usize, QueueError> {
        let released = {
            let mut queues = self.lock();
            let Some(group_state) = queues.get_mut(queue).and_then(|q| q.groups.get_mut(group))
            else {
                return Ok(0);
            };
            let mut items: Vec<_> = group_state.in_flight.drain().map(|(_, item)| item).collect();
            items.sort_by_key(|(entry, _)| entry.sequence);
            let count = items.len();
            for item in items.into_iter().rev() {
                group_state.redeliver.push_front(item);
            }
            count
        };
        if released > 0 {
            self.notify.notify_waiters();
        }
        Ok(released)
    }

    async fn depth(&self, queue: &str) -> usize {
        let mut queues = self.lock();
        let Some(state) = queues.get_mut(queue) else {
            return 0;
        };
        state.promote_due(Instant::now());
        let delayed = state.delayed.len();
        let backlog = if state.groups.is_empty() {
            state.log.len()
        } else {
            let next = state.next_sequence;
            state
                .groups
                .values()
                .map(|g| (next - g.cursor) as usize + g.redeliver.len())
                .max()
                .unwrap_or(0)
        };
        backlog + delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WAIT: Duration = Duration::from_millis(50);

    fn msg(id: &str) -> Message {
        Message::with_id(id, json!({}))
    }

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let queue = InMemoryQueue::new();
        queue.publish("q", msg("a")).await.unwrap();
        queue.publish("q", msg("b")).await.unwrap();

        let batch = queue.receive("q", "g", 10, WAIT).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message.correlation_id, "a");
        assert_eq!(batch[0].sequence, 0);
        assert_eq!(batch[1].sequence, 1);
        assert_eq!(queue.in_flight("q", "g"), 2);

        for d in &batch {
            queue.acknowledge("q", "g", d.delivery_id).await.unwrap();
        }
        assert_eq!(queue.in_flight("q", "g"), 0);
        assert_eq!(queue.depth("q").await, 0);
        assert!(queue.acknowledge("q", "g", batch[0].delivery_id).await.is_err());
    }

    #[tokio::test]
    async fn test_groups_each_see_every_message() {
        let queue = InMemoryQueue::new();
        queue.publish("q", msg("a")).await.unwrap();
        let g1 = queue.receive("q", "g1", 10, WAIT).await.unwrap();
        let g2 = queue.receive("q", "g2", 10, WAIT).await.unwrap();
        assert_eq!(g1.len(), 1);
        assert_eq!(g2.len(), 1);
        assert_eq!(g1[0].sequence, g2[0].sequence);
    }

    #[tokio::test]
    async fn test_registered_group_is_not_trimmed_past() {
        let queue = InMemoryQueue::new();
        queue.create_group("q", "g1").await.unwrap();
        queue.create_group("q", "g2").await.unwrap();
        queue.publish("q", msg("a")).await.unwrap();
        let g1 = queue.receive("q", "g1", 10, WAIT).await.unwrap();
        queue.acknowledge("q", "g1", g1[0].delivery_id).await.unwrap();
        assert_eq!(queue.depth("q").await, 1);
        assert_eq!(queue.receive("q", "g2", 10, WAIT).await.unwrap().len(), 1);
        assert_eq!(queue.depth("q").await, 0);
    }

    #[tokio::test]
    async fn test_consumers_in_group_compete() {
        let queue = InMemoryQueue::new();
        queue.publish("q", msg("a")).await.unwrap();
        let first = queue.receive("q", "g", 10, WAIT).await.unwrap();
        let second = queue.receive("q", "g", 10, WAIT).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_reject_requeue_increments_attempt() {
        let queue = InMemoryQueue::new();
        queue.publish("q", msg("a")).await.unwrap();
        let first = queue.receive("q", "g", 1, WAIT).await.unwrap();
        assert_eq!(first[0].attempt, 1);
        queue.reject("q", "g", first[0].delivery_id, true).await.unwrap();

        let again = queue.receive("q", "g", 1, WAIT).await.unwrap();
        assert_eq!(again[0].attempt, 2);
        assert!(again[0].is_redelivery());

        queue.reject("q", "g", again[0].delivery_id, false).await.unwrap();
        assert!(queue.receive("q", "g", 1, WAIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_returns_in_flight() {
        let queue = InMemoryQueue::new();
        queue.publish("q", msg("a")).await.unwrap();
        queue.publish("q", msg("b")).await.unwrap();
        queue.receive("q", "g", 10, WAIT).await.unwrap();
        assert_eq!(queue.release("q", "g").await.unwrap(), 2);

        let batch = queue.receive("q", "g", 10, WAIT).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|d| d.message.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(batch.iter().all(|d| d.attempt == 2));
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("q", "g", 1, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish("q", msg("late")).await.unwrap();
        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(batch[0].message.correlation_id, "late");
    }

    #[tokio::test]
    async fn test_delayed_publish() {
        let queue = InMemoryQueue::new();
        queue
            .publish_delayed("q", msg("later"), Duration::from_millis(80))
            .await
            .unwrap();
        assert_eq!(queue.depth("q").await, 1);
        assert!(queue.receive("q", "g", 1, Duration::from_millis(10)).await.unwrap().is_empty());

        let batch = queue.receive("q", "g", 1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(batch[0].message.correlation_id, "later");
    }

    #[tokio::test]
    async fn test_snapshot_without_groups_keeps_everything() {
        let queue = InMemoryQueue::new();
        queue.publish("dlq", msg("x")).await.unwrap();
        queue.publish("dlq", msg("y")).await.unwrap();
        assert_eq!(queue.snapshot("dlq").len(), 2);
        assert_eq!(queue.depth("dlq").await, 2);
    }

    #[tokio::test]
    async fn test_retention_bounds_unconsumed_queues() {
        let queue = InMemoryQueue::with_retention(3);
        for i in 0..10 {
            queue.publish("responses", msg(&format!("r-{}", i))).await.unwrap();
        }
        let kept: Vec<_> = queue
            .snapshot("responses")
            .into_iter()
            .map(|m| m.correlation_id)
            .collect();
        assert_eq!(kept, vec!["r-7", "r-8", "r-9"]);

        // Queues with a consumer group are trimmed by their cursors only.
        queue.create_group("requests", "g").await.unwrap();
        for i in 0..5 {
            queue.publish("requests", msg(&format!("q-{}", i))).await.unwrap();
        }
        assert_eq!(queue.snapshot("requests").len(), 5);
        let batch = queue.receive("requests", "g", 10, WAIT).await.unwrap();
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let queue = InMemoryQueue::new();
        queue.close();
        assert!(matches!(
            queue.publish("q", msg("a")).await,
            Err(QueueError::Closed(_))
        ));
        assert!(queue.receive("q", "g", 1, WAIT).await.is_err());
    }
}
