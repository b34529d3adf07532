//! Worker loop.
//!
//! # Responsibilities
//! - Receive batches from the request queue for one worker slot
//! - Drive each message PENDING → PROCESSING → terminal, exactly once
//! - Retry transient failures with exponential backoff, dead-letter the rest
//! - Publish terminal results to the result store and the response queue
//! - Stop dequeuing on shutdown, drain in-flight work within the grace period
//!
//! # Data Flow
//! ```text
//! receive(batch) ──► per delivery (concurrently):
//!     terminal already? ──► ack, skip
//!     plan()  ── Skip ──► ack, skip (owned elsewhere)
//!        │
//!        ├─ expired ──► TIMEOUT + dead letter
//!        ▼
//!     execute() ── Ok ──► COMPLETED result ──► store + response queue ──► ack
//!        │
//!        ├─ Err ── retryable && retries left ──► publish_delayed(backoff) ──► ack
//!        │         otherwise ──► FAILED result + dead letter ──► ack
//!        └─ panic ──► FAILED result + dead letter ──► ack
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::broadcast;

use crate::config::schema::MediatorConfig;
use crate::dispatch::{DispatchContext, Dispatcher, Plan};
use crate::error::{DispatchError, DispatchFailure};
use crate::message::{now_millis, DeadLetterInfo, Message, MessageStatus, ProcessingResult};
use crate::observability::metrics;
use crate::partition::PartitionAssigner;
use crate::queue::{Delivery, MessageQueue, QueueError};
use crate::resilience::backoff::{calculate_backoff, calculate_backoff_with_jitter};
use crate::results::ResultStore;

/// Settings a worker needs from the configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub request_queue: String,
    pub response_queue: String,
    pub dlq: String,
    pub batch_size: usize,
    pub receive_wait: Duration,
    pub max_retries: u32,
    pub retry_delay_base_ms: u64,
    pub retry_delay_max_ms: u64,
    pub retry_jitter: bool,
    pub result_ttl: Duration,
    pub grace: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &MediatorConfig) -> Self {
        Self {
            request_queue: config.queue.request_queue_name.clone(),
            response_queue: config.queue.response_queue_name.clone(),
            dlq: config.queue.dlq_name.clone(),
            batch_size: config.worker.batch_size.max(1),
            receive_wait: Duration::from_millis(config.queue.receive_wait_ms),
            max_retries: config.worker.max_retries,
            retry_delay_base_ms: config.worker.retry_delay_base_ms,
            retry_delay_max_ms: config.worker.retry_delay_max_ms,
            retry_jitter: config.worker.retry_jitter,
            result_ttl: Duration::from_secs(config.results.ttl_secs),
            grace: Duration::from_secs(config.shutdown.grace_secs),
        }
    }

    /// Delay before retry number `retry_count` (0-based).
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        if self.retry_jitter {
            calculate_backoff_with_jitter(retry_count, self.retry_delay_base_ms, self.retry_delay_max_ms)
        } else {
            calculate_backoff(retry_count, self.retry_delay_base_ms, self.retry_delay_max_ms)
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Retried,
    DeadLettered,
    /// Another worker owns the message.
    Skipped,
    /// The message already reached a terminal state.
    Duplicate,
}

/// One worker slot.
#[derive(Debug)]
pub struct Worker {
    id: String,
    index: usize,
    group: String,
    queue: Arc<dyn MessageQueue>,
    results: Arc<dyn ResultStore>,
    dispatcher: Arc<Dispatcher>,
    assigner: Option<Arc<PartitionAssigner>>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        index: usize,
        group: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        results: Arc<dyn ResultStore>,
        dispatcher: Arc<Dispatcher>,
        assigner: Option<Arc<PartitionAssigner>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: format!("worker-{}", index),
            index,
            group: group.into(),
            queue,
            results,
            dispatcher,
            assigner,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    /// Consume until shutdown is signalled, then drain and release.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(worker = %self.id, group = %self.group, "Worker started");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = self.queue.receive(
                    &self.settings.request_queue,
                    &self.group,
                    self.settings.batch_size,
                    self.settings.receive_wait,
                ) => received,
            };

            let batch = match received {
                Ok(batch) => batch,
                Err(QueueError::Closed(queue)) => {
                    tracing::error!(worker = %self.id, queue = %queue, "Queue closed, stopping worker");
                    break;
                }
                Err(e) => {
                    tracing::warn!(worker = %self.id, error = %e, "Receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            let work = join_all(batch.into_iter().map(|d| self.process_delivery(d)));
            tokio::pin!(work);
            tokio::select! {
                _ = &mut work => {}
                _ = shutdown.recv() => {
                    tracing::info!(worker = %self.id, grace_secs = self.settings.grace.as_secs(), "Shutdown requested, draining in-flight messages");
                    if tokio::time::timeout(self.settings.grace, &mut work).await.is_err() {
                        tracing::warn!(worker = %self.id, "Grace period elapsed with messages in flight");
                    }
                    break;
                }
            }
        }

        match self
            .queue
            .release(&self.settings.request_queue, &self.group)
            .await
        {
            Ok(0) => {}
            Ok(released) => {
                tracing::warn!(worker = %self.id, released, "Released unfinished deliveries for redelivery")
            }
            Err(e) => tracing::warn!(worker = %self.id, error = %e, "Release failed"),
        }
        tracing::info!(worker = %self.id, "Worker stopped");
    }

    /// Process one delivery end to end, then acknowledge it.
    pub async fn process_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let delivery_id = delivery.delivery_id;
        let outcome = self.handle(delivery).await;
        match outcome {
            Ok(outcome) => {
                self.ack(delivery_id).await;
                outcome
            }
            Err(e) => {
                // The message could not be handed on; let the queue redeliver it.
                tracing::error!(worker = %self.id, error = %e, "Queue operation failed, requeueing delivery");
                if let Err(e) = self
                    .queue
                    .reject(&self.settings.request_queue, &self.group, delivery_id, true)
                    .await
                {
                    tracing::error!(worker = %self.id, error = %e, "Requeue failed");
                }
                DeliveryOutcome::Retried
            }
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<DeliveryOutcome, QueueError> {
        let started = Instant::now();
        let is_redelivery = delivery.is_redelivery();
        let mut message = delivery.message;
        let cid = message.correlation_id.clone();

        if let Ok(Some(record)) = self.results.status(&cid).await {
            if record.status.is_terminal() {
                tracing::info!(correlation_id = %cid, worker = %self.id, status = %record.status, "Message already terminal, skipping");
                return Ok(DeliveryOutcome::Duplicate);
            }
        }

        if is_redelivery {
            tracing::warn!(correlation_id = %cid, worker = %self.id, attempt = delivery.attempt, retry_count = message.retry_count(), "Redelivered message");
        }

        let ctx = DispatchContext {
            worker_index: self.index,
            assigner: self.assigner.clone(),
            sequence: delivery.sequence,
        };
        let plan = panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.plan(&message, &ctx)))
            .unwrap_or_else(|panic| {
                Err(DispatchFailure::new(DispatchError::Panicked {
                    reason: panic_reason(panic.as_ref()),
                }))
            });

        if let Ok(Plan::Skip(reason)) = &plan {
            tracing::debug!(correlation_id = %cid, worker = %self.id, reason = ?reason, "Skipped message owned by another worker");
            metrics::record_skipped();
            return Ok(DeliveryOutcome::Skipped);
        }

        if let Err(e) = self.results.set_status(&cid, MessageStatus::Processing).await {
            tracing::warn!(correlation_id = %cid, error = %e, "Could not record PROCESSING status");
        }
        message.status = MessageStatus::Processing;

        if message.deadline().is_some_and(|deadline| now_millis() > deadline) {
            let failure = DispatchFailure::new(DispatchError::Expired {
                correlation_id: cid.clone(),
            });
            return self.dead_letter(message, failure, started).await;
        }

        let call = match plan {
            Ok(Plan::Call(call)) => call,
            Ok(Plan::Skip(_)) => return Ok(DeliveryOutcome::Skipped),
            Err(failure) => return self.fail(message, failure, started).await,
        };

        let route = call.route.clone();
        let executed = AssertUnwindSafe(self.dispatcher.execute(call, &message))
            .catch_unwind()
            .await;
        match executed {
            Ok(Ok(result)) => {
                let route = result.route.clone().unwrap_or_else(|| "default".to_string());
                self.finish(result).await?;
                metrics::record_dispatched(&route, "completed");
                Ok(DeliveryOutcome::Completed)
            }
            Ok(Err(failure)) => self.fail(message, failure, started).await,
            Err(panic) => {
                let mut failure = DispatchFailure::new(DispatchError::Panicked {
                    reason: panic_reason(panic.as_ref()),
                });
                failure.route = route;
                self.dead_letter(message, failure, started).await
            }
        }
    }

    /// Retry a transient failure, or dead-letter.
    async fn fail(
        &self,
        mut message: Message,
        failure: DispatchFailure,
        started: Instant,
    ) -> Result<DeliveryOutcome, QueueError> {
        let retry_count = message.retry_count();
        let max_retries = failure.max_retries.unwrap_or(self.settings.max_retries);

        if !failure.error.is_retryable() || retry_count >= max_retries {
            return self.dead_letter(message, failure, started).await;
        }

        let delay = self.settings.retry_delay(retry_count);
        message.record_error(&failure.error.to_string());
        message.set_retry_count(retry_count + 1);
        message.status = MessageStatus::Pending;

        let cid = message.correlation_id.clone();
        self.queue
            .publish_delayed(&self.settings.request_queue, message, delay)
            .await?;

        let route = failure.route.as_deref().unwrap_or("default");
        metrics::record_retried(route);
        tracing::warn!(
            correlation_id = %cid,
            worker = %self.id,
            error = %failure.error,
            retry_count = retry_count + 1,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        Ok(DeliveryOutcome::Retried)
    }

    async fn dead_letter(
        &self,
        mut message: Message,
        failure: DispatchFailure,
        started: Instant,
    ) -> Result<DeliveryOutcome, QueueError> {
        let error = failure.error.to_string();
        let kind = failure.error.kind();
        let retry_count = message.retry_count();
        let status = match &failure.error {
            DispatchError::Expired { .. } => MessageStatus::Timeout,
            _ => MessageStatus::Failed,
        };
        let cid = message.correlation_id.clone();

        message.record_error(&error);
        message.status = status;
        message.dead_letter = Some(DeadLetterInfo {
            error: error.clone(),
            kind: kind.to_string(),
            errors: message.errors(),
            retry_count,
            worker_id: self.id.clone(),
            failed_at: now_millis(),
        });

        self.queue.publish(&self.settings.dlq, message).await?;

        let result = ProcessingResult::failed(
            cid.as_str(),
            status,
            error.as_str(),
            started.elapsed().as_millis() as u64,
        )
        .with_route(failure.route.clone());
        self.finish(result).await?;

        metrics::record_dead_lettered(kind);
        metrics::record_dispatched(
            failure.route.as_deref().unwrap_or("default"),
            if status == MessageStatus::Timeout { "timeout" } else { "failed" },
        );
        tracing::error!(
            correlation_id = %cid,
            worker = %self.id,
            error = %error,
            kind,
            retry_count,
            "Message dead-lettered"
        );
        Ok(DeliveryOutcome::DeadLettered)
    }

    /// Store a terminal result and publish it to the response queue.
    async fn finish(&self, result: ProcessingResult) -> Result<(), QueueError> {
        let cid = result.correlation_id.clone();
        let status = result.status;
        let envelope = response_envelope(&result);

        match self.results.put(result, self.settings.result_ttl).await {
            Ok(crate::results::PutOutcome::AlreadyTerminal) => {
                tracing::info!(correlation_id = %cid, "Result already recorded, keeping the first");
                return Ok(());
            }
            Ok(crate::results::PutOutcome::Stored) => {}
            Err(e) => tracing::error!(correlation_id = %cid, error = %e, "Could not store result"),
        }

        self.queue
            .publish(&self.settings.response_queue, envelope)
            .await?;
        tracing::debug!(correlation_id = %cid, status = %status, "Result published");
        Ok(())
    }

    async fn ack(&self, delivery_id: u64) {
        if let Err(e) = self
            .queue
            .acknowledge(&self.settings.request_queue, &self.group, delivery_id)
            .await
        {
            tracing::warn!(worker = %self.id, delivery_id, error = %e, "Acknowledge failed");
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wrap a result for the response queue.
pub fn response_envelope(result: &ProcessingResult) -> Message {
    let payload = serde_json::to_value(result).unwrap_or_default();
    let mut message = Message::with_id(result.correlation_id.clone(), payload);
    message.status = result.status;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CustomHandler, HandlerError};
    use crate::queue::InMemoryQueue;
    use crate::results::InMemoryResultStore;
    use crate::routing::{self, RouteTable};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a retryable error a set number of times.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CustomHandler for Flaky {
        async fn process(&self, body: Value, _message: &Message) -> Result<Value, HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(HandlerError::retryable(format!("attempt {} failed", n)))
            } else {
                Ok(body)
            }
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueue>,
        results: Arc<InMemoryResultStore>,
        worker: Worker,
        handler: Arc<Flaky>,
    }

    fn harness(failures: u32) -> Harness {
        let mut config = MediatorConfig::default();
        config.worker.retry_delay_base_ms = 1;
        config.worker.retry_delay_max_ms = 4;
        let handler = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        });
        let dispatcher = Dispatcher::new(&config, routing::shared(RouteTable::default()))
            .unwrap()
            .with_handler(handler.clone());
        let queue = InMemoryQueue::shared();
        let results = Arc::new(InMemoryResultStore::default());
        let worker = Worker::new(
            0,
            "g",
            queue.clone(),
            results.clone(),
            Arc::new(dispatcher),
            None,
            WorkerSettings::from_config(&config),
        );
        Harness {
            queue,
            results,
            worker,
            handler,
        }
    }

    async fn next(h: &Harness) -> Delivery {
        let mut batch = h
            .queue
            .receive("mediator-requests", "g", 1, Duration::from_secs(2))
            .await
            .unwrap();
        batch.remove(0)
    }

    #[test]
    fn test_retry_delays() {
        let settings = WorkerSettings::from_config(&MediatorConfig::default());
        let delays: Vec<_> = (0..3).map(|n| settings.retry_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_success_stores_and_publishes() {
        let h = harness(0);
        h.queue
            .publish("mediator-requests", Message::with_id("c-1", json!({"v": 1})))
            .await
            .unwrap();
        let outcome = h.worker.process_delivery(next(&h).await).await;
        assert_eq!(outcome, DeliveryOutcome::Completed);

        let result = h.results.get("c-1").await.unwrap().unwrap();
        assert_eq!(result.status, MessageStatus::Completed);
        assert_eq!(result.body, Some(json!({"v": 1})));
        assert_eq!(h.queue.snapshot("mediator-responses").len(), 1);
        assert_eq!(h.queue.in_flight("mediator-requests", "g"), 0);
    }

    #[tokio::test]
    async fn test_retries_then_dead_letter() {
        let h = harness(u32::MAX);
        h.queue
            .publish("mediator-requests", Message::with_id("c-2", json!({})))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            let delivery = next(&h).await;
            outcomes.push(h.worker.process_delivery(delivery).await);
        }
        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Retried,
                DeliveryOutcome::Retried,
                DeliveryOutcome::Retried,
                DeliveryOutcome::DeadLettered
            ]
        );
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 4);

        let dlq = h.queue.snapshot("mediator-dlq");
        assert_eq!(dlq.len(), 1);
        let info = dlq[0].dead_letter.as_ref().unwrap();
        assert_eq!(info.retry_count, 3);
        assert_eq!(info.errors.len(), 4);
        assert_eq!(info.kind, "handler");
        assert_eq!(info.worker_id, "worker-0");

        let result = h.results.get("c-2").await.unwrap().unwrap();
        assert_eq!(result.status, MessageStatus::Failed);
        assert!(result.error.unwrap().contains("attempt 3"));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_retries() {
        let h = harness(0);
        let message = Message::with_id("c-3", json!({}));
        let failure = DispatchFailure::new(DispatchError::Configuration("bad".into()));
        let outcome = h.worker.fail(message, failure, Instant::now()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::DeadLettered);
        let dlq = h.queue.snapshot("mediator-dlq");
        assert_eq!(dlq[0].dead_letter.as_ref().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_terminal_message_is_not_reprocessed() {
        let h = harness(0);
        let first = ProcessingResult::completed("c-4", json!("first"), Some(200), Default::default(), 1);
        h.results.put(first, Duration::from_secs(60)).await.unwrap();

        h.queue
            .publish("mediator-requests", Message::with_id("c-4", json!("second")))
            .await
            .unwrap();
        let outcome = h.worker.process_delivery(next(&h).await).await;
        assert_eq!(outcome, DeliveryOutcome::Duplicate);
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.results.get("c-4").await.unwrap().unwrap().body,
            Some(json!("first"))
        );
    }

    #[tokio::test]
    async fn test_expired_message_times_out() {
        let h = harness(0);
        let mut message = Message::with_id("c-5", json!({})).with_metadata("timeout", 1);
        message.timestamp = now_millis() - 5_000;
        h.queue.publish("mediator-requests", message).await.unwrap();

        let outcome = h.worker.process_delivery(next(&h).await).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered);
        let result = h.results.get("c-5").await.unwrap().unwrap();
        assert_eq!(result.status, MessageStatus::Timeout);
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(0);
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(h.worker.run(rx));
        h.queue
            .publish("mediator-requests", Message::with_id("c-6", json!({})))
            .await
            .unwrap();

        let mut stored = None;
        for _ in 0..100 {
            stored = h.results.get("c-6").await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stored.is_some());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    /// Panics on `{"panic": true}`, echoes anything else.
    #[derive(Debug)]
    struct Volatile;

    #[async_trait]
    impl CustomHandler for Volatile {
        async fn process(&self, body: Value, _message: &Message) -> Result<Value, HandlerError> {
            if body["panic"] == json!(true) {
                panic!("handler blew up");
            }
            Ok(body)
        }
    }

    /// Echoes after a delay, signalling when each call starts.
    #[derive(Debug)]
    struct Slow {
        delay: Duration,
        started: tokio::sync::Notify,
    }

    #[async_trait]
    impl CustomHandler for Slow {
        async fn process(&self, body: Value, _message: &Message) -> Result<Value, HandlerError> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            Ok(body)
        }
    }

    fn worker_with(
        handler: Arc<dyn CustomHandler>,
        routes: RouteTable,
        grace: Duration,
    ) -> (Arc<InMemoryQueue>, Arc<InMemoryResultStore>, Worker) {
        let mut config = MediatorConfig::default();
        config.queue.receive_wait_ms = 50;
        config.routing.enabled = !routes.is_empty();
        let dispatcher = Dispatcher::new(&config, routing::shared(routes))
            .unwrap()
            .with_handler(handler);
        let mut settings = WorkerSettings::from_config(&config);
        settings.grace = grace;
        let queue = InMemoryQueue::shared();
        let results = Arc::new(InMemoryResultStore::default());
        let worker = Worker::new(
            0,
            "g",
            queue.clone(),
            results.clone(),
            Arc::new(dispatcher),
            None,
            settings,
        );
        (queue, results, worker)
    }

    async fn result_of(results: &InMemoryResultStore, id: &str) -> ProcessingResult {
        for _ in 0..250 {
            if let Some(result) = results.get(id).await.unwrap() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no result for {}", id);
    }

    #[tokio::test]
    async fn test_handler_panic_dead_letters_and_worker_keeps_running() {
        let (queue, results, worker) =
            worker_with(Arc::new(Volatile), RouteTable::default(), Duration::from_secs(1));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(rx));

        queue
            .publish("mediator-requests", Message::with_id("boom", json!({"panic": true})))
            .await
            .unwrap();
        queue
            .publish("mediator-requests", Message::with_id("fine", json!({"v": 1})))
            .await
            .unwrap();

        let bad = result_of(&results, "boom").await;
        assert_eq!(bad.status, MessageStatus::Failed);
        assert!(bad.error.unwrap().contains("handler blew up"));

        let good = result_of(&results, "fine").await;
        assert_eq!(good.status, MessageStatus::Completed);
        assert_eq!(good.body, Some(json!({"v": 1})));

        let dlq = queue.snapshot("mediator-dlq");
        assert_eq!(dlq.len(), 1);
        let info = dlq[0].dead_letter.as_ref().unwrap();
        assert_eq!(info.kind, "panic");
        assert_eq!(info.retry_count, 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_overflowing_transform_does_not_stall_worker() {
        let mut route = crate::config::schema::RouteConfig::new("remainder");
        route.is_default = true;
        route.transform_type = crate::transform::TransformKind::Structural;
        route.transform = Some(json!("{remainder: (.payload.a % .payload.b)}"));
        let routes = RouteTable::compile(&[route], None, false).unwrap();

        let (queue, results, worker) =
            worker_with(Arc::new(Volatile), routes, Duration::from_secs(1));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(rx));

        queue
            .publish(
                "mediator-requests",
                Message::with_id("min", json!({"a": i64::MIN, "b": -1})),
            )
            .await
            .unwrap();
        queue
            .publish("mediator-requests", Message::with_id("ok", json!({"a": 7, "b": 3})))
            .await
            .unwrap();

        assert!(result_of(&results, "min").await.status.is_terminal());
        let ok = result_of(&results, "ok").await;
        assert_eq!(ok.status, MessageStatus::Completed);
        assert_eq!(ok.body, Some(json!({"remainder": 1})));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_message_finish() {
        let handler = Arc::new(Slow {
            delay: Duration::from_millis(300),
            started: tokio::sync::Notify::new(),
        });
        let (queue, results, worker) =
            worker_with(handler.clone(), RouteTable::default(), Duration::from_secs(5));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(rx));

        queue
            .publish("mediator-requests", Message::with_id("slow-1", json!({"n": 1})))
            .await
            .unwrap();
        handler.started.notified().await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let result = results.get("slow-1").await.unwrap().unwrap();
        assert_eq!(result.status, MessageStatus::Completed);
        assert_eq!(queue.in_flight("mediator-requests", "g"), 0);
        let redelivered = queue
            .receive("mediator-requests", "g", 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(redelivered.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_message_past_grace() {
        let handler = Arc::new(Slow {
            delay: Duration::from_secs(10),
            started: tokio::sync::Notify::new(),
        });
        let (queue, results, worker) =
            worker_with(handler.clone(), RouteTable::default(), Duration::from_millis(100));
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(rx));

        queue
            .publish("mediator-requests", Message::with_id("slow-2", json!({"n": 2})))
            .await
            .unwrap();
        handler.started.notified().await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        let stored = results.get("slow-2").await.unwrap();
        assert!(stored.map_or(true, |r| !r.status.is_terminal()));
        assert_eq!(queue.in_flight("mediator-requests", "g"), 0);

        let mut redelivered = queue
            .receive("mediator-requests", "g", 1, Duration::from_secs(1))
            .await
            .unwrap();
        let delivery = redelivered.remove(0);
        assert_eq!(delivery.message.correlation_id, "slow-2");
        assert_eq!(delivery.attempt, 2);
        assert!(delivery.is_redelivery());
    }
}
