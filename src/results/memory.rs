//! In-memory result store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::message::{now_millis, MessageStatus, ProcessingResult};
use crate::results::{PutOutcome, ResultStore, ResultStoreError, StatusRecord};

#[derive(Debug, Clone)]
struct Record {
    status: StatusRecord,
    result: Option<ProcessingResult>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_terminal(&self) -> bool {
        self.status.status.is_terminal()
    }
}

/// Reference [`ResultStore`] backed by a concurrent map.
#[derive(Debug)]
pub struct InMemoryResultStore {
    records: DashMap<String, Record>,
    /// TTL applied to in-flight status records.
    status_ttl: Duration,
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl InMemoryResultStore {
    pub fn new(status_ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            status_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn live(&self, correlation_id: &str) -> Option<Record> {
        let now = Instant::now();
        let record = self.records.get(correlation_id)?.clone();
        if record.is_expired(now) {
            self.records
                .remove_if(correlation_id, |_, r| r.is_expired(now));
            return None;
        }
        Some(record)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn set_status(
        &self,
        correlation_id: &str,
        status: MessageStatus,
    ) -> Result<PutOutcome, ResultStoreError> {
        if status.is_terminal() {
            return Err(ResultStoreError::Unavailable(format!(
                "terminal status {} requires a result",
                status
            )));
        }
        let now = Instant::now();
        let stamp = now_millis();
        let expires_at = Some(now + self.status_ttl);

        match self.records.entry(correlation_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = Record {
                        status: StatusRecord {
                            correlation_id: correlation_id.to_string(),
                            status,
                            submitted_at: stamp,
                            updated_at: stamp,
                        },
                        result: None,
                        expires_at,
                    };
                    return Ok(PutOutcome::Stored);
                }
                if record.is_terminal() {
                    return Ok(PutOutcome::AlreadyTerminal);
                }
                record.status.status = status;
                record.status.updated_at = stamp;
                record.expires_at = expires_at;
                Ok(PutOutcome::Stored)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Record {
                    status: StatusRecord {
                        correlation_id: correlation_id.to_string(),
                        status,
                        submitted_at: stamp,
                        updated_at: stamp,
                    },
                    result: None,
                    expires_at,
                });
                Ok(PutOutcome::Stored)
            }
        }
    }

    async fn put(
        &self,
        result: ProcessingResult,
        ttl: Duration,
    ) -> Result<PutOutcome, ResultStoreError> {
        let now = Instant::now();
        let stamp = now_millis();
        let expires_at = (!ttl.is_zero()).then(|| now + ttl);
        let correlation_id = result.correlation_id.clone();

        match self.records.entry(correlation_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_terminal() && !record.is_expired(now) {
                    return Ok(PutOutcome::AlreadyTerminal);
                }
                record.status.status = result.status;
                record.status.updated_at = stamp;
                record.result = Some(result);
                record.expires_at = expires_at;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Record {
                    status: StatusRecord {
                        correlation_id,
                        status: result.status,
                        submitted_at: stamp,
                        updated_at: stamp,
                    },
                    result: Some(result),
                    expires_at,
                });
            }
        }
        Ok(PutOutcome::Stored)
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<ProcessingResult>, ResultStoreError> {
        Ok(self.live(correlation_id).and_then(|r| r.result))
    }

    async fn status(&self, correlation_id: &str) -> Result<Option<StatusRecord>, ResultStoreError> {
        Ok(self.live(correlation_id).map(|r| r.status))
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }
}
