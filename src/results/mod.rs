//! Result store.
//!
//! # Responsibilities
//! - Track each message's status from submission to its terminal state
//! - Hold terminal results for a bounded time (TTL)
//!
//! # Design Decisions
//! - Terminal records are immutable: the first terminal write wins and
//!   every later write is reported as [`PutOutcome::AlreadyTerminal`]
//! - Status never moves backwards out of a terminal state
//! - Expired records are invisible immediately and removed by `purge_expired`

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MessageStatus, ProcessingResult};

pub use memory::InMemoryResultStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResultStoreError {
    #[error("result store unavailable: {0}")]
    Unavailable(String),
}

/// Status of a correlation id, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub correlation_id: String,
    pub status: MessageStatus,
    pub submitted_at: u64,
    pub updated_at: u64,
}

/// Whether a write was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A terminal record already exists; nothing changed.
    AlreadyTerminal,
}

#[async_trait]
pub trait ResultStore: Send + Sync + std::fmt::Debug {
    /// Move a message to a non-terminal status (PENDING, PROCESSING).
    async fn set_status(
        &self,
        correlation_id: &str,
        status: MessageStatus,
    ) -> Result<PutOutcome, ResultStoreError>;

    /// Store a terminal result, kept for `ttl`.
    async fn put(
        &self,
        result: ProcessingResult,
        ttl: Duration,
    ) -> Result<PutOutcome, ResultStoreError>;

    async fn get(&self, correlation_id: &str) -> Result<Option<ProcessingResult>, ResultStoreError>;

    async fn status(&self, correlation_id: &str) -> Result<Option<StatusRecord>, ResultStoreError>;

    /// Drop expired records. Returns the number removed.
    async fn purge_expired(&self) -> usize;
}
