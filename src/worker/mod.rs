//! Worker runtime subsystem.
//!
//! # Data Flow
//! ```text
//! pool.rs: register consumer groups → spawn one runtime per slot → session sweeper
//!     ↓
//! runtime.rs: receive batch → dispatch → result store + response queue
//!     ↓ (transient failure)
//! publish_delayed(request queue, backoff) ... (exhausted) → dead-letter queue
//! ```
//!
//! # Design Decisions
//! - Each slot has a global index (`index_offset + i`) so several processes
//!   can split one partition space
//! - With partitioning, each slot reads the full stream through its own
//!   consumer group and drops messages it does not own
//! - Shutdown stops receiving first, then drains in-flight work within the
//!   grace period, then releases anything unfinished for redelivery

pub mod pool;
pub mod runtime;

pub use pool::{consumer_group, WorkerPool};
pub use runtime::{DeliveryOutcome, Worker, WorkerSettings};
