//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch of a message:
//!     → timeouts.rs (bound the outbound call or handler)
//!     → On retryable failure: backoff.rs (delay before the message is requeued)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for transient failures (network, timeout)
//! - The retry decision itself belongs to the worker runtime

pub mod backoff;
pub mod timeouts;
