//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Route table → Dispatcher → Queue + result store
//!     → Worker pool → Background tasks → Ingress listener
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Ingress stops accepting → Workers stop receiving
//!     → In-flight messages drain (grace period) → Unfinished released → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, release
//! - Draining has a deadline: the grace period bounds in-flight work

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Mediator, RebalanceError, StartOptions, StartupError};
