//! Partitioning subsystem.
//!
//! # Data Flow
//! ```text
//! Message
//!     → partition key (route override, partition_key_field, session_key_field)
//!     → assigner.rs (strategy → partition id → owner)
//!     → Owned: process, touch session (sessions.rs)
//!     → NotOwned: acknowledge and skip (another worker has it)
//! ```
//!
//! # Design Decisions
//! - Every worker slot sees every message (broadcast + filter)
//! - Exactly one worker owns each partition for a given worker count
//! - Session table is bounded and swept; it never grows without limit

pub mod assigner;
pub mod sessions;

pub use assigner::{PartitionAssigner, PartitionDecision, PartitionStats};
pub use sessions::SessionTable;
