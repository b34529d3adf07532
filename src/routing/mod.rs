//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Message (payload, metadata, headers, correlation_id)
//!     → message.document() (logical view)
//!     → router.rs (ordered route scan)
//!     → matcher.rs (evaluate match condition via path.rs lookup)
//!     → Return: matched route, fallback endpoint, or NoRouteMatched
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Drop disabled routes
//!     → Compile matchers (exact values, anchored regexes) and transforms
//!     → Stable sort by priority
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at load, immutable at runtime
//! - Regex and transform syntax errors fail loading, never matching
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority, then declaration)

pub mod matcher;
pub mod path;
pub mod router;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use router::{CompiledRoute, RouteMatch, RouteTable};

/// The live route table; reload swaps it whole.
pub type SharedRouteTable = Arc<ArcSwap<RouteTable>>;

pub fn shared(table: RouteTable) -> SharedRouteTable {
    Arc::new(ArcSwap::from_pointee(table))
}
