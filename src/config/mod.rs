//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, route compilation)
//!     → MediatorConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! Route file (TOML/JSON), when routing.watch is set:
//!     watcher.rs detects change
//!     → loader.rs loads and compiles the new table
//!     → atomic swap of the live RouteTable
//!     → in-flight messages finish on the table they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the route table hot-reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A route file that fails to compile never replaces a working table

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::MediatorConfig;
pub use schema::RouteConfig;
