//! HTTP ingress subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/v1/submit
//!     → server.rs (request ID, body limit, timeout)
//!     → Message (PENDING, correlation id assigned)
//!     → request queue  ──► 202 {correlation_id}
//!
//! GET /api/v1/status/{id}, GET /api/v1/response/{id}
//!     → result store
//! ```

pub mod server;

pub use server::{build_router, AppState, IngressServer, SubmitRequest, SubmitResponse, X_REQUEST_ID};
