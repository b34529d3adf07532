//! queue-mediator library.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod observability;
pub mod partition;
pub mod queue;
pub mod resilience;
pub mod results;
pub mod routing;
pub mod transform;
pub mod worker;

pub use config::schema::MediatorConfig;
pub use dispatch::{CustomHandler, Dispatcher};
pub use error::{DispatchError, DispatchFailure};
pub use http::IngressServer;
pub use lifecycle::{Mediator, Shutdown, StartOptions};
pub use message::{Message, MessageStatus, ProcessingResult};
