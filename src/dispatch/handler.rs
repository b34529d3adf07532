//! In-process handlers used instead of HTTP dispatch.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::DispatchError;
use crate::message::{now_millis, Message};

/// Failure reported by a [`CustomHandler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<HandlerError> for DispatchError {
    fn from(e: HandlerError) -> Self {
        DispatchError::Handler {
            message: e.message,
            retryable: e.retryable,
        }
    }
}

/// Processes a transformed body in-process.
#[async_trait]
pub trait CustomHandler: Send + Sync + std::fmt::Debug {
    async fn process(&self, body: Value, message: &Message) -> Result<Value, HandlerError>;
}

/// Reference handler: reads `operation` and `data` from the body.
///
/// Operations: `echo`, `uppercase`, `reverse`, `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl CustomHandler for EchoHandler {
    async fn process(&self, body: Value, _message: &Message) -> Result<Value, HandlerError> {
        let operation = body
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let data = match body.get("data") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let output = match operation {
            "echo" => body.get("data").cloned().unwrap_or(Value::String(String::new())),
            "uppercase" => Value::String(data.to_uppercase()),
            "reverse" => Value::String(data.chars().rev().collect()),
            "error" => return Err(HandlerError::fatal("Test error")),
            other => Value::String(format!("Unknown operation: {}", other)),
        };

        Ok(json!({
            "output": output,
            "processed_at": now_millis(),
        }))
    }
}
