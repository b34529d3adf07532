//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound outbound calls and handler invocations by a deadline
//! - Pick the effective timeout from route, endpoint and worker settings
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry,
//!   which cancels the in-flight request
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;

/// Run `fut` with a deadline of `limit`.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await
}

/// First configured timeout wins: route, then endpoint, then the worker default.
pub fn effective_timeout(
    route: Option<Duration>,
    endpoint_secs: Option<u64>,
    worker_default: Duration,
) -> Duration {
    route
        .or_else(|| endpoint_secs.map(Duration::from_secs))
        .unwrap_or(worker_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_millis(100), async { 7 }).await;
        assert_eq!(ok.unwrap(), 7);

        let slow = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(slow.is_err());
    }

    #[test]
    fn test_effective_timeout_precedence() {
        let worker = Duration::from_secs(300);
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(1)), Some(5), worker),
            Duration::from_secs(1)
        );
        assert_eq!(effective_timeout(None, Some(5), worker), Duration::from_secs(5));
        assert_eq!(effective_timeout(None, None, worker), worker);
    }
}
