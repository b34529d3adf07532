//! Ingress API round-trips through the SDK client.

use std::time::Duration;

use mediator_sdk::{MediatorClient, ResponseState, SubmitRequest};
use queue_mediator::{Mediator, StartOptions};
use serde_json::json;

mod common;

async fn start() -> (Mediator, MediatorClient) {
    let mut config = common::handler_config();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let options = StartOptions {
        ingress: true,
        ..common::quiet()
    };
    let mediator = Mediator::start(config, options).await.unwrap();
    let addr = mediator.ingress_addr().unwrap();
    (mediator, MediatorClient::new(&format!("http://{}", addr)))
}

#[tokio::test]
async fn test_submit_and_fetch_result() {
    let (mediator, client) = start().await;

    let submitted = client
        .submit(&SubmitRequest::new(json!({"operation": "reverse", "data": "abc"})).metadata("type", "demo"))
        .await
        .unwrap();
    assert_eq!(submitted.status, "PENDING");
    assert!(!submitted.correlation_id.is_empty());

    let result = client
        .wait_for_result(&submitted.correlation_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.status, "COMPLETED");
    assert_eq!(result.body.unwrap()["output"], "cba");

    let status = client.status(&submitted.correlation_id).await.unwrap().unwrap();
    assert_eq!(status.status, "COMPLETED");
    assert!(status.updated_at >= status.submitted_at);

    mediator.stop().await;
}

#[tokio::test]
async fn test_handler_failure_is_reported_later() {
    let (mediator, client) = start().await;

    let submitted = client
        .submit(&SubmitRequest::new(json!({"operation": "error"})).correlation_id("fail-1"))
        .await
        .unwrap();
    assert_eq!(submitted.correlation_id, "fail-1");

    let result = client
        .wait_for_result("fail-1", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.status, "FAILED");
    assert!(result.error.unwrap().contains("Test error"));
    assert_eq!(mediator.queue().snapshot("mediator-dlq").len(), 1);

    mediator.stop().await;
}

#[tokio::test]
async fn test_unknown_id_and_health() {
    let (mediator, client) = start().await;

    assert!(client.status("missing").await.unwrap().is_none());
    assert!(matches!(
        client.response("missing").await.unwrap(),
        ResponseState::NotFound
    ));

    let health = client.health().await.unwrap();
    assert_eq!(health["status"], "healthy");

    mediator.stop().await;
}
