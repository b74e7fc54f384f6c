//! # Gateway Session Tests
//!
//! Admission, rate limiting and shutdown of WebSocket subscribers against a
//! gateway listening on a real socket.

use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use lib_common::core::{ActivationEvent, Dispatcher, LocationKey, RateLimiter};
use lib_common::gateway::{RATE_LIMIT_TEXT, SHUTDOWN_REASON, UNAUTHORIZED_REASON, WELCOME_TEXT};

use project_tests::*;

fn event(key: &str) -> ActivationEvent {
    ActivationEvent {
        key: LocationKey::new(key),
        detected_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_valid_token_receives_welcome() {
    let gateway = start_gateway(RateLimiter::default()).await;

    let mut client = connect(gateway.addr, Some(TOKEN)).await;

    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);
    assert_eq!(gateway.registry.len(), 1);
}

#[tokio::test]
async fn test_wrong_token_is_closed_with_policy_violation() {
    let gateway = start_gateway(RateLimiter::default()).await;

    let mut client = connect(gateway.addr, Some("not-the-token")).await;

    assert_eq!(expect_close(&mut client).await, (1008, UNAUTHORIZED_REASON.to_string()));
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_missing_token_is_closed_with_policy_violation() {
    let gateway = start_gateway(RateLimiter::default()).await;

    let mut client = connect(gateway.addr, None).await;

    assert_eq!(expect_close(&mut client).await, (1008, UNAUTHORIZED_REASON.to_string()));
}

#[tokio::test]
async fn test_broadcast_reaches_only_authorized_clients() {
    let gateway = start_gateway(RateLimiter::default()).await;
    let dispatcher = Dispatcher::new(gateway.registry.clone());

    let mut good = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut good).await, WELCOME_TEXT);
    let mut bad = connect(gateway.addr, Some("guess")).await;
    expect_close(&mut bad).await;

    let report = dispatcher.broadcast(&event("A1"));

    assert_eq!(report.delivered, 1);
    assert_eq!(next_text(&mut good).await, "New \u{2694}\u{FE0F} detected at location: A1");
    assert!(next_frame(&mut bad).await.is_none());
}

#[tokio::test]
async fn test_excess_messages_get_advisory_and_connection_stays_open() {
    let gateway = start_gateway(RateLimiter::new(Duration::from_secs(60), 2)).await;
    let dispatcher = Dispatcher::new(gateway.registry.clone());

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);

    for i in 0..3 {
        client.send(Message::text(format!("ping {}", i))).await.unwrap();
    }

    assert_eq!(next_text(&mut client).await, RATE_LIMIT_TEXT);
    assert!(stays_quiet(&mut client, Duration::from_millis(200)).await);

    dispatcher.broadcast(&event("B2"));
    assert_eq!(next_text(&mut client).await, "New \u{2694}\u{FE0F} detected at location: B2");
}

#[tokio::test]
async fn test_disconnect_forgets_connection() {
    let gateway = start_gateway(RateLimiter::default()).await;

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);
    client.close(None).await.unwrap();

    let registry = gateway.registry.clone();
    assert!(eventually(|| registry.is_empty()).await);
}

#[tokio::test]
async fn test_drain_closes_clients_and_refuses_new_ones() {
    let gateway = start_gateway(RateLimiter::default()).await;

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);

    assert!(gateway.state.drain(Duration::from_secs(2)).await);
    assert_eq!(expect_close(&mut client).await, (1001, SHUTDOWN_REASON.to_string()));

    let mut late = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(expect_close(&mut late).await, (1001, SHUTDOWN_REASON.to_string()));

    gateway.state.shutdown_token().cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(2), gateway.server).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
}
