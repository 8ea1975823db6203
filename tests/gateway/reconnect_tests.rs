//! Reconnect and Invalid Session Tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;

use crate::common::*;
use gateway_relay::gateway::ConnectionStage;
use gateway_relay::shared::GatewayError;

fn resume(session_id: &str, seq: u64) -> serde_json::Value {
    json!({"op": 6, "d": {"token": TEST_TOKEN, "session_id": session_id, "seq": seq}})
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_resumes_where_it_left_off() {
    let mut gw = TestGateway::new();
    let (tx, mut events) = event_channel();
    gw.client.on_dispatch("GUILD_CREATE", move |name, payload| {
        tx.send((name.to_string(), payload.clone()))?;
        Ok(())
    });

    let mut handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;

    server.hello(500).await;
    assert_eq!(server.expect_frame().await["op"], 2);
    server.push(ack());
    server.push(ready(1, "abc"));
    server.push(dispatch("GUILD_CREATE", 2, json!({"id": "42"})));

    let (_, guild) = events.recv().await.unwrap();
    assert_eq!(guild, json!({"id": "42"}));

    server.close(1006);
    server.expect_close().await;

    let mut replacement = gw.next_server().await;
    assert_eq!(replacement.expect_frame().await, resume("abc", 2));
    assert_eq!(handle.stage(), ConnectionStage::Resuming);

    // Hello on a resumed connection only starts heartbeats
    let beat = replacement.hello(500).await;
    assert_eq!(beat, json!({"op": 1, "d": 2}));
    replacement.push(dispatch("RESUMED", 3, json!({})));
    handle.wait_for_stage(ConnectionStage::Active).await.unwrap();
    assert!(replacement.try_frame().is_none());

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_replaces_the_connection() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;
    server.push(ready(4, "xyz"));
    server.push(json!({"op": 7, "d": null}));

    server.expect_close().await;
    let mut replacement = gw.next_server().await;
    assert_eq!(replacement.url, server.url);
    assert_eq!(replacement.expect_frame().await, resume("xyz", 4));

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_without_session_identifies_again() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;
    server.push(json!({"op": 7, "d": null}));

    server.expect_close().await;
    let mut replacement = gw.next_server().await;
    assert!(replacement.try_frame().is_none());
    assert_eq!(handle.stage(), ConnectionStage::AwaitingHello);

    let identify = replacement.hello_and_identify(45_000).await;
    assert_eq!(identify["d"]["token"], TEST_TOKEN);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_before_ready_identifies_again() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;

    server.close(1001);
    server.expect_close().await;

    let mut replacement = gw.next_server().await;
    assert!(replacement.try_frame().is_none());
    assert_eq!(handle.stage(), ConnectionStage::AwaitingHello);

    let identify = replacement.hello_and_identify(45_000).await;
    assert_eq!(identify["d"]["token"], TEST_TOKEN);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resumable_invalid_session_reconnects_with_resume() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;
    server.push(ready(2, "abc"));
    server.push(json!({"op": 9, "d": true}));

    server.expect_close().await;
    let mut replacement = gw.next_server().await;
    assert_eq!(replacement.expect_frame().await, resume("abc", 2));

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_non_resumable_invalid_session_terminates() {
    let mut gw = TestGateway::new();
    let mut handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;
    server.push(ready(2, "abc"));
    server.push(json!({"op": 9, "d": false}));

    server.expect_close().await;
    handle
        .wait_for_stage(ConnectionStage::Terminated)
        .await
        .unwrap();

    let outcome = handle.join().await;
    assert!(matches!(outcome, Err(GatewayError::SessionInvalidated)));
    assert!(outcome.unwrap_err().is_terminal());

    let session = gw.client.session();
    assert_eq!(session.session_id, None);
    assert_eq!(session.last_sequence, None);

    // No further connection attempts, even after the retry delay
    tokio::time::sleep(RECONNECT_DELAY * 10).await;
    assert!(!gw.has_pending_server());
}

#[tokio::test(start_paused = true)]
async fn test_failed_connection_attempt_retries_after_delay() {
    let mut gw = TestGateway::with_failures(2);
    let start = Instant::now();
    let handle = gw.client.connect().await.unwrap();

    let mut server = gw.next_server().await;
    let elapsed = start.elapsed();
    assert!(
        elapsed >= RECONNECT_DELAY * 2 && elapsed < RECONNECT_DELAY * 2 + Duration::from_millis(10),
        "retried after {:?}",
        elapsed
    );

    server.hello_and_identify(45_000).await;
    assert_eq!(handle.stage(), ConnectionStage::Active);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retry_delay() {
    let mut gw = TestGateway::with_failures(usize::MAX);
    let mut handle = gw.client.connect().await.unwrap();

    tokio::time::sleep(RECONNECT_DELAY / 2).await;
    handle.shutdown();
    handle
        .wait_for_stage(ConnectionStage::Disconnected)
        .await
        .unwrap();
    handle.join().await.unwrap();
    assert!(!gw.has_pending_server());
}
