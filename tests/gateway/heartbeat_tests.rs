//! Heartbeat Tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;

use crate::common::*;
use gateway_relay::gateway::{ConnectionStage, OutboundFrame};

fn assert_elapsed(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(5),
        "expected ~{:?}, got {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_follow_the_hello_interval() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;

    let start = Instant::now();
    server.hello_and_identify(1_000).await;

    for (round, seq) in [(1u32, 7u64), (2, 8), (3, 9)] {
        server.push(ack());
        server.push(dispatch("MESSAGE_CREATE", seq, json!({})));

        let beat = server.expect_frame().await;
        assert_eq!(beat, json!({"op": 1, "d": seq}));
        assert_elapsed(start, Duration::from_millis(1_000) * round);
    }

    assert_eq!(handle.stage(), ConnectionStage::Active);
    assert!(!gw.has_pending_server());

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request_is_answered_immediately() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(45_000).await;
    server.push(ready(3, "abc"));

    let start = Instant::now();
    server.push(json!({"op": 1, "d": null}));

    assert_eq!(server.expect_frame().await, json!({"op": 1, "d": 3}));
    assert_eq!(start.elapsed(), Duration::ZERO);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_reconnects_and_resumes() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;

    let start = Instant::now();
    server.hello_and_identify(1_000).await;
    server.push(ready(1, "abc"));

    // The first beat is never acknowledged, so the tick at 1000ms must not
    // beat again; it closes the connection instead.
    server.expect_close().await;
    assert_elapsed(start, Duration::from_millis(1_000));

    let mut replacement = gw.next_server().await;
    assert_eq!(
        replacement.expect_frame().await,
        json!({"op": 6, "d": {"token": TEST_TOKEN, "session_id": "abc", "seq": 1}})
    );
    assert_eq!(handle.stage(), ConnectionStage::Resuming);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_hello_is_dropped() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;

    server.push(hello(0));
    server.push(json!({"op": 1, "d": null}));
    // Only the requested beat; no timer started and no Identify sent
    assert_eq!(server.expect_frame().await, json!({"op": 1, "d": null}));
    assert!(server.try_frame().is_none());
    assert_eq!(handle.stage(), ConnectionStage::AwaitingHello);

    // A valid Hello afterwards arms the missed-ack check as usual
    let start = Instant::now();
    server.hello_and_identify(1_000).await;
    server.expect_close().await;
    assert_elapsed(start, Duration::from_millis(1_000));

    let mut replacement = gw.next_server().await;
    assert!(replacement.try_frame().is_none());

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resumed_connection_keeps_beating() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(1_000).await;
    server.push(ready(1, "abc"));
    server.push(json!({"op": 7, "d": null}));
    server.expect_close().await;

    let mut replacement = gw.next_server().await;
    assert_eq!(replacement.expect_frame().await["op"], 6);

    let start = Instant::now();
    replacement.hello(1_000).await;
    replacement.push(ack());
    replacement.push(dispatch("RESUMED", 2, json!({})));

    // A full interval later the scheduler beats rather than declaring the
    // fresh connection dead.
    let beat = replacement.expect_frame().await;
    assert_eq!(beat, json!({"op": 1, "d": 2}));
    assert_elapsed(start, Duration::from_millis(1_000));
    assert!(server.try_frame().is_none());
    assert!(!gw.has_pending_server());

    handle.shutdown();
    replacement.expect_close().await;
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_stop_when_the_connection_closes() {
    let mut gw = TestGateway::new();
    let handle = gw.client.connect().await.unwrap();
    let mut server = gw.next_server().await;
    server.hello_and_identify(1_000).await;

    server.close(4000);
    server.expect_close().await;
    let _replacement = gw.next_server().await;

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    match server.try_frame() {
        None => {}
        Some(OutboundFrame::Text(text)) => panic!("heartbeat after close: {}", text),
        Some(other) => panic!("unexpected frame after close: {:?}", other),
    }

    handle.shutdown();
    handle.join().await.unwrap();
}
