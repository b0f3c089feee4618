mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::time::{Duration, Instant};

use common::{harness, settle};
use sandbridge::protocol::EnvelopeId;
use sandbridge::{RELAY_TIMEOUT, TOPIC_MESSAGE_REQUEST};

#[tokio::test]
async fn relayed_message_round_trip() {
    let h = harness();
    let baseline = h.session.relay().listener_count();

    // Host side: the conversation pipeline answers every relayed message.
    let requests = Arc::clone(h.session.requests());
    h.session.relay().on(TOPIC_MESSAGE_REQUEST, move |payload| {
        let id = payload["correlationId"].as_str().unwrap().to_string();
        assert_eq!(payload["payload"]["text"], "book the flight");
        requests.resolve(&id, json!({ "disposition": "accepted" }));
    });

    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 21, "method": "ui/message",
                "params": { "text": "book the flight" } }),
    );
    settle().await;

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, Some(EnvelopeId::Number(21)));
    assert_eq!(sent[0].result.as_ref().unwrap()["disposition"], "accepted");

    // The per-call listener is gone; only the pipeline handler remains.
    assert_eq!(h.session.relay().listener_count(), baseline + 1);
    assert_eq!(h.session.requests().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_message_degrades_after_the_timeout() {
    let h = harness();
    let baseline = h.session.relay().listener_count();
    let started = Instant::now();

    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 7, "method": "ui/message",
                "params": { "text": "anyone home" } }),
    );
    tokio::time::sleep(RELAY_TIMEOUT + Duration::from_millis(1)).await;

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, Some(EnvelopeId::Number(7)));
    // Degraded result, not a protocol error: the host could not confirm.
    assert_eq!(sent[0].result, Some(json!({ "isError": true })));
    assert!(sent[0].error.is_none());
    assert!(started.elapsed() >= RELAY_TIMEOUT);

    assert_eq!(h.session.relay().listener_count(), baseline);
    assert_eq!(h.session.requests().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn message_without_params_is_invalid() {
    let h = harness();
    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 8, "method": "ui/message" }),
    );
    settle().await;

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].error.as_ref().unwrap().code,
        sandbridge::RpcError::INVALID_PARAMS
    );
}

#[tokio::test(start_paused = true)]
async fn message_accepted_just_before_teardown_cannot_arm_a_timer() {
    let h = harness();
    let started = Instant::now();

    // The handler task is spawned but teardown runs before it executes.
    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 41, "method": "ui/message",
                "params": { "n": 1 } }),
    );
    h.session.teardown();
    settle().await;

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, Some(EnvelopeId::Number(41)));
    assert_eq!(sent[0].result, Some(json!({ "isError": true })));
    // Settled without the clock moving: no 5 s timer was ever armed.
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(h.session.requests().pending_count(), 0);
    assert_eq!(h.session.relay().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_settles_in_flight_relays_without_timers() {
    let h = harness();
    let started = Instant::now();

    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 31, "method": "ui/message",
                "params": { "n": 1 } }),
    );
    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 32, "method": "ui/message",
                "params": { "n": 2 } }),
    );
    settle().await;
    assert_eq!(h.session.requests().pending_count(), 2);

    h.session.teardown();
    settle().await;

    // Both settle immediately with the degraded result; no 5 s timer had to
    // elapse for that to happen.
    assert!(started.elapsed() < RELAY_TIMEOUT);
    let sent = h.channel.sent();
    assert_eq!(sent.len(), 2);
    for envelope in &sent {
        assert_eq!(envelope.result, Some(json!({ "isError": true })));
    }
    assert_eq!(h.session.requests().pending_count(), 0);
    assert_eq!(h.session.relay().listener_count(), 0);

    // The torn-down instance ignores further traffic.
    h.session.accept(
        &h.guest,
        json!({ "jsonrpc": "2.0", "id": 33, "method": "ping" }),
    );
    settle().await;
    assert_eq!(h.channel.sent().len(), 2);
}
