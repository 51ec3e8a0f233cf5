#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sessionbus_core::protocol::control::ControlFrame;
use sessionbus_core::{Event, SessionBusError};
use sessionbus_gateway::config::ServerTransportConfig;
use sessionbus_gateway::transport::{
    Connection, ConnectionChange, ConnectionState, ServerTransport, Transport,
};

fn member(cap: usize) -> (Connection, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(cap);
    (Connection::new(tx), rx)
}

fn text_of(msg: Message) -> Value {
    match msg {
        Message::Text(s) => serde_json::from_str(&s).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

fn record_states(transport: &ServerTransport) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states: Arc<Mutex<Vec<ConnectionState>>> = Arc::default();
    let states_in = Arc::clone(&states);
    let _sub = transport.on_connection_change(Arc::new(move |c: &ConnectionChange| {
        states_in.lock().unwrap().push(c.state);
    }));
    states
}

#[tokio::test]
async fn broadcast_reaches_every_member() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    let (a, mut a_rx) = member(8);
    let (b, mut b_rx) = member(8);
    transport.subscribe_websocket(a);
    transport.subscribe_websocket(b);
    assert!(transport.is_ready());

    transport
        .send(&Event::new("chat.message", "s1", json!({ "text": "hi" })))
        .await
        .unwrap();

    for rx in [&mut a_rx, &mut b_rx] {
        let frame = text_of(rx.try_recv().unwrap());
        assert_eq!(frame["type"], "chat.message");
        assert_eq!(frame["sessionId"], "s1");
        assert_eq!(frame["data"]["text"], "hi");
    }
}

#[tokio::test]
async fn closed_members_are_pruned_during_send() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    let (live, mut live_rx) = member(8);
    let (dead, dead_rx) = member(8);
    transport.subscribe_websocket(live);
    transport.subscribe_websocket(dead);
    drop(dead_rx);

    transport.send(&Event::new("x", "s1", json!({}))).await.unwrap();

    assert_eq!(transport.member_count(), 1);
    assert!(live_rx.try_recv().is_ok());
}

#[tokio::test]
async fn state_changes_only_on_first_join_and_last_leave() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    let states = record_states(&transport);
    let (a, _a_rx) = member(1);
    let (b, _b_rx) = member(1);
    let (a_id, b_id) = (a.id(), b.id());

    transport.subscribe_websocket(a.clone());
    transport.subscribe_websocket(a);
    transport.subscribe_websocket(b);
    assert_eq!(transport.member_count(), 2);

    transport.unsubscribe_websocket(a_id);
    transport.unsubscribe_websocket(b_id);
    transport.unsubscribe_websocket(b_id);

    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connected, ConnectionState::Disconnected]
    );
    assert!(!transport.is_ready());
}

#[tokio::test]
async fn handle_message_forwards_events_and_drops_bad_frames() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen_in = Arc::clone(&seen);
    let _sub = transport.on_event(Arc::new(move |ev: Event| {
        let seen = Arc::clone(&seen_in);
        async move {
            seen.lock().unwrap().push(ev.event_type);
            Ok::<(), SessionBusError>(())
        }
    }));

    let parsed = json!({ "type": "a", "sessionId": "s1", "data": {} });
    assert!(transport.handle_message(parsed).await.is_none());
    assert!(transport
        .handle_message(r#"{"type":"b","sessionId":"s1"}"#)
        .await
        .is_none());
    assert!(transport.handle_message(r#"{"type":"c"}"#).await.is_none());
    assert!(transport.handle_message(r#"{"sessionId":"s1"}"#).await.is_none());
    assert!(transport.handle_message("not json").await.is_none());

    assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn handle_message_returns_control_frames() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    let ping = ControlFrame::ping().to_json().unwrap();

    let frame = transport.handle_message(ping).await;

    assert!(matches!(frame, Some(ControlFrame::Ping { .. })));
}

#[tokio::test]
async fn send_without_members_is_a_noop() {
    let transport = ServerTransport::new(ServerTransportConfig::new("s1")).unwrap();
    transport.send(&Event::new("x", "s1", json!({}))).await.unwrap();
    assert_eq!(transport.backlog_len(), 0);
}

#[tokio::test]
async fn backlog_replays_to_the_member_ending_an_empty_period() {
    let transport = ServerTransport::new(ServerTransportConfig {
        session_id: "s1".into(),
        replay_backlog: 2,
    })
    .unwrap();
    assert!(transport.is_ready());

    for n in 1..=3 {
        transport
            .send(&Event::new("tick", "s1", json!({ "n": n })))
            .await
            .unwrap();
    }
    assert_eq!(transport.backlog_len(), 2);

    let (late, mut late_rx) = member(8);
    transport.subscribe_websocket(late);

    assert_eq!(text_of(late_rx.try_recv().unwrap())["data"]["n"], 2);
    assert_eq!(text_of(late_rx.try_recv().unwrap())["data"]["n"], 3);
    assert!(late_rx.try_recv().is_err());
    assert_eq!(transport.backlog_len(), 0);
}

#[tokio::test]
async fn close_drops_members_and_backlog() {
    let transport = ServerTransport::new(ServerTransportConfig {
        session_id: "s1".into(),
        replay_backlog: 4,
    })
    .unwrap();
    transport.send(&Event::new("x", "s1", json!({}))).await.unwrap();
    let (a, _a_rx) = member(8);
    transport.subscribe_websocket(a);

    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert_eq!(transport.member_count(), 0);
    assert_eq!(transport.backlog_len(), 0);
}
