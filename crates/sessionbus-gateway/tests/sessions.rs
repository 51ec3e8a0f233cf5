#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sessionbus_core::Event;
use sessionbus_gateway::dispatch::Dispatcher;
use sessionbus_gateway::sessions::{SessionDefaults, SessionRegistry};
use sessionbus_gateway::transport::Connection;

fn registry() -> SessionRegistry {
    SessionRegistry::new(
        Arc::new(Dispatcher::new()),
        SessionDefaults {
            debug: false,
            replay_backlog: 0,
            rpc_timeout: Duration::from_secs(1),
        },
    )
}

fn member() -> (Connection, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(8);
    (Connection::new(tx), rx)
}

#[tokio::test]
async fn joined_session_is_kept_until_its_last_member_leaves() {
    let sessions = registry();
    let (conn, _rx) = member();
    let conn_id = conn.id();

    let entry = sessions.join("s1", conn).unwrap();
    assert_eq!(entry.transport.member_count(), 1);
    assert!(!sessions.release_if_idle("s1").await);
    assert_eq!(sessions.len(), 1);

    entry.transport.unsubscribe_websocket(conn_id);
    assert!(sessions.release_if_idle("s1").await);
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn join_after_release_lands_in_a_live_session() {
    let sessions = registry();
    let stale = sessions.get_or_create("s1").unwrap();
    assert!(sessions.release_if_idle("s1").await);

    let (conn, mut rx) = member();
    let live = sessions.join("s1", conn).unwrap();

    assert!(!Arc::ptr_eq(&stale.transport, &live.transport));
    assert_eq!(stale.transport.member_count(), 0);
    assert!(Arc::ptr_eq(
        &sessions.get("s1").unwrap().transport,
        &live.transport
    ));

    live.hub
        .emit(&Event::new("notice.posted", "s1", json!({})))
        .await
        .unwrap();
    let Message::Text(text) = rx.try_recv().unwrap() else {
        panic!("expected a text frame");
    };
    let frame: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "notice.posted");
}
