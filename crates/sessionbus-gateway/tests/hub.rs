#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::sync::{Arc, Mutex};

use serde_json::json;

use mock_transport::MockTransport;
use sessionbus_core::{Event, SessionBusError};
use sessionbus_gateway::config::HubConfig;
use sessionbus_gateway::hub::{EmitOptions, EventFilter, EventHub, EventListener, Subscription};

type Log = Arc<Mutex<Vec<String>>>;

fn hub(session: &str) -> EventHub {
    EventHub::new(HubConfig::new(session)).unwrap()
}

fn recorder(log: &Log, tag: &'static str) -> Arc<dyn EventListener> {
    let log = Arc::clone(log);
    Arc::new(move |ev: Event| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(format!("{tag}:{}", ev.event_type));
            Ok::<(), SessionBusError>(())
        }
    })
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn empty_session_id_is_rejected() {
    assert!(EventHub::new(HubConfig::new("  ")).is_err());
}

#[tokio::test]
async fn session_mismatch_fails_before_any_delivery() {
    let hub = hub("s1");
    let transport = MockTransport::new("mock");
    hub.register_transport(transport.clone());
    let log = Log::default();
    hub.on("chat.message", recorder(&log, "a"));

    let err = hub
        .emit(&Event::new("chat.message", "s2", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionBusError::SessionMismatch { .. }));
    assert_eq!(err.code().as_str(), "SESSION_MISMATCH");
    assert!(entries(&log).is_empty());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn emit_reaches_each_ready_transport_exactly_once() {
    let hub = hub("s1");
    let a = MockTransport::new("a");
    let b = MockTransport::new("b");
    let idle = MockTransport::new("idle");
    idle.set_ready(false);
    hub.register_transport(a.clone());
    hub.register_transport(b.clone());
    hub.register_transport(idle.clone());
    assert_eq!(hub.transport_count(), 3);

    hub.emit(&Event::new("chat.message", "s1", json!({ "text": "hi" })))
        .await
        .unwrap();

    assert_eq!(a.sent_types(), vec!["chat.message"]);
    assert_eq!(b.sent_types(), vec!["chat.message"]);
    assert!(idle.sent().is_empty());
}

#[tokio::test]
async fn failing_transport_does_not_block_others() {
    let hub = hub("s1");
    let bad = MockTransport::new("bad");
    bad.fail_sends(true);
    let good = MockTransport::new("good");
    hub.register_transport(bad.clone());
    hub.register_transport(good.clone());

    hub.emit(&Event::new("x", "s1", json!(null))).await.unwrap();

    assert_eq!(good.sent_types(), vec!["x"]);
}

#[tokio::test]
async fn typed_listeners_run_before_all_listeners_in_order() {
    let hub = hub("s1");
    let log = Log::default();
    hub.on("all", recorder(&log, "all"));
    hub.on("chat.message", recorder(&log, "first"));
    hub.on("chat.message", recorder(&log, "second"));
    hub.on("other", recorder(&log, "other"));

    hub.emit(&Event::new("chat.message", "s1", json!({}))).await.unwrap();

    assert_eq!(
        entries(&log),
        vec!["first:chat.message", "second:chat.message", "all:chat.message"]
    );
}

#[tokio::test]
async fn emit_options_scope_delivery() {
    let hub = hub("s1");
    let transport = MockTransport::new("mock");
    hub.register_transport(transport.clone());
    let log = Log::default();
    hub.on(EventFilter::All, recorder(&log, "l"));

    hub.emit_with(&Event::new("a", "s1", json!({})), EmitOptions::local_only())
        .await
        .unwrap();
    hub.emit_with(&Event::new("b", "s1", json!({})), EmitOptions::transport_only())
        .await
        .unwrap();

    assert_eq!(entries(&log), vec!["l:a"]);
    assert_eq!(transport.sent_types(), vec!["b"]);
}

#[tokio::test]
async fn failing_and_panicking_listeners_are_contained() {
    let hub = hub("s1");
    let log = Log::default();
    hub.on(
        "x",
        Arc::new(|_ev: Event| async move { Err::<(), _>(SessionBusError::Listener("boom".into())) }),
    );
    hub.on(
        "x",
        Arc::new(|ev: Event| async move {
            if ev.event_type == "x" {
                panic!("listener blew up");
            }
            Ok::<(), SessionBusError>(())
        }),
    );
    hub.on("x", recorder(&log, "survivor"));

    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();

    assert_eq!(entries(&log), vec!["survivor:x"]);
}

#[tokio::test]
async fn off_removes_every_registration_of_a_listener() {
    let hub = hub("s1");
    let log = Log::default();
    let listener = recorder(&log, "l");
    hub.on("x", Arc::clone(&listener));
    hub.on("x", Arc::clone(&listener));
    hub.on("x", recorder(&log, "other"));
    assert_eq!(hub.listener_count("x"), 3);

    hub.off("x", &listener);
    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();

    assert_eq!(hub.listener_count("x"), 1);
    assert_eq!(entries(&log), vec!["other:x"]);
}

#[tokio::test]
async fn subscription_handle_unsubscribes_once() {
    let hub = hub("s1");
    let log = Log::default();
    let sub = hub.on("x", recorder(&log, "l"));
    let copy = sub.clone();

    sub.unsubscribe();
    copy.unsubscribe();
    assert!(!sub.is_active());

    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();
    assert!(entries(&log).is_empty());
    assert_eq!(hub.listener_count("x"), 0);
}

#[tokio::test]
async fn unsubscribing_inside_a_callback_applies_after_the_pass() {
    let hub = hub("s1");
    let log = Log::default();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::default();

    let slot_in = Arc::clone(&slot);
    let log_in = Arc::clone(&log);
    let sub = hub.on(
        "x",
        Arc::new(move |_ev: Event| {
            let slot = Arc::clone(&slot_in);
            let log = Arc::clone(&log_in);
            async move {
                log.lock().unwrap().push("once".into());
                if let Some(sub) = slot.lock().unwrap().take() {
                    sub.unsubscribe();
                }
                Ok::<(), SessionBusError>(())
            }
        }),
    );
    *slot.lock().unwrap() = Some(sub);
    hub.on("x", recorder(&log, "later"));

    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();
    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();

    assert_eq!(entries(&log), vec!["once", "later:x", "later:x"]);
}

#[tokio::test]
async fn inbound_events_reach_local_listeners_without_echo() {
    let hub = hub("s1");
    let a = MockTransport::new("a");
    let b = MockTransport::new("b");
    hub.register_transport(a.clone());
    hub.register_transport(b.clone());
    let log = Log::default();
    hub.on("chat.message", recorder(&log, "l"));

    a.push_inbound(Event::new("chat.message", "s1", json!({}))).await;

    assert_eq!(entries(&log), vec!["l:chat.message"]);
    assert!(a.sent().is_empty());
    assert!(b.sent().is_empty());
}

#[tokio::test]
async fn inbound_events_for_another_session_are_dropped() {
    let hub = hub("s1");
    let transport = MockTransport::new("mock");
    hub.register_transport(transport.clone());
    let log = Log::default();
    hub.on("all", recorder(&log, "l"));

    transport
        .push_inbound(Event::new("chat.message", "other", json!({})))
        .await;

    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn unregistering_a_transport_detaches_it() {
    let hub = hub("s1");
    let transport = MockTransport::new("mock");
    let registration = hub.register_transport(transport.clone());
    assert_eq!(transport.listener_count(), 1);

    registration.unsubscribe();
    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();

    assert_eq!(hub.transport_count(), 0);
    assert_eq!(transport.listener_count(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn close_is_idempotent() {
    let hub = hub("s1");
    let transport = MockTransport::new("mock");
    hub.register_transport(transport.clone());
    let log = Log::default();
    hub.on("x", recorder(&log, "l"));

    hub.close().await;
    hub.close().await;

    assert_eq!(transport.closes(), 1);
    assert_eq!(hub.transport_count(), 0);
    assert_eq!(hub.listener_count("x"), 0);
    hub.emit(&Event::new("x", "s1", json!({}))).await.unwrap();
    assert!(entries(&log).is_empty());
}
