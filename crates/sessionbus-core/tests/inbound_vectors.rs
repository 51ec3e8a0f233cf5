//! Inbound frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use sessionbus_core::protocol::control::ControlFrame;
use sessionbus_core::protocol::inbound::{decode, Inbound};

mod vector_loader;
use vector_loader::load;

#[test]
fn inbound_vectors() {
    let files = [
        "event_min.json",
        "event_full.json",
        "event_binary.json",
        "missing_session.json",
        "missing_type.json",
        "not_json.json",
        "ping.json",
        "pong.json",
    ];

    for f in files {
        let v = load(f);
        let res = decode(v.frame.payload());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.code().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let ex = v.expect.expect("missing expect block");
        match res.expect("expected ok frame") {
            Inbound::Event(ev) => {
                assert_eq!(ex["kind"], "event", "vector={}", v.description);
                assert_eq!(ev.event_type, ex["type"].as_str().unwrap(), "vector={}", v.description);
                assert_eq!(ev.session_id, ex["sessionId"].as_str().unwrap(), "vector={}", v.description);
                assert_eq!(ev.data, ex["data"], "vector={}", v.description);
                match ex.get("id").and_then(|id| id.as_str()) {
                    Some(id) => assert_eq!(ev.id, id, "vector={}", v.description),
                    None => assert!(!ev.id.is_empty(), "vector={}", v.description),
                }
            }
            Inbound::Control(frame) => {
                assert_eq!(ex["kind"], "control", "vector={}", v.description);
                let t = match frame {
                    ControlFrame::Ping { .. } => "ping",
                    ControlFrame::Pong { .. } => "pong",
                };
                assert_eq!(t, ex["type"].as_str().unwrap(), "vector={}", v.description);
            }
        }
    }
}
