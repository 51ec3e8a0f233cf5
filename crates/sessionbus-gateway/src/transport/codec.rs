//! Server-side socket frame classification.
//!
//! Text and binary frames become [`InboundPayload`]s for the session's
//! server transport; ping/pong/close are surfaced for lifecycle handling.

use axum::extract::ws::Message;
use bytes::Bytes;

use sessionbus_core::protocol::inbound::InboundPayload;

#[derive(Debug)]
pub enum Frame {
    Payload(InboundPayload),
    Ping(Vec<u8>),
    Pong,
    Close,
}

pub fn decode(msg: Message) -> Frame {
    match msg {
        Message::Text(s) => Frame::Payload(InboundPayload::from(s)),
        Message::Binary(b) => Frame::Payload(InboundPayload::from(Bytes::from(b))),
        Message::Ping(v) => Frame::Ping(v),
        Message::Pong(_) => Frame::Pong,
        Message::Close(_) => Frame::Close,
    }
}
