//! JSON test vector loader shared by envelope/inbound tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;
use serde::Deserialize;
use sessionbus_core::protocol::inbound::InboundPayload;

#[derive(Debug, Deserialize)]
pub struct TestVector {
    pub description: String,
    pub frame: FrameData,
    #[serde(default)]
    pub expect: Option<serde_json::Value>,
    #[serde(default)]
    pub expect_error: Option<ExpectError>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectError {
    pub code: String,
}

/// `encoding` is `json` (frame given inline, handed over pre-parsed),
/// `text` or `binary` (frame given as a string, handed over raw).
#[derive(Debug, Deserialize)]
pub struct FrameData {
    pub encoding: String,
    pub data: serde_json::Value,
}

impl FrameData {
    pub fn payload(&self) -> InboundPayload {
        match self.encoding.as_str() {
            "json" => InboundPayload::Parsed(self.data.clone()),
            "text" => InboundPayload::Text(self.raw()),
            "binary" => InboundPayload::Binary(Bytes::from(self.raw().into_bytes())),
            other => panic!("unsupported encoding: {other}"),
        }
    }

    fn raw(&self) -> String {
        self.data.as_str().expect("raw frames are strings").to_string()
    }
}

pub fn load(name: &str) -> TestVector {
    let s = std::fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}
