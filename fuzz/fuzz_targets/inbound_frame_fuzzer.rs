//! Fuzz target for inbound frame classification
//!
//! Every frame a peer sends goes through `classify` before any state
//! machine sees it, so it must hold up against arbitrary input.
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary binary and text frames
//! - Shaped frames: control-prefixed bodies and envelopes with fuzzed
//!   topics and reply fields
//! - Subscriptions: fuzzed filters, including wildcards
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Non-UTF-8 frames are `NotText`
//! - Control-prefixed frames never classify as messages or replies
//! - A message's topic matches at least one subscription
//! - A reply is only produced for unsubscribed topics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use meshlink_core::{
    codec::{classify, Inbound, Unrecognized},
    topic::{matches, SubscriptionSet},
};
use meshlink_proto::{ControlFrame, FrameData, CONTROL_PREFIX};

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedFrame {
    Raw(Vec<u8>),
    Text(String),
    Control(String),
    Envelope { topic: String, payload: FuzzedPayload },
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedPayload {
    Text(String),
    Reply { status: Option<u16>, transaction_id: u64, body: String },
    Chunk { transaction_id: u64, total: i16, index: i16, chunk: String },
    Garbage(String),
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    filters: Vec<String>,
    frames: Vec<FuzzedFrame>,
}

fuzz_target!(|input: FuzzInput| {
    let mut subscriptions = SubscriptionSet::new();
    for filter in input.filters.iter().take(8) {
        subscriptions.insert(filter.clone());
    }

    for fuzzed in &input.frames {
        let data = frame_data(fuzzed);
        let text = data.as_text().ok().map(str::to_string);

        match classify(&data, &subscriptions) {
            Inbound::Unrecognized(Unrecognized::NotText) => {
                assert!(text.is_none(), "valid UTF-8 classified as NotText");
            },
            Inbound::Control(frame) => {
                let text = text.as_deref().unwrap_or_default();
                assert!(ControlFrame::is_control(text));
                // Re-encoding must stay a control frame.
                assert!(ControlFrame::is_control(&frame.encode()));
            },
            Inbound::Message(envelope) => {
                assert!(!is_control(&text));
                assert!(
                    subscriptions.iter().any(|filter| matches(&envelope.topic, filter)),
                    "message on {:?} matched no subscription",
                    envelope.topic
                );
            },
            Inbound::RpcReply(_) => {
                assert!(!is_control(&text));
            },
            Inbound::Unrecognized(Unrecognized::NoSubscriber { topic }) => {
                assert!(!subscriptions.matches_any(&topic));
            },
            Inbound::Unrecognized(_) => {},
        }
    }
});

fn is_control(text: &Option<String>) -> bool {
    text.as_deref().is_some_and(ControlFrame::is_control)
}

fn frame_data(fuzzed: &FuzzedFrame) -> FrameData {
    match fuzzed {
        FuzzedFrame::Raw(bytes) => FrameData::from(bytes.clone()),
        FuzzedFrame::Text(text) => FrameData::from(text.clone()),
        FuzzedFrame::Control(body) => FrameData::from(format!("{CONTROL_PREFIX}{body}")),
        FuzzedFrame::Envelope { topic, payload } => {
            let topic = escape(topic);
            let payload = match payload {
                FuzzedPayload::Text(text) => format!("\"{}\"", escape(text)),
                FuzzedPayload::Reply { status, transaction_id, body } => {
                    let status = status.map_or_else(|| "null".to_string(), |s| s.to_string());
                    format!(
                        r#"{{"status":{status},"transaction_id":{transaction_id},"body":"{}"}}"#,
                        escape(body)
                    )
                },
                FuzzedPayload::Chunk { transaction_id, total, index, chunk } => format!(
                    r#"{{"status":200,"transaction_id":{transaction_id},"chunked":true,"chunk_len":{total},"idx":{index},"chunk":"{}"}}"#,
                    escape(chunk)
                ),
                FuzzedPayload::Garbage(raw) => raw.clone(),
            };
            FrameData::from(format!(r#"{{"topic":"{topic}","payload":{payload}}}"#))
        },
    }
}

fn escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            c if c.is_control() => Vec::new(),
            c => vec![c],
        })
        .collect()
}
