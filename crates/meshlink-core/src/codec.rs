//! Inbound frame classification.
//!
//! Every data-channel frame is decoded exactly once into an [`Inbound`]:
//!
//! 1. Control-prefixed text is a control frame.
//! 2. Anything else must be a JSON envelope.
//! 3. An envelope whose topic matches a subscription is a pub/sub message.
//!    Subscriptions are checked before the reply shape, so a subscriber to a
//!    device uuid sees its replies as messages.
//! 4. An envelope whose payload carries `transaction_id` is an RPC reply.
//! 5. Everything else is unrecognized and dropped by the caller.

use meshlink_proto::{ControlFrame, Envelope, FrameData, RpcReply};

use crate::topic::SubscriptionSet;

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake, keepalive or streaming signaling.
    Control(ControlFrame),
    /// Envelope whose topic matched a subscription.
    Message(Envelope),
    /// Correlated reply to an RPC request.
    RpcReply(RpcReply),
    /// Frame that could not be routed.
    Unrecognized(Unrecognized),
}

/// Why a frame could not be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unrecognized {
    /// Binary frame that is not UTF-8 text.
    NotText,
    /// Text that failed to parse as a control frame or envelope.
    Malformed {
        /// Parser error description.
        reason: String,
    },
    /// Payload carried `transaction_id` but not a usable reply shape.
    BadReply {
        /// Parser error description.
        reason: String,
    },
    /// Well-formed envelope that nobody subscribed to.
    NoSubscriber {
        /// Envelope topic.
        topic: String,
    },
}

/// Classify one inbound frame against the current subscriptions.
pub fn classify(data: &FrameData, subscriptions: &SubscriptionSet) -> Inbound {
    let Ok(text) = data.as_text() else {
        return Inbound::Unrecognized(Unrecognized::NotText);
    };

    match ControlFrame::decode(text) {
        Ok(Some(frame)) => return Inbound::Control(frame),
        Ok(None) => {},
        Err(err) => {
            return Inbound::Unrecognized(Unrecognized::Malformed { reason: err.to_string() });
        },
    }

    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            return Inbound::Unrecognized(Unrecognized::Malformed { reason: err.to_string() });
        },
    };

    if subscriptions.matches_any(&envelope.topic) {
        return Inbound::Message(envelope);
    }

    if RpcReply::is_reply(&envelope.payload) {
        return match RpcReply::from_payload(&envelope.payload) {
            Ok(reply) => Inbound::RpcReply(reply),
            Err(err) => Inbound::Unrecognized(Unrecognized::BadReply { reason: err.to_string() }),
        };
    }

    Inbound::Unrecognized(Unrecognized::NoSubscriber { topic: envelope.topic })
}
