//! Randomized operations against a standard simulated mesh.
//!
//! Operations are generated by proptest or the fuzzer and applied to a
//! [`SimWorld`] built by [`standard_world`]. Indices are reduced modulo the
//! fixed vocabularies below, so every generated value maps to something
//! meaningful.

use std::time::Duration;

use arbitrary::Arbitrary;
use meshlink_client::{ClientError, FetchOptions, OperationId};
use meshlink_proto::Payload;
use serde_json::json;

use crate::{
    sim_device::{ChunkOrder, Route, SimDevice, StreamingBehavior},
    world::SimWorld,
};

/// Devices in the standard world.
pub const DEVICE_COUNT: u8 = 3;

/// Topics operations publish on.
pub const TOPICS: [&str; 4] = ["sensors/kitchen/temp", "sensors/hall/temp", "lights/set", "alarm"];

/// Filters operations subscribe with.
pub const FILTERS: [&str; 5] = ["sensors/+/temp", "sensors/#", "#", "lights/set", "+"];

/// Routes every standard device serves.
pub const ROUTES: [&str; 4] = ["/status", "/dump", "/slow", "/missing"];

/// Body of the chunked `/dump` route.
pub const DUMP_BODY: &str = "0123456789abcdefghij";

/// Peer id of standard device `index`.
pub fn device_peer(index: u8) -> String {
    format!("SSG_{}", index % DEVICE_COUNT)
}

/// Uuid of standard device `index`.
pub fn device_uuid(index: u8) -> String {
    format!("dev-{}", index % DEVICE_COUNT)
}

/// Standard device `index`: `/status` single, `/dump` chunked in reverse,
/// `/slow` silent. The last device ignores stream requests.
pub fn standard_device(index: u8) -> SimDevice {
    let index = index % DEVICE_COUNT;
    let streaming = if index == DEVICE_COUNT - 1 {
        StreamingBehavior::Ignore
    } else {
        StreamingBehavior::CallBack
    };

    SimDevice::new(device_peer(index), device_uuid(index))
        .route("GET", "/status", Route::ok(json!({"ok": true, "device": index})))
        .route("GET", "/dump", Route::chunked(DUMP_BODY, 6, ChunkOrder::Reversed))
        .route("GET", "/slow", Route::silent())
        .with_streaming(streaming)
}

/// Started world with every standard device registered plus one non-device
/// member.
pub fn standard_world(seed: u64) -> SimWorld {
    let mut world = SimWorld::new(seed);
    for index in 0..DEVICE_COUNT {
        world.add_device(standard_device(index));
    }
    world.add_member("viewer");

    if let Err(e) = world.start() {
        tracing::warn!("Standard world failed to start: {}", e);
    }
    world
}

/// One step of a randomized run.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Publish on `TOPICS[topic]`.
    Publish {
        /// Topic index.
        topic: u8,
        /// Object payload instead of text.
        structured: bool,
    },
    /// Subscribe to `FILTERS[filter]`.
    Subscribe {
        /// Filter index.
        filter: u8,
    },
    /// Unsubscribe from `FILTERS[filter]`.
    Unsubscribe {
        /// Filter index.
        filter: u8,
    },
    /// Fetch `ROUTES[route]` from a device.
    Fetch {
        /// Device index.
        device: u8,
        /// Route index.
        route: u8,
    },
    /// Ask a device to stream.
    RequestStreaming {
        /// Device index.
        device: u8,
    },
    /// Stop a device's stream.
    StopStreaming {
        /// Device index.
        device: u8,
    },
    /// Stream to a device.
    SendStream {
        /// Device index.
        device: u8,
    },
    /// The device hangs up its calls.
    HangUp {
        /// Device index.
        device: u8,
    },
    /// The device's data connection drops.
    Disconnect {
        /// Device index.
        device: u8,
    },
    /// The device (re)joins the room.
    Rejoin {
        /// Device index.
        device: u8,
    },
    /// The device publishes on `TOPICS[topic]`.
    DevicePublish {
        /// Device index.
        device: u8,
        /// Topic index.
        topic: u8,
    },
    /// The device sends arbitrary bytes.
    InjectFrame {
        /// Device index.
        device: u8,
        /// Raw frame.
        frame: Vec<u8>,
    },
    /// Advance virtual time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

impl Operation {
    /// Apply to `world`. Returns the deferred operation id, if any.
    ///
    /// # Errors
    ///
    /// Returns the client's synchronous rejection.
    pub fn apply(&self, world: &mut SimWorld) -> Result<Option<OperationId>, ClientError> {
        match self {
            Self::Publish { topic, structured } => {
                let topic = pick(&TOPICS, *topic);
                if *structured {
                    world.publish(topic, json!({"value": 1}))?;
                } else {
                    world.publish(topic, "value")?;
                }
                Ok(None)
            },
            Self::Subscribe { filter } => {
                world.subscribe(pick(&FILTERS, *filter));
                Ok(None)
            },
            Self::Unsubscribe { filter } => {
                world.unsubscribe(pick(&FILTERS, *filter));
                Ok(None)
            },
            Self::Fetch { device, route } => {
                let target = format!("{}{}", device_uuid(*device), pick(&ROUTES, *route));
                world.fetch(&target, &FetchOptions::default()).map(Some)
            },
            Self::RequestStreaming { device } => {
                world.request_streaming(&device_uuid(*device)).map(Some)
            },
            Self::StopStreaming { device } => world.stop_streaming(&device_uuid(*device)).map(Some),
            Self::SendStream { device } => world.send_stream(&device_uuid(*device)).map(Some),
            Self::HangUp { device } => {
                world.hang_up(&device_peer(*device));
                Ok(None)
            },
            Self::Disconnect { device } => {
                world.disconnect(&device_peer(*device));
                Ok(None)
            },
            Self::Rejoin { device } => {
                if !world.is_open(&device_peer(*device)) {
                    world.add_device(standard_device(*device));
                }
                Ok(None)
            },
            Self::DevicePublish { device, topic } => {
                world.device_publish(
                    &device_peer(*device),
                    pick(&TOPICS, *topic),
                    Payload::from("reading"),
                );
                Ok(None)
            },
            Self::InjectFrame { device, frame } => {
                world.inject(&device_peer(*device), frame.clone());
                Ok(None)
            },
            Self::AdvanceTime { millis } => {
                world.advance(Duration::from_millis(u64::from(*millis)));
                Ok(None)
            },
        }
    }
}

fn pick<'a>(items: &[&'a str], index: u8) -> &'a str {
    items[usize::from(index) % items.len()]
}
