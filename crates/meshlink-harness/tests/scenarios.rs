//! End-to-end scenarios against the simulated mesh.
//!
//! Each test builds a small world, drives the real client through it, and
//! checks both the observable outcome and the world invariants.

use std::time::Duration;

use meshlink_client::{
    ClientConfig, ClientError, ClientState, Completion, FetchOptions, Notification,
    StreamingOutcome,
};
use meshlink_harness::{ChunkOrder, LOCAL_PEER_ID, Route, SimDevice, SimWorld, StreamingBehavior};
use meshlink_proto::{CallId, DeviceProfile, Payload, RpcReply};
use serde_json::json;

fn sensor() -> SimDevice {
    SimDevice::new("SSG_1", "abc")
        .route("PUT", "/led/on", Route::ok("OK"))
        .route("GET", "/sensors/dump", Route::chunked("aaabbbccc", 3, ChunkOrder::Custom(vec![2, 0, 1])))
        .route("GET", "/slow", Route::silent())
}

fn started_world(devices: Vec<SimDevice>) -> SimWorld {
    let mut world = SimWorld::with_config(42, ClientConfig::for_room("r1"));
    for device in devices {
        world.add_device(device);
    }
    world.start().unwrap();
    assert_eq!(world.client().state(), ClientState::Started);
    world
}

fn connected_uuids(world: &SimWorld) -> Vec<String> {
    world
        .notifications()
        .iter()
        .filter_map(|n| match n {
            Notification::DeviceConnected { uuid, .. } => Some(uuid.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn handshake_reports_exact_profile() {
    let body = json!({"uuid": "abc", "peerId": "P1", "name": "sensor"});
    let profile = DeviceProfile::from_body(body).unwrap();
    let world = started_world(vec![SimDevice::new("SSG_1", "abc").with_profile(profile.clone())]);

    let reported = world.notifications().iter().find_map(|n| match n {
        Notification::DeviceConnected { uuid, profile } => Some((uuid.clone(), profile.clone())),
        _ => None,
    });

    assert_eq!(reported, Some(("abc".to_string(), profile)));
    assert!(world.client().has_device("abc"));
    world.check_invariants().unwrap();
}

#[test]
fn single_frame_reply_settles_fetch() {
    let mut world = started_world(vec![sensor()]);

    let op = world.fetch("abc/led/on", &FetchOptions::default().with_method("PUT")).unwrap();

    let response = world.fetch_result(op).unwrap().as_ref().unwrap();
    assert_eq!(response.status(), Some(200));
    assert_eq!(response.method(), Some("PUT"));
    assert_eq!(response.text(), "OK");

    let request = &world.device("SSG_1").unwrap().requests()[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.path, "/led/on");
    assert_eq!(response.transaction_id(), request.transaction_id);
    world.check_invariants().unwrap();
}

#[test]
fn chunked_reply_reassembles_by_index() {
    let mut world = started_world(vec![sensor()]);

    let op = world.fetch("abc/sensors/dump", &FetchOptions::default()).unwrap();

    let response = world.fetch_result(op).unwrap().as_ref().unwrap();
    assert_eq!(response.text(), "aaabbbccc");
    assert_eq!(world.client().partial_replies(), 0);
    assert_eq!(world.client().pending_fetches(), 0);
}

#[test]
fn fetch_to_unknown_device_rejects_immediately() {
    let mut world = started_world(vec![sensor()]);
    let before = world.env().elapsed();

    let result = world.fetch("missing/x", &FetchOptions::default());

    assert!(matches!(result, Err(ClientError::NoConnection { ref uuid }) if uuid == "missing"));
    assert_eq!(world.env().elapsed(), before);
    assert!(world.completions().is_empty());
}

#[test]
fn streaming_timeout_does_not_bind_later_call() {
    let device = sensor().with_streaming(StreamingBehavior::Ignore);
    let mut world = started_world(vec![device]);

    let op = world.request_streaming("abc").unwrap();
    world.advance(Duration::from_millis(2_999));
    assert!(world.completion(op).is_none());

    world.advance(Duration::from_millis(1));
    let result = world.streaming_result(op).unwrap();
    assert!(matches!(result, Err(e) if e.is_timeout()));

    let call_id = world.device_call("SSG_1");
    assert!(world.notifications().contains(&Notification::UnclaimedCall {
        call_id,
        peer_id: "SSG_1".to_string(),
    }));
    assert_eq!(world.completions_for(op).len(), 1);
    world.check_invariants().unwrap();
}

#[test]
fn member_joining_after_start_is_connected() {
    let mut world = started_world(vec![sensor()]);

    world.add_device(SimDevice::new("SSG_2", "def"));

    assert_eq!(connected_uuids(&world), ["abc", "def"]);
    assert!(world.is_open("SSG_2"));
    world.check_invariants().unwrap();
}

#[test]
fn non_device_members_are_ignored() {
    let mut world = SimWorld::with_config(1, ClientConfig::for_room("r1"));
    world.add_device(sensor());
    world.add_member("viewer-7");
    world.start().unwrap();

    assert!(!world.is_open("viewer-7"));
    assert_eq!(world.client().devices().count(), 1);
}

#[test]
fn duplicate_uuid_replaces_older_registration() {
    let mut world = started_world(vec![sensor()]);

    world.add_device(SimDevice::new("SSG_9", "abc"));

    let devices: Vec<_> = world.client().devices().collect();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].peer_id(), "SSG_9");
    world.check_invariants().unwrap();
}

#[test]
fn publish_reaches_every_device() {
    let mut world = started_world(vec![sensor(), SimDevice::new("SSG_2", "def")]);

    world.publish("lights/set", json!({"level": 3})).unwrap();

    for peer in ["SSG_1", "SSG_2"] {
        let published = world.device(peer).unwrap().published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "lights/set");
    }
}

#[test]
fn device_publish_is_delivered_only_while_subscribed() {
    let mut world = started_world(vec![sensor()]);
    assert!(world.subscribe("sensors/+/temp"));

    world.device_publish("SSG_1", "sensors/kitchen/temp", Payload::from("21.5"));
    world.device_publish("SSG_1", "sensors/kitchen/humidity", Payload::from("40"));
    assert!(world.unsubscribe("sensors/+/temp"));
    world.device_publish("SSG_1", "sensors/hall/temp", Payload::from("19.0"));

    let messages: Vec<_> = world
        .notifications()
        .iter()
        .filter_map(|n| match n {
            Notification::Message { topic, .. } => Some(topic.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(messages, ["sensors/kitchen/temp"]);
}

#[test]
fn keepalives_follow_the_interval() {
    let mut world = started_world(vec![sensor()]);

    world.advance_by_steps(Duration::from_secs(60), Duration::from_secs(1));

    assert_eq!(world.device("SSG_1").unwrap().keepalives(), 2);
    let keepalive = format!("SSG:keepalive,{LOCAL_PEER_ID}");
    assert!(world.sent_to("SSG_1").any(|frame| frame == keepalive));
}

#[test]
fn keepalives_stop_after_disconnect() {
    let mut world = started_world(vec![sensor()]);

    world.disconnect("SSG_1");
    world.advance_by_steps(Duration::from_secs(60), Duration::from_secs(5));

    assert_eq!(world.device("SSG_1").unwrap().keepalives(), 0);
    assert!(world
        .notifications()
        .contains(&Notification::DeviceDisconnected { uuid: "abc".to_string() }));
    world.check_invariants().unwrap();
}

#[test]
fn silent_room_fails_bootstrap() {
    let mut world = SimWorld::new(3);
    world.silence_room();
    world.start().unwrap();

    world.advance(Duration::from_secs(10));

    assert!(world.client().is_failed());
    assert!(world
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::StartFailed { error } if error.is_timeout())));
}

#[test]
fn fetch_to_silent_route_times_out() {
    let mut world = started_world(vec![sensor()]);

    let op = world.fetch("abc/slow", &FetchOptions::default()).unwrap();
    world.advance(Duration::from_millis(2_999));
    assert!(world.completion(op).is_none());

    world.advance(Duration::from_millis(1));
    assert!(matches!(world.fetch_result(op), Some(Err(e)) if e.is_timeout()));
    assert_eq!(world.client().pending_fetches(), 0);
}

#[test]
fn late_reply_after_timeout_is_dropped() {
    let mut world = started_world(vec![sensor()]);

    let op = world
        .fetch("abc/slow", &FetchOptions::default().with_timeout(Duration::from_millis(500)))
        .unwrap();
    world.advance(Duration::from_millis(500));

    let device = world.device("SSG_1").unwrap();
    let transaction_id = device.requests()[0].transaction_id;
    let late = device
        .encode_reply(&RpcReply::Complete {
            status: Some(200),
            transaction_id,
            method: Some("GET".to_string()),
            body: json!("late"),
        })
        .unwrap();
    world.inject("SSG_1", late);

    assert_eq!(world.completions_for(op).len(), 1);
    assert!(matches!(world.fetch_result(op), Some(Err(e)) if e.is_timeout()));
    world.check_invariants().unwrap();
}

#[test]
fn partial_chunks_are_released_on_timeout() {
    let device = SimDevice::new("SSG_1", "abc").route(
        "GET",
        "/dump",
        Route::chunked("aaabbbccc", 3, ChunkOrder::Custom(vec![0, 2])),
    );
    let mut world = started_world(vec![device]);

    let op = world.fetch("abc/dump", &FetchOptions::default()).unwrap();
    assert_eq!(world.client().partial_replies(), 1);

    world.advance(Duration::from_secs(3));

    assert!(matches!(world.fetch_result(op), Some(Err(e)) if e.is_timeout()));
    assert_eq!(world.client().partial_replies(), 0);
}

#[test]
fn streaming_start_and_stop() {
    let mut world = started_world(vec![sensor()]);

    let start = world.request_streaming("abc").unwrap();
    let Some(Ok(StreamingOutcome::Started { uuid, call_id })) = world.streaming_result(start)
    else {
        panic!("expected started, got {:?}", world.completion(start));
    };
    assert_eq!(uuid, "abc");
    assert_eq!(world.device("SSG_1").unwrap().streaming_to(), Some(LOCAL_PEER_ID));
    assert_eq!(world.client().device("abc").unwrap().call(), Some(*call_id));

    let stop = world.stop_streaming("abc").unwrap();

    assert_eq!(
        world.streaming_result(stop),
        Some(&Ok(StreamingOutcome::Stopped { uuid: "abc".to_string() }))
    );
    assert_eq!(world.device("SSG_1").unwrap().streaming_to(), None);
    assert_eq!(world.live_calls(), 0);
}

#[test]
fn second_request_while_streaming_is_rejected() {
    let mut world = started_world(vec![sensor()]);
    world.request_streaming("abc").unwrap();

    let result = world.request_streaming("abc");

    assert!(matches!(result, Err(ClientError::AlreadyStreaming { .. })));
}

#[test]
fn stop_without_stream_is_rejected() {
    let mut world = started_world(vec![sensor()]);

    assert!(matches!(world.stop_streaming("abc"), Err(ClientError::NotStreaming { .. })));
}

#[test]
fn device_hang_up_reports_stream_closed() {
    let mut world = started_world(vec![sensor()]);
    let start = world.request_streaming("abc").unwrap();
    let Some(Ok(StreamingOutcome::Started { call_id, .. })) = world.streaming_result(start).cloned()
    else {
        panic!("stream did not start");
    };

    world.hang_up("SSG_1");

    assert!(world
        .notifications()
        .contains(&Notification::StreamClosed { uuid: "abc".to_string(), call_id }));
    assert_eq!(world.client().device("abc").unwrap().call(), None);
}

#[test]
fn unprompted_call_is_unclaimed() {
    let mut world = started_world(vec![sensor()]);

    let call_id = world.device_call("SSG_1");

    assert_eq!(
        world.notifications().last(),
        Some(&Notification::UnclaimedCall { call_id, peer_id: "SSG_1".to_string() })
    );
}

#[test]
fn send_stream_settles_when_call_established() {
    let mut world = started_world(vec![sensor()]);

    let op = world.send_stream("abc").unwrap();

    assert!(matches!(
        world.streaming_result(op),
        Some(Ok(StreamingOutcome::Sending { uuid, .. })) if uuid == "abc"
    ));
    assert_eq!(world.live_calls(), 1);
}

#[test]
fn send_stream_to_rejecting_device_fails() {
    let mut world = started_world(vec![sensor().rejecting_calls()]);

    let op = world.send_stream("abc").unwrap();

    let Some(Completion::Streaming(Err(ClientError::CallFailed { call_id, reason }))) =
        world.completion(op)
    else {
        panic!("expected call failure, got {:?}", world.completion(op));
    };
    assert_ne!(*call_id, CallId(0));
    assert_eq!(reason, "call rejected");
}

#[test]
fn disconnect_during_fetch_still_settles_once() {
    let mut world = started_world(vec![sensor()]);

    let op = world.fetch("abc/slow", &FetchOptions::default()).unwrap();
    world.disconnect("SSG_1");
    world.advance(Duration::from_secs(5));

    assert_eq!(world.completions_for(op).len(), 1);
    world.check_invariants().unwrap();
}
