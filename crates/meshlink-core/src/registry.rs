//! Device registry and the profile handshake.
//!
//! A device becomes addressable only after its data connection opened and it
//! answered [`ControlFrame::ProfileRequest`] with a profile. The registry keys
//! devices by uuid and keeps an inverse index from the transport peer id, so
//! inbound frames and media calls can be routed back to a device.
//!
//! # Invariants
//!
//! - A uuid maps to at most one device. A second handshake for the same uuid
//!   replaces the older record.
//! - A peer id maps to at most one device.
//! - Iteration follows registration order.

use std::collections::{HashMap, HashSet};

use meshlink_proto::{CallId, ControlFrame, DeviceProfile};

use crate::error::RegistryError;

/// A registered remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    uuid: String,
    peer_id: String,
    profile: DeviceProfile,
    call: Option<CallId>,
}

impl Device {
    /// Stable application id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Transport-level id of the peer. Data connections are keyed by it.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Profile reported during the handshake.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Active media session, if any.
    pub fn call(&self) -> Option<CallId> {
        self.call
    }
}

/// Result of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The registered uuid.
    pub uuid: String,
    /// Peer id of an older record for the same uuid that was replaced.
    pub displaced: Option<String>,
}

/// Known devices, keyed by uuid.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    by_peer: HashMap<String, String>,
    order: Vec<String>,
    handshakes: HashSet<String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the profile handshake on a newly opened connection.
    ///
    /// Returns the control frame to send on that connection. There is no
    /// handshake timeout: a device that never answers never becomes
    /// addressable.
    pub fn begin_handshake(&mut self, peer_id: &str) -> ControlFrame {
        self.handshakes.insert(peer_id.to_string());
        ControlFrame::ProfileRequest
    }

    /// Whether a handshake is in progress on `peer_id`.
    pub fn is_handshaking(&self, peer_id: &str) -> bool {
        self.handshakes.contains(peer_id)
    }

    /// Forget an unfinished handshake (the connection went away).
    pub fn abandon_handshake(&mut self, peer_id: &str) -> bool {
        self.handshakes.remove(peer_id)
    }

    /// Complete the handshake on `peer_id` with the received profile.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnexpectedProfile` if no handshake is in progress on
    ///   this connection
    pub fn complete_handshake(
        &mut self,
        peer_id: &str,
        profile: DeviceProfile,
    ) -> Result<Registration, RegistryError> {
        if !self.handshakes.remove(peer_id) {
            return Err(RegistryError::UnexpectedProfile { peer_id: peer_id.to_string() });
        }

        let uuid = profile.uuid().to_string();

        let displaced = match self.unregister(&uuid) {
            Some(old) if old.peer_id != peer_id => {
                tracing::warn!("Device {} moved from {} to {}", uuid, old.peer_id, peer_id);
                Some(old.peer_id)
            },
            _ => None,
        };

        // Any other record on this connection is stale.
        if let Some(stale) = self.by_peer.get(peer_id).cloned() {
            self.unregister(&stale);
        }

        tracing::debug!("Device registered: {} on {}", uuid, peer_id);

        self.by_peer.insert(peer_id.to_string(), uuid.clone());
        self.order.push(uuid.clone());
        self.devices.insert(
            uuid.clone(),
            Device { uuid: uuid.clone(), peer_id: peer_id.to_string(), profile, call: None },
        );

        Ok(Registration { uuid, displaced })
    }

    /// Remove the record for `uuid`.
    ///
    /// Only the record goes; the connection is left alone; its own close
    /// notification arrives separately and finds nothing to remove.
    pub fn unregister(&mut self, uuid: &str) -> Option<Device> {
        let device = self.devices.remove(uuid)?;
        self.by_peer.remove(&device.peer_id);
        self.order.retain(|registered| registered != uuid);
        Some(device)
    }

    /// Remove the record on `peer_id` and any handshake in progress there.
    pub fn unregister_peer(&mut self, peer_id: &str) -> Option<Device> {
        self.handshakes.remove(peer_id);
        let uuid = self.by_peer.get(peer_id)?.clone();
        self.unregister(&uuid)
    }

    /// Connection (peer id) of the device registered under `uuid`.
    pub fn connection(&self, uuid: &str) -> Option<&str> {
        self.devices.get(uuid).map(Device::peer_id)
    }

    /// Recorded media session of `uuid`.
    pub fn call(&self, uuid: &str) -> Option<CallId> {
        self.devices.get(uuid).and_then(Device::call)
    }

    /// Record or clear the media session of `uuid`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownDevice` if `uuid` is not registered
    pub fn set_call(&mut self, uuid: &str, call: Option<CallId>) -> Result<(), RegistryError> {
        let device = self
            .devices
            .get_mut(uuid)
            .ok_or_else(|| RegistryError::UnknownDevice { uuid: uuid.to_string() })?;
        device.call = call;
        Ok(())
    }

    /// Device whose recorded media session is `call`.
    pub fn uuid_for_call(&self, call: CallId) -> Option<&str> {
        self.devices.values().find(|device| device.call == Some(call)).map(Device::uuid)
    }

    /// Inverse lookup from a transport peer id.
    pub fn uuid_for_peer(&self, peer_id: &str) -> Option<&str> {
        self.by_peer.get(peer_id).map(String::as_str)
    }

    /// Whether `uuid` is registered.
    pub fn exists(&self, uuid: &str) -> bool {
        self.devices.contains_key(uuid)
    }

    /// Device registered under `uuid`.
    pub fn get(&self, uuid: &str) -> Option<&Device> {
        self.devices.get(uuid)
    }

    /// All devices in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.order.iter().filter_map(|uuid| self.devices.get(uuid))
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn profile(uuid: &str) -> DeviceProfile {
        DeviceProfile::from_body(json!({"uuid": uuid, "name": "sensor"})).unwrap()
    }

    fn register(registry: &mut DeviceRegistry, peer_id: &str, uuid: &str) -> Registration {
        registry.begin_handshake(peer_id);
        registry.complete_handshake(peer_id, profile(uuid)).unwrap()
    }

    #[test]
    fn handshake_registers_device() {
        let mut registry = DeviceRegistry::new();

        assert_eq!(registry.begin_handshake("SSG_1"), ControlFrame::ProfileRequest);
        assert!(registry.is_handshaking("SSG_1"));

        let registration = registry.complete_handshake("SSG_1", profile("abc")).unwrap();
        assert_eq!(registration, Registration { uuid: "abc".to_string(), displaced: None });

        assert!(!registry.is_handshaking("SSG_1"));
        assert!(registry.exists("abc"));
        assert_eq!(registry.connection("abc"), Some("SSG_1"));
        assert_eq!(registry.uuid_for_peer("SSG_1"), Some("abc"));
        assert_eq!(registry.get("abc").unwrap().profile().name(), Some("sensor"));
    }

    #[test]
    fn profile_without_handshake_is_rejected() {
        let mut registry = DeviceRegistry::new();
        let result = registry.complete_handshake("SSG_1", profile("abc"));

        assert_eq!(result, Err(RegistryError::UnexpectedProfile { peer_id: "SSG_1".to_string() }));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_uuid_replaces_older_record() {
        let mut registry = DeviceRegistry::new();
        register(&mut registry, "SSG_1", "abc");

        let registration = register(&mut registry, "SSG_2", "abc");
        assert_eq!(registration.displaced, Some("SSG_1".to_string()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection("abc"), Some("SSG_2"));
        assert_eq!(registry.uuid_for_peer("SSG_1"), None);
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut registry = DeviceRegistry::new();
        register(&mut registry, "SSG_b", "b");
        register(&mut registry, "SSG_a", "a");
        register(&mut registry, "SSG_c", "c");

        let uuids: Vec<_> = registry.iter().map(Device::uuid).collect();
        assert_eq!(uuids, ["b", "a", "c"]);
    }

    #[test]
    fn call_bookkeeping() {
        let mut registry = DeviceRegistry::new();
        register(&mut registry, "SSG_1", "abc");

        registry.set_call("abc", Some(CallId(7))).unwrap();
        assert_eq!(registry.call("abc"), Some(CallId(7)));
        assert_eq!(registry.uuid_for_call(CallId(7)), Some("abc"));

        registry.set_call("abc", None).unwrap();
        assert_eq!(registry.uuid_for_call(CallId(7)), None);

        assert_eq!(
            registry.set_call("missing", None),
            Err(RegistryError::UnknownDevice { uuid: "missing".to_string() })
        );
    }

    #[test]
    fn unregister_peer_clears_handshake_and_record() {
        let mut registry = DeviceRegistry::new();
        register(&mut registry, "SSG_1", "abc");
        registry.begin_handshake("SSG_2");

        assert!(registry.unregister_peer("SSG_1").is_some());
        assert!(registry.unregister_peer("SSG_2").is_none());
        assert!(!registry.is_handshaking("SSG_2"));
        assert!(!registry.exists("abc"));
    }

    proptest! {
        #[test]
        fn prop_register_then_unregister_forgets_device(
            uuids in prop::collection::hash_set("[a-z]{1,6}", 1..8),
        ) {
            let mut registry = DeviceRegistry::new();
            for (index, uuid) in uuids.iter().enumerate() {
                register(&mut registry, &format!("SSG_{index}"), uuid);
            }

            for uuid in &uuids {
                prop_assert!(registry.unregister(uuid).is_some());
                prop_assert!(!registry.exists(uuid));
                prop_assert_eq!(registry.connection(uuid), None);
            }

            prop_assert!(registry.is_empty());
            prop_assert_eq!(registry.iter().count(), 0);
        }
    }
}
