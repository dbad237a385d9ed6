//! Capability catalog: what a connected device can actually stream.

use std::collections::BTreeMap;

use crate::backend::{Device, Sensor};
use crate::profile::{StreamKey, StreamProfile};

/// Point-in-time view of a device's stream capabilities, grouped by
/// (kind, sensor index).
///
/// Within a group, profiles keep the device's native order; persisted
/// selection indices refer to exactly this order. A snapshot is a pure
/// query result and is only valid against the device it was captured from.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySnapshot {
    groups: BTreeMap<StreamKey, Vec<StreamProfile>>,
}

impl CapabilitySnapshot {
    /// Enumerate every sensor on `device` and group its profiles.
    pub fn capture<D: Device>(device: &D) -> Self {
        let mut groups: BTreeMap<StreamKey, Vec<StreamProfile>> = BTreeMap::new();
        for sensor in device.sensors() {
            for profile in sensor.profiles() {
                groups.entry(profile.key()).or_default().push(profile);
            }
        }
        Self { groups }
    }

    /// Groups in deterministic key order.
    pub fn groups(&self) -> impl Iterator<Item = (&StreamKey, &[StreamProfile])> {
        self.groups.iter().map(|(key, group)| (key, group.as_slice()))
    }

    /// The ordered profile list for one group, if the device offers it.
    pub fn profiles(&self, key: &StreamKey) -> Option<&[StreamProfile]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::CaptureBackend;
    use crate::profile::StreamKind;

    #[test]
    fn groups_profiles_by_kind_and_sensor_index() {
        let backend = FakeBackend::new();
        let device = backend.devices().remove(0);
        let snapshot = CapabilitySnapshot::capture(&device);

        // depth/0, infrared/1, color/0, motion/0
        assert_eq!(snapshot.group_count(), 4);

        let depth = snapshot
            .profiles(&StreamKey::new(StreamKind::Depth, 0))
            .unwrap();
        assert_eq!(depth.len(), 3);
        assert!(depth.iter().all(|p| p.kind == StreamKind::Depth));

        let infrared = snapshot
            .profiles(&StreamKey::new(StreamKind::Infrared, 1))
            .unwrap();
        assert_eq!(infrared.len(), 2);

        assert!(snapshot
            .profiles(&StreamKey::new(StreamKind::Infrared, 0))
            .is_none());
    }

    #[test]
    fn group_order_is_deterministic() {
        let backend = FakeBackend::new();
        let device = backend.devices().remove(0);
        let snapshot = CapabilitySnapshot::capture(&device);

        let keys: Vec<_> = snapshot.groups().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
