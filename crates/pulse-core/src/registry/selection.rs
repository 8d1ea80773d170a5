// ── Selection policy ──
//
// Which device is "active": index 0 by default, round-robin rotation,
// direct selection only of present ids. Also owns the low-battery
// bookkeeping, since alerts only ever concern the selected device.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{DeviceId, DeviceMap, DeviceRecord};

/// Initial selection: the first device in store order.
pub fn initial_selection(devices: &DeviceMap) -> Option<DeviceId> {
    devices.keys().next().cloned()
}

/// Rotation: the device after `current`, wrapping around.
///
/// A `current` that is missing (or `None`) falls back to index 0; an empty
/// set yields `None`.
pub fn next_selection(devices: &DeviceMap, current: Option<&DeviceId>) -> Option<DeviceId> {
    if devices.is_empty() {
        return None;
    }
    let next_index = current
        .and_then(|id| devices.get_index_of(id))
        .map_or(0, |idx| (idx + 1) % devices.len());
    devices.get_index(next_index).map(|(id, _)| id.clone())
}

// ── Low battery ──────────────────────────────────────────────────────

/// One-shot notification that the selected device's battery is low.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowBatteryAlert {
    pub id: DeviceId,
    pub name: String,
    pub battery_percent: u8,
    pub threshold: u8,
}

/// Tracks which devices have already been warned about.
///
/// A device is warned at most once per downward crossing: it re-arms only
/// after a snapshot shows it at or above the threshold, or after it leaves
/// the collection. An unknown battery level changes nothing.
#[derive(Debug)]
pub struct LowBatteryTracker {
    threshold: u8,
    warned: HashSet<DeviceId>,
}

impl LowBatteryTracker {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            warned: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Re-arm devices that recovered or disappeared in `devices`.
    pub fn observe(&mut self, devices: &DeviceMap) {
        let threshold = self.threshold;
        self.warned.retain(|id| match devices.get(id) {
            None => false,
            Some(record) => match record.battery_percent {
                Some(b) => b < threshold,
                None => true,
            },
        });
    }

    /// Alert for the selected device if it is low and not yet warned.
    pub fn check_selected(&mut self, selected: Option<&DeviceRecord>) -> Option<LowBatteryAlert> {
        let record = selected?;
        let battery = record.battery_percent?;
        if battery >= self.threshold || !self.warned.insert(record.id.clone()) {
            return None;
        }
        Some(LowBatteryAlert {
            id: record.id.clone(),
            name: record.display_name(),
            battery_percent: battery,
            threshold: self.threshold,
        })
    }

    pub fn is_warned(&self, id: &DeviceId) -> bool {
        self.warned.contains(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    fn devices(entries: &[(&str, Option<u8>)]) -> DeviceMap {
        entries
            .iter()
            .map(|(key, battery)| {
                let mut record = DeviceRecord::new(id(key));
                record.battery_percent = *battery;
                (id(key), record)
            })
            .collect()
    }

    #[test]
    fn initial_is_first_in_order() {
        let d = devices(&[("B2", None), ("B1", None)]);
        assert_eq!(initial_selection(&d), Some(id("B2")));
        assert_eq!(initial_selection(&DeviceMap::new()), None);
    }

    #[test]
    fn rotation_is_a_full_cycle() {
        for n in 1..=5 {
            let keys: Vec<String> = (0..n).map(|i| format!("B{i}")).collect();
            let entries: Vec<(&str, Option<u8>)> =
                keys.iter().map(|k| (k.as_str(), None)).collect();
            let d = devices(&entries);

            for start in d.keys() {
                let mut current = Some(start.clone());
                for _ in 0..d.len() {
                    current = next_selection(&d, current.as_ref());
                }
                assert_eq!(current.as_ref(), Some(start), "n={n}");
            }
        }
    }

    #[test]
    fn rotation_from_missing_id_restarts_at_zero() {
        let d = devices(&[("B1", None), ("B2", None)]);
        assert_eq!(next_selection(&d, Some(&id("GONE"))), Some(id("B1")));
        assert_eq!(next_selection(&d, None), Some(id("B1")));
        assert_eq!(next_selection(&DeviceMap::new(), Some(&id("B1"))), None);
    }

    #[test]
    fn alerts_once_per_crossing() {
        let mut t = LowBatteryTracker::new(20);

        let low = devices(&[("B1", Some(15))]);
        t.observe(&low);
        assert!(t.check_selected(low.get(&id("B1"))).is_some());

        for level in [15, 10, 3] {
            let still_low = devices(&[("B1", Some(level))]);
            t.observe(&still_low);
            assert!(t.check_selected(still_low.get(&id("B1"))).is_none());
        }

        let recovered = devices(&[("B1", Some(20))]);
        t.observe(&recovered);
        assert!(t.check_selected(recovered.get(&id("B1"))).is_none());
        assert!(!t.is_warned(&id("B1")));

        let low_again = devices(&[("B1", Some(19))]);
        t.observe(&low_again);
        let alert = t.check_selected(low_again.get(&id("B1"))).unwrap();
        assert_eq!(alert.battery_percent, 19);
        assert_eq!(alert.name, "Device B1");
    }

    #[test]
    fn unknown_battery_neither_alerts_nor_rearms() {
        let mut t = LowBatteryTracker::new(20);
        let low = devices(&[("B1", Some(5))]);
        t.observe(&low);
        t.check_selected(low.get(&id("B1"))).unwrap();

        let unknown = devices(&[("B1", None)]);
        t.observe(&unknown);
        assert!(t.check_selected(unknown.get(&id("B1"))).is_none());
        assert!(t.is_warned(&id("B1")));

        t.observe(&low);
        assert!(t.check_selected(low.get(&id("B1"))).is_none());
    }

    #[test]
    fn removal_rearms() {
        let mut t = LowBatteryTracker::new(20);
        let low = devices(&[("B1", Some(5))]);
        t.observe(&low);
        t.check_selected(low.get(&id("B1"))).unwrap();

        t.observe(&DeviceMap::new());
        t.observe(&low);
        assert!(t.check_selected(low.get(&id("B1"))).is_some());
    }
}
