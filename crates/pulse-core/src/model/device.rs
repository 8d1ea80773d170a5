// ── Device record ──
//
// One tracked bracelet. Every optional numeric field is an `Option`:
// zero is data (0.0/0.0 is a valid fix, 0 % is a dead battery), absence
// is `None`.

use serde::{Deserialize, Serialize};

use super::DeviceId;

/// A position fix. Only exists when both coordinates are present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// The stored representation of one bracelet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
    /// Epoch milliseconds of the last write. Display only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
}

impl DeviceRecord {
    /// A record with nothing but its id.
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            name: None,
            latitude: None,
            longitude: None,
            battery_percent: None,
            updated_at_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_battery(mut self, percent: u8) -> Self {
        self.battery_percent = Some(percent);
        self
    }

    pub fn with_updated_at(mut self, epoch_ms: i64) -> Self {
        self.updated_at_ms = Some(epoch_ms);
        self
    }

    /// The position fix, if both coordinates are known.
    pub fn fix(&self) -> Option<GeoFix> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoFix {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Human label: the stored name, or `"Device {id}"`.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => format!("Device {}", self.id),
        }
    }

    /// `true` when the battery is known and strictly below `threshold`.
    /// An unknown battery is never low.
    pub fn is_low_battery(&self, threshold: u8) -> bool {
        self.battery_percent.is_some_and(|b| b < threshold)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn zero_zero_is_a_fix() {
        let r = DeviceRecord::new(id("B1")).with_position(0.0, 0.0);
        assert_eq!(
            r.fix(),
            Some(GeoFix {
                latitude: 0.0,
                longitude: 0.0
            })
        );
    }

    #[test]
    fn one_coordinate_is_no_fix() {
        let mut r = DeviceRecord::new(id("B1"));
        r.latitude = Some(19.4);
        assert_eq!(r.fix(), None);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        assert_eq!(DeviceRecord::new(id("B7")).display_name(), "Device B7");
        assert_eq!(
            DeviceRecord::new(id("B7")).with_name("  ").display_name(),
            "Device B7"
        );
        assert_eq!(
            DeviceRecord::new(id("B7")).with_name("Abuela").display_name(),
            "Abuela"
        );
    }

    #[test]
    fn low_battery_is_strict_and_ignores_unknown() {
        let threshold = 20;
        assert!(DeviceRecord::new(id("B1")).with_battery(19).is_low_battery(threshold));
        assert!(DeviceRecord::new(id("B1")).with_battery(0).is_low_battery(threshold));
        assert!(!DeviceRecord::new(id("B1")).with_battery(20).is_low_battery(threshold));
        assert!(!DeviceRecord::new(id("B1")).is_low_battery(threshold));
    }
}
