// ── Typed request structs for Command payloads ──
//
// `DeviceForm` carries raw operator input exactly as typed; it is parsed
// and checked before anything reaches the store. `UpdateDeviceRequest`
// carries already-typed values for read-merge-write edits.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceRecord};

// ── Add / replace ──────────────────────────────────────────────────

/// Raw device form input. Empty optional fields mean "absent".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceForm {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub longitude: String,
    #[serde(default)]
    pub battery: String,
}

impl DeviceForm {
    /// Parse and check every field, producing the record to write.
    ///
    /// `now_ms` stamps `updated_at_ms`. The first failing field is reported.
    pub fn validate(&self, now_ms: i64) -> Result<DeviceRecord, CoreError> {
        let id = DeviceId::new(self.id.as_str())?;

        let latitude = parse_coordinate("latitude", &self.latitude, 90.0)?;
        let longitude = parse_coordinate("longitude", &self.longitude, 180.0)?;
        match (latitude, longitude) {
            (Some(_), None) => {
                return Err(CoreError::validation(
                    "longitude",
                    "required when latitude is given",
                ));
            }
            (None, Some(_)) => {
                return Err(CoreError::validation(
                    "latitude",
                    "required when longitude is given",
                ));
            }
            _ => {}
        }

        let battery_percent = parse_battery(&self.battery)?;
        let name = Some(self.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_owned);

        Ok(DeviceRecord {
            id,
            name,
            latitude,
            longitude,
            battery_percent,
            updated_at_ms: Some(now_ms),
        })
    }
}

// ── Partial edit ───────────────────────────────────────────────────

/// Fields to change on an existing record. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDeviceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
    /// Drop the stored name so the display falls back to the id.
    #[serde(default)]
    pub clear_name: bool,
}

impl UpdateDeviceRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.battery_percent.is_none()
            && !self.clear_name
    }

    /// Check value ranges before any store access.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_empty() {
            return Err(CoreError::validation("update", "nothing to change"));
        }
        if self.name.is_some() && self.clear_name {
            return Err(CoreError::validation(
                "name",
                "cannot set and clear the name at once",
            ));
        }
        if let Some(lat) = self.latitude {
            check_range("latitude", lat, 90.0)?;
        }
        if let Some(lon) = self.longitude {
            check_range("longitude", lon, 180.0)?;
        }
        if let Some(b) = self.battery_percent {
            if b > 100 {
                return Err(CoreError::validation(
                    "battery",
                    format!("{b} is outside 0..=100"),
                ));
            }
        }
        Ok(())
    }

    /// Merge onto `current`, stamping `now_ms`.
    pub fn apply(&self, current: &DeviceRecord, now_ms: i64) -> DeviceRecord {
        let mut merged = current.clone();
        if self.clear_name {
            merged.name = None;
        }
        if let Some(name) = &self.name {
            let name = name.trim();
            merged.name = (!name.is_empty()).then(|| name.to_owned());
        }
        if let Some(lat) = self.latitude {
            merged.latitude = Some(lat);
        }
        if let Some(lon) = self.longitude {
            merged.longitude = Some(lon);
        }
        if let Some(b) = self.battery_percent {
            merged.battery_percent = Some(b);
        }
        merged.updated_at_ms = Some(now_ms);
        merged
    }
}

// ── Field parsing ──────────────────────────────────────────────────

fn parse_coordinate(field: &str, raw: &str, limit: f64) -> Result<Option<f64>, CoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| CoreError::validation(field, format!("'{raw}' is not a number")))?;
    check_range(field, value, limit)?;
    Ok(Some(value))
}

fn check_range(field: &str, value: f64, limit: f64) -> Result<(), CoreError> {
    if !value.is_finite() || !(-limit..=limit).contains(&value) {
        return Err(CoreError::validation(
            field,
            format!("{value} is outside -{limit}..={limit}"),
        ));
    }
    Ok(())
}

fn parse_battery(raw: &str) -> Result<Option<u8>, CoreError> {
    let raw = raw.trim().trim_end_matches('%').trim_end();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: u8 = raw.parse().map_err(|_| {
        CoreError::validation("battery", format!("'{raw}' is not a whole number 0..=100"))
    })?;
    if value > 100 {
        return Err(CoreError::validation(
            "battery",
            format!("{value} is outside 0..=100"),
        ));
    }
    Ok(Some(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn form(id: &str, lat: &str, lon: &str, battery: &str) -> DeviceForm {
        DeviceForm {
            id: id.into(),
            name: String::new(),
            latitude: lat.into(),
            longitude: lon.into(),
            battery: battery.into(),
        }
    }

    fn field_of(err: CoreError) -> String {
        match err {
            CoreError::Validation { field, .. } => field,
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn full_form_parses() {
        let r = form("B1", "19.4326", "-99.1332", "85").validate(NOW).unwrap();
        assert_eq!(r.id, "B1");
        assert_eq!(r.latitude, Some(19.4326));
        assert_eq!(r.longitude, Some(-99.1332));
        assert_eq!(r.battery_percent, Some(85));
        assert_eq!(r.updated_at_ms, Some(NOW));
    }

    #[test]
    fn name_only_form_is_valid() {
        let mut f = form("B3", "", "", "");
        f.name = "New".into();
        let r = f.validate(NOW).unwrap();
        assert_eq!(r.name.as_deref(), Some("New"));
        assert_eq!(r.fix(), None);
        assert_eq!(r.battery_percent, None);
    }

    #[test]
    fn zero_values_survive() {
        let r = form("B1", "0", "0", "0").validate(NOW).unwrap();
        assert_eq!(r.latitude, Some(0.0));
        assert_eq!(r.longitude, Some(0.0));
        assert_eq!(r.battery_percent, Some(0));
    }

    #[test]
    fn missing_id_is_rejected() {
        assert_eq!(field_of(form("", "1", "1", "1").validate(NOW).unwrap_err()), "id");
    }

    #[test]
    fn non_numeric_fields_are_rejected() {
        assert_eq!(field_of(form("B1", "abc", "1", "1").validate(NOW).unwrap_err()), "latitude");
        assert_eq!(field_of(form("B1", "1", "1,5", "1").validate(NOW).unwrap_err()), "longitude");
        assert_eq!(field_of(form("B1", "1", "1", "ten").validate(NOW).unwrap_err()), "battery");
        assert_eq!(field_of(form("B1", "1", "1", "15.5").validate(NOW).unwrap_err()), "battery");
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        assert_eq!(field_of(form("B1", "91", "0", "").validate(NOW).unwrap_err()), "latitude");
        assert_eq!(field_of(form("B1", "0", "-181", "").validate(NOW).unwrap_err()), "longitude");
        assert_eq!(field_of(form("B1", "", "", "101").validate(NOW).unwrap_err()), "battery");
        assert_eq!(field_of(form("B1", "NaN", "0", "").validate(NOW).unwrap_err()), "latitude");
    }

    #[test]
    fn half_a_fix_is_rejected() {
        assert_eq!(field_of(form("B1", "10", "", "").validate(NOW).unwrap_err()), "longitude");
        assert_eq!(field_of(form("B1", "", "10", "").validate(NOW).unwrap_err()), "latitude");
    }

    #[test]
    fn battery_accepts_percent_sign() {
        let r = form("B1", "", "", " 42% ").validate(NOW).unwrap();
        assert_eq!(r.battery_percent, Some(42));
    }

    #[test]
    fn update_merges_onto_existing() {
        let current = DeviceRecord::new(DeviceId::new("B1").unwrap())
            .with_name("Abuela")
            .with_position(19.4, -99.1)
            .with_battery(50)
            .with_updated_at(1);

        let update = UpdateDeviceRequest {
            battery_percent: Some(12),
            ..UpdateDeviceRequest::default()
        };
        update.validate().unwrap();
        let merged = update.apply(&current, NOW);

        assert_eq!(merged.name.as_deref(), Some("Abuela"));
        assert_eq!(merged.latitude, Some(19.4));
        assert_eq!(merged.battery_percent, Some(12));
        assert_eq!(merged.updated_at_ms, Some(NOW));
    }

    #[test]
    fn update_can_clear_name() {
        let current = DeviceRecord::new(DeviceId::new("B1").unwrap()).with_name("Abuela");
        let update = UpdateDeviceRequest {
            clear_name: true,
            ..UpdateDeviceRequest::default()
        };
        assert_eq!(update.apply(&current, NOW).name, None);
    }

    #[test]
    fn empty_or_invalid_update_is_rejected() {
        assert!(UpdateDeviceRequest::default().validate().is_err());
        let bad = UpdateDeviceRequest {
            latitude: Some(120.0),
            ..UpdateDeviceRequest::default()
        };
        assert_eq!(field_of(bad.validate().unwrap_err()), "latitude");
    }
}
