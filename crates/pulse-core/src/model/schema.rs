// ── Record schema ──
//
// Older builds of the app wrote Spanish field names (`latitud`,
// `longitud`, `bateria`, `timestamp`, `nombre`); current records use the
// canonical camelCase names plus `schemaVersion: 2`. Both are readable.
// Only the canonical form is ever written.
//
// Decoding is field-by-field with explicit presence checks: a field that is
// missing, null, or the wrong shape becomes `None` without taking the rest
// of the record down with it.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{DeviceId, DeviceMap, DeviceRecord};
use crate::error::CoreError;

/// Version stamped on every record this crate writes.
pub const SCHEMA_VERSION: u64 = 2;

const SCHEMA_VERSION_KEY: &str = "schemaVersion";

struct FieldNames {
    name: &'static str,
    latitude: &'static str,
    longitude: &'static str,
    battery: &'static str,
    updated_at: &'static str,
}

const CANONICAL: FieldNames = FieldNames {
    name: "name",
    latitude: "latitude",
    longitude: "longitude",
    battery: "batteryPercent",
    updated_at: "updatedAtMs",
};

const LEGACY: FieldNames = FieldNames {
    name: "nombre",
    latitude: "latitud",
    longitude: "longitud",
    battery: "bateria",
    updated_at: "timestamp",
};

/// Which layout a stored record uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Spanish field names from the first app builds.
    Legacy,
    /// Canonical names, but no `schemaVersion` stamp.
    Unversioned,
    /// Canonical names with `schemaVersion: 2`.
    Canonical,
}

impl SchemaVersion {
    pub fn needs_migration(self) -> bool {
        !matches!(self, Self::Canonical)
    }
}

/// A record the decoder could not use at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: String,
    pub reason: String,
}

/// Result of decoding a whole collection.
#[derive(Debug, Clone, Default)]
pub struct DecodedCollection {
    /// Usable records in store key order.
    pub devices: DeviceMap,
    /// Ids of records that are not in the canonical layout, in store order.
    pub outdated: Vec<(DeviceId, SchemaVersion)>,
    pub skipped: Vec<SkippedRecord>,
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode the collection node. A missing collection (`null`) is empty.
pub fn decode_collection(value: &Value) -> Result<DecodedCollection, CoreError> {
    let mut decoded = DecodedCollection::default();

    // Small integer keys come back as an array; null slots are absent keys.
    let entries: Vec<(String, &Value)> = match value {
        Value::Null => return Ok(decoded),
        Value::Object(entries) => entries.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            return Err(CoreError::Internal(format!(
                "device collection is a {}, expected an object",
                json_kind(other)
            )));
        }
    };

    for (key, raw) in entries {
        let id = match DeviceId::new(key.as_str()) {
            Ok(id) => id,
            Err(e) => {
                warn!(key = %key, error = %e, "skipping record with unusable key");
                decoded.skipped.push(SkippedRecord {
                    key,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match decode_record(id.clone(), raw) {
            Ok((record, version)) => {
                if version.needs_migration() {
                    decoded.outdated.push((id.clone(), version));
                }
                decoded.devices.insert(id, record);
            }
            Err(reason) => {
                warn!(key = %key, reason, "skipping malformed device record");
                decoded.skipped.push(SkippedRecord { key, reason });
            }
        }
    }

    Ok(decoded)
}

/// Decode one record. Canonical fields win over legacy ones.
pub fn decode_record(id: DeviceId, value: &Value) -> Result<(DeviceRecord, SchemaVersion), String> {
    let Value::Object(fields) = value else {
        return Err(format!("record is a {}, expected an object", json_kind(value)));
    };

    let version = detect_version(fields);
    let pick = |canonical: &str, legacy: &str| {
        present(fields.get(canonical)).or_else(|| present(fields.get(legacy)))
    };

    let record = DeviceRecord {
        name: pick(CANONICAL.name, LEGACY.name).and_then(|v| read_name(&id, v)),
        latitude: pick(CANONICAL.latitude, LEGACY.latitude)
            .and_then(|v| read_coordinate(&id, "latitude", v, 90.0)),
        longitude: pick(CANONICAL.longitude, LEGACY.longitude)
            .and_then(|v| read_coordinate(&id, "longitude", v, 180.0)),
        battery_percent: pick(CANONICAL.battery, LEGACY.battery)
            .and_then(|v| read_battery(&id, v)),
        updated_at_ms: pick(CANONICAL.updated_at, LEGACY.updated_at)
            .and_then(|v| read_timestamp(&id, v)),
        id,
    };

    Ok((record, version))
}

fn detect_version(fields: &Map<String, Value>) -> SchemaVersion {
    let has_legacy = [
        LEGACY.name,
        LEGACY.latitude,
        LEGACY.longitude,
        LEGACY.battery,
        LEGACY.updated_at,
    ]
    .iter()
    .any(|k| fields.contains_key(*k));

    if has_legacy {
        SchemaVersion::Legacy
    } else if fields.get(SCHEMA_VERSION_KEY).and_then(Value::as_u64) == Some(SCHEMA_VERSION) {
        SchemaVersion::Canonical
    } else {
        SchemaVersion::Unversioned
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn read_name(id: &DeviceId, value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) => None,
        other => {
            warn!(%id, kind = json_kind(other), "ignoring non-text device name");
            None
        }
    }
}

fn read_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn read_coordinate(id: &DeviceId, field: &'static str, value: &Value, limit: f64) -> Option<f64> {
    let Some(n) = read_number(value) else {
        warn!(%id, field, "ignoring non-numeric coordinate");
        return None;
    };
    if (-limit..=limit).contains(&n) {
        Some(n)
    } else {
        warn!(%id, field, value = n, "ignoring out-of-range coordinate");
        None
    }
}

fn read_battery(id: &DeviceId, value: &Value) -> Option<u8> {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(whole_percent))
            .and_then(|v| u8::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    };
    match parsed {
        Some(b) if b <= 100 => Some(b),
        _ => {
            warn!(%id, raw = %value, "ignoring invalid battery percentage");
            None
        }
    }
}

/// `15.0` is a valid reading; `15.5` and non-finite values are not.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
fn whole_percent(value: f64) -> Option<u64> {
    (value.is_finite() && value.fract() == 0.0 && (0.0..=100.0).contains(&value))
        .then_some(value as u64)
}

fn read_timestamp(id: &DeviceId, value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        warn!(%id, raw = %value, "ignoring invalid timestamp");
    }
    parsed
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Encoding ─────────────────────────────────────────────────────────

/// The canonical stored document for `record`. The id is the key, not a field.
pub fn encode_record(record: &DeviceRecord) -> Value {
    let mut doc = Map::new();
    if let Some(name) = &record.name {
        doc.insert(CANONICAL.name.into(), Value::from(name.as_str()));
    }
    if let Some(lat) = record.latitude {
        doc.insert(CANONICAL.latitude.into(), Value::from(lat));
    }
    if let Some(lon) = record.longitude {
        doc.insert(CANONICAL.longitude.into(), Value::from(lon));
    }
    if let Some(battery) = record.battery_percent {
        doc.insert(CANONICAL.battery.into(), Value::from(battery));
    }
    if let Some(ts) = record.updated_at_ms {
        doc.insert(CANONICAL.updated_at.into(), Value::from(ts));
    }
    doc.insert(SCHEMA_VERSION_KEY.into(), Value::from(SCHEMA_VERSION));
    Value::Object(doc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn legacy_record_decodes() {
        let (r, v) = decode_record(
            id("B1"),
            &json!({"latitud": 19.4, "longitud": -99.1, "bateria": 15, "timestamp": 1_700_000_000_000_i64}),
        )
        .unwrap();
        assert_eq!(v, SchemaVersion::Legacy);
        assert_eq!(r.latitude, Some(19.4));
        assert_eq!(r.longitude, Some(-99.1));
        assert_eq!(r.battery_percent, Some(15));
        assert_eq!(r.updated_at_ms, Some(1_700_000_000_000));
        assert_eq!(r.name, None);
    }

    #[test]
    fn canonical_wins_over_legacy() {
        let (r, v) = decode_record(
            id("B1"),
            &json!({"bateria": 15, "batteryPercent": 80, "nombre": "Viejo", "name": "Nuevo"}),
        )
        .unwrap();
        assert_eq!(v, SchemaVersion::Legacy);
        assert_eq!(r.battery_percent, Some(80));
        assert_eq!(r.name.as_deref(), Some("Nuevo"));
    }

    #[test]
    fn zero_values_are_present() {
        let (r, _) = decode_record(
            id("B1"),
            &json!({"latitude": 0.0, "longitude": 0, "batteryPercent": 0}),
        )
        .unwrap();
        assert_eq!(r.latitude, Some(0.0));
        assert_eq!(r.longitude, Some(0.0));
        assert_eq!(r.battery_percent, Some(0));
        assert!(r.fix().is_some());
    }

    #[test]
    fn bad_fields_become_absent() {
        let (r, _) = decode_record(
            id("B1"),
            &json!({"latitude": "north", "longitude": 200.0, "batteryPercent": 140, "name": 7}),
        )
        .unwrap();
        assert_eq!(r, DeviceRecord::new(id("B1")));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let (r, _) = decode_record(
            id("B1"),
            &json!({"latitud": "19.5", "longitud": "-99.2", "bateria": "42"}),
        )
        .unwrap();
        assert_eq!(r.fix().map(|f| (f.latitude, f.longitude)), Some((19.5, -99.2)));
        assert_eq!(r.battery_percent, Some(42));
    }

    #[test]
    fn version_detection() {
        let detect = |v: Value| decode_record(id("B1"), &v).unwrap().1;
        assert_eq!(detect(json!({"name": "x", "schemaVersion": 2})), SchemaVersion::Canonical);
        assert_eq!(detect(json!({"name": "x"})), SchemaVersion::Unversioned);
        assert_eq!(detect(json!({"nombre": "x", "schemaVersion": 2})), SchemaVersion::Legacy);
    }

    #[test]
    fn non_object_record_is_an_error() {
        assert!(decode_record(id("B1"), &json!(42)).is_err());
    }

    #[test]
    fn missing_collection_is_empty() {
        let decoded = decode_collection(&Value::Null).unwrap();
        assert!(decoded.devices.is_empty());
        assert!(decoded.outdated.is_empty());
    }

    #[test]
    fn collection_keeps_store_order_and_skips_garbage() {
        let decoded = decode_collection(&json!({
            "B2": {"batteryPercent": 50, "schemaVersion": 2},
            "B1": {"bateria": 30},
            "B3": "not a record",
        }))
        .unwrap();

        let ids: Vec<&str> = decoded.devices.keys().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["B2", "B1"]);
        assert_eq!(decoded.outdated, vec![(id("B1"), SchemaVersion::Legacy)]);
        assert_eq!(decoded.skipped.len(), 1);
        assert_eq!(decoded.skipped[0].key, "B3");
    }

    #[test]
    fn array_collection_is_keyed_by_index() {
        let decoded = decode_collection(&json!([
            null,
            {"latitud": 19.4, "longitud": -99.1, "bateria": 80},
            {"bateria": 15}
        ]))
        .unwrap();

        let ids: Vec<&str> = decoded.devices.keys().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(decoded.devices[&id("2")].battery_percent, Some(15));
        assert!(decoded.skipped.is_empty());
        assert_eq!(decoded.outdated.len(), 2);
    }

    #[test]
    fn whole_float_battery_is_accepted() {
        let battery = |v: Value| {
            decode_record(id("B1"), &json!({"batteryPercent": v}))
                .unwrap()
                .0
                .battery_percent
        };
        assert_eq!(battery(json!(15.0)), Some(15));
        assert_eq!(battery(json!(100.0)), Some(100));
        assert_eq!(battery(json!(15.5)), None);
        assert_eq!(battery(json!(-1.0)), None);
        assert_eq!(battery(json!(101.0)), None);
    }

    #[test]
    fn scalar_collection_is_an_error() {
        assert!(matches!(
            decode_collection(&json!("oops")),
            Err(CoreError::Internal(_))
        ));
    }

    #[test]
    fn encode_writes_canonical_names_only() {
        let record = DeviceRecord::new(id("B1"))
            .with_position(0.0, -99.1)
            .with_battery(15)
            .with_updated_at(1_700_000_000_000);
        assert_eq!(
            encode_record(&record),
            json!({
                "latitude": 0.0,
                "longitude": -99.1,
                "batteryPercent": 15,
                "updatedAtMs": 1_700_000_000_000_i64,
                "schemaVersion": 2,
            })
        );
    }

    #[test]
    fn encode_then_decode_keeps_fields() {
        let record = DeviceRecord::new(id("B3"))
            .with_name("New")
            .with_battery(100);
        let (back, version) = decode_record(id("B3"), &encode_record(&record)).unwrap();
        assert_eq!(back, record);
        assert_eq!(version, SchemaVersion::Canonical);
    }
}
