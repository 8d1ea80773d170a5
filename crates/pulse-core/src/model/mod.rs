// ── Domain model ──
//
// Canonical bracelet types. Store layouts (legacy or canonical) are
// translated in `schema`; everything above this module sees only these.

pub mod device;
pub mod device_id;
pub mod schema;

pub use device::{DeviceRecord, GeoFix};
pub use device_id::DeviceId;
pub use schema::{DecodedCollection, SchemaVersion, SkippedRecord};

/// Device records keyed by id, in store key order.
pub type DeviceMap = indexmap::IndexMap<DeviceId, DeviceRecord>;
