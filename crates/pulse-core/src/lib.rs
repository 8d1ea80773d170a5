//! Device registry and live-sync session for PulseGPS bracelets.
//!
//! This crate owns the domain model, selection policy, and session logic
//! that sit between `pulse-api` and the front ends:
//!
//! - **[`Tracker`]** -- Facade managing one operator session:
//!   [`connect()`](Tracker::connect) signs in, fetches the collection, then
//!   keeps the registry in sync from a live feed and routes admin commands.
//!   [`Tracker::oneshot()`](Tracker::oneshot) runs a single CLI action
//!   without the live feed.
//!
//! - **[`Registry`]** -- The local mirror of the collection plus the
//!   selected device. Replaced wholesale by every snapshot; never points at
//!   a device that is not in the set.
//!
//! - **[`DeviceStore`]** -- The seam to the remote collection, implemented
//!   by [`RtdbStore`] (Realtime Database) and [`MemoryStore`] (in process).
//!
//! - **[`Command`]** -- Admin writes (add, update, remove, migrate) routed
//!   through an `mpsc` channel to the tracker's command processor.
//!
//! - **Domain model** ([`model`]) -- [`DeviceRecord`], [`DeviceId`], and the
//!   stored schema with its legacy field names.

pub mod command;
pub mod config;
pub mod display;
pub mod error;
pub mod model;
pub mod registry;
pub mod store;
pub mod tracker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{
    Command, CommandResult, DeviceForm, MigratedRecord, MigrationReport, UpdateDeviceRequest,
};
pub use config::{AuthCredentials, TrackerConfig};
pub use error::CoreError;
pub use model::{DeviceId, DeviceMap, DeviceRecord, GeoFix, SchemaVersion};
pub use registry::{LowBatteryAlert, Registry, RegistryView, SelectionOutcome};
pub use store::{DeviceStore, MemoryStore, RtdbStore, Subscription, SubscriptionEvent};
pub use tracker::{ConnectionState, Tracker, UserSession};

// Transport knobs callers set on `TrackerConfig`.
pub use pulse_api::ReconnectConfig;
