// ── Command API ──
//
// All write operations flow through a unified `Command` enum. The tracker
// routes each variant to the device store from a single processor task,
// so writes issued by one session are applied in submission order.

pub mod requests;

use serde::Serialize;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceRecord, SchemaVersion};

pub use requests::{DeviceForm, UpdateDeviceRequest};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All administrative write operations against the device collection.
///
/// Every variant requires a signed-in session.
#[derive(Debug, Clone)]
pub enum Command {
    /// Create or fully replace a record from form input.
    AddDevice(DeviceForm),
    /// Read the record, merge the given fields, write it back.
    UpdateDevice {
        id: DeviceId,
        update: UpdateDeviceRequest,
    },
    /// Delete a record. Deleting a missing id succeeds.
    RemoveDevice { id: DeviceId },
    /// Rewrite records still in an old layout into the canonical schema.
    MigrateLegacy { dry_run: bool },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone)]
pub enum CommandResult {
    Written(DeviceRecord),
    Removed(DeviceId),
    Migrated(MigrationReport),
}

/// Outcome of a schema migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records found in an old layout, in store order.
    pub outdated: Vec<MigratedRecord>,
    /// Records already canonical.
    pub up_to_date: usize,
    /// Keys that could not be decoded and were left alone.
    pub skipped: Vec<String>,
    /// `false` for a dry run.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigratedRecord {
    pub id: DeviceId,
    pub from: SchemaVersion,
}
