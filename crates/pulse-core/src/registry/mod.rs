// ── Device registry ──
//
// The in-memory mirror of the collection plus the selected id. Changed
// only by full snapshots and explicit selection calls; every mutation
// re-establishes the selection invariants before returning:
//
// - the selection, if any, names a device in the current set
// - a non-empty set always has a selection

pub mod selection;

use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceMap, DeviceRecord};

pub use selection::{LowBatteryAlert, LowBatteryTracker};

/// Read-only copy of the registry handed to presentation code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryView {
    /// Devices in store order.
    pub devices: Arc<Vec<DeviceRecord>>,
    pub selected: Option<DeviceId>,
    /// `false` until the first snapshot has been applied.
    pub synced: bool,
    /// Set when the last read or feed event failed. Devices are then the
    /// last known good set.
    pub error: Option<String>,
}

impl RegistryView {
    pub fn selected_record(&self) -> Option<&DeviceRecord> {
        let id = self.selected.as_ref()?;
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of a selection change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionOutcome {
    pub selected: Option<DeviceId>,
    pub alert: Option<LowBatteryAlert>,
}

/// Authoritative local view of all devices and the selection.
#[derive(Debug)]
pub struct Registry {
    devices: DeviceMap,
    selected: Option<DeviceId>,
    synced: bool,
    error: Option<String>,
    low_battery: LowBatteryTracker,
}

impl Registry {
    pub fn new(low_battery_threshold: u8) -> Self {
        Self {
            devices: DeviceMap::new(),
            selected: None,
            synced: false,
            error: None,
            low_battery: LowBatteryTracker::new(low_battery_threshold),
        }
    }

    // ── Feed input ───────────────────────────────────────────────────

    /// Replace the whole device set with `devices`.
    ///
    /// Records absent from `devices` are gone. A selection that no longer
    /// keys into the set is dropped, then the initial selection rule runs.
    pub fn apply_snapshot(&mut self, devices: DeviceMap) -> Option<LowBatteryAlert> {
        self.devices = devices;
        self.synced = true;
        self.error = None;

        if self
            .selected
            .as_ref()
            .is_some_and(|id| !self.devices.contains_key(id))
        {
            self.selected = None;
        }
        if self.selected.is_none() {
            self.selected = selection::initial_selection(&self.devices);
        }

        self.low_battery.observe(&self.devices);
        self.selection_outcome().alert
    }

    /// Record a failed read or feed event. Devices and selection are kept.
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
    }

    // ── Selection ────────────────────────────────────────────────────

    /// Rotate to the next device in store order.
    pub fn select_next(&mut self) -> SelectionOutcome {
        self.selected = selection::next_selection(&self.devices, self.selected.as_ref());
        self.selection_outcome()
    }

    /// Select `id` if present; otherwise keep the current selection.
    pub fn select_by_id(&mut self, id: &DeviceId) -> Result<SelectionOutcome, CoreError> {
        if !self.devices.contains_key(id) {
            return Err(CoreError::DeviceNotFound { id: id.to_string() });
        }
        self.selected = Some(id.clone());
        Ok(self.selection_outcome())
    }

    fn selection_outcome(&mut self) -> SelectionOutcome {
        let alert = self.low_battery.check_selected(
            self.selected.as_ref().and_then(|id| self.devices.get(id)),
        );
        SelectionOutcome {
            selected: self.selected.clone(),
            alert,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Devices in the order the store delivered them.
    pub fn current_devices(&self) -> impl ExactSizeIterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(id)
    }

    pub fn selected(&self) -> Option<&DeviceRecord> {
        self.devices.get(self.selected.as_ref()?)
    }

    pub fn selected_id(&self) -> Option<&DeviceId> {
        self.selected.as_ref()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// At least one snapshot applied.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn low_battery_threshold(&self) -> u8 {
        self.low_battery.threshold()
    }

    pub fn view(&self) -> RegistryView {
        RegistryView {
            devices: Arc::new(self.devices.values().cloned().collect()),
            selected: self.selected.clone(),
            synced: self.synced,
            error: self.error.clone(),
        }
    }
}
