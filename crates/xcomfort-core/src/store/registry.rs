// ── Device registry ──
//
// Concurrent `DeviceId -> Device` storage with push-based change
// notification via `watch` channels. Written only by the session's run
// loop; read from anywhere.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::collection::{Collection, Snapshot, Upsert};
use crate::model::{Device, DeviceId, DeviceKind, DeviceValue};

pub type DeviceSnapshot = Snapshot<DeviceId, Device>;

/// Partial update: `None` fields leave the stored device untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub kind: Option<DeviceKind>,
    pub comp_id: Option<u32>,
    pub value: Option<DeviceValue>,
}

impl DevicePatch {
    pub fn value(value: DeviceValue) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    fn apply(self, device: &mut Device) {
        if let Some(name) = self.name {
            device.name = name;
        }
        if let Some(kind) = self.kind {
            device.kind = kind;
        }
        if let Some(comp_id) = self.comp_id {
            device.comp_id = Some(comp_id);
        }
        if let Some(value) = self.value {
            device.value = Some(value);
        }
    }
}

pub struct DeviceRegistry {
    devices: Collection<DeviceId, Device>,
    loaded: watch::Sender<bool>,
    last_update: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(false);
        let (last_update, _) = watch::channel(None);
        Self {
            devices: Collection::new(),
            loaded,
            last_update,
        }
    }

    /// Create the device if unknown, then apply `patch`.
    ///
    /// Re-applying an identical patch reports [`Upsert::Unchanged`] and
    /// publishes nothing.
    pub fn upsert(&self, id: DeviceId, patch: DevicePatch) -> Upsert {
        let outcome = self
            .devices
            .upsert_with(id, || Device::new(id), |device| patch.apply(device));
        if outcome.changed() {
            self.last_update.send_replace(Some(Utc::now()));
        }
        outcome
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    /// Point-in-time copy of every known device (cheap `Arc` clone).
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.devices.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.devices.subscribe()
    }

    /// Mark the inventory (devices, components and rooms) as complete.
    pub fn mark_loaded(&self) {
        self.loaded.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    pub fn loaded(&self) -> watch::Receiver<bool> {
        self.loaded.subscribe()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.borrow()
    }

    /// Remove all devices and reset the loaded flag.
    pub fn clear(&self) {
        self.devices.clear();
        self.loaded.send_replace(false);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
