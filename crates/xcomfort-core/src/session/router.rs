// ── Telegram routing ──
//
// Applies decoded telegrams to the stores and hub. Owned by the run
// loop, which makes it the only writer of devices, rooms and
// components.

use tokio::sync::watch;
use xcomfort_api::Telegram;
use xcomfort_api::telegram::{DeviceList, RoomFields, StateBatch, StateUpdate};

use crate::command::InFlight;
use crate::convert;
use crate::model::{BridgeInfo, Component, DeviceId, DeviceKind, DeviceValue, Room, RoomId};
use crate::store::{Collection, DevicePatch, DeviceRegistry, Upsert};
use crate::stream::StateHub;

pub(super) struct Router<'a> {
    pub registry: &'a DeviceRegistry,
    pub rooms: &'a Collection<RoomId, Room>,
    /// Survive reconnects; device classification needs them.
    pub components: &'a Collection<u32, Component>,
    pub hub: &'a StateHub,
    pub bridge_info: &'a watch::Sender<Option<BridgeInfo>>,
    pub in_flight: &'a mut InFlight,
    pub bridge_device_id: &'a str,
}

impl Router<'_> {
    pub fn route(&mut self, telegram: Telegram) {
        match telegram {
            Telegram::DeviceList(list) => self.apply_device_list(list),
            Telegram::StateUpdate(batch) => self.apply_batch(batch),
            Telegram::HomeData(home) => {
                let info = convert::bridge_info(self.bridge_device_id, home);
                tracing::info!(
                    name = ?info.name,
                    firmware_build = ?info.firmware_build,
                    firmware_version = ?info.firmware_version,
                    "bridge home data received"
                );
                self.bridge_info.send_replace(Some(info));
            }
            Telegram::Heartbeat => tracing::trace!("heartbeat"),
            Telegram::CommandAck { reference } => {
                if !self.in_flight.acknowledge(reference) {
                    tracing::trace!(reference = ?reference, "ack for no pending command");
                }
            }
            Telegram::Error { reference, info } => {
                if !self.in_flight.reject(reference, info.clone()) {
                    tracing::warn!(reference = ?reference, info = ?info, "bridge reported an error");
                }
            }
            Telegram::Unknown(tag) => tracing::debug!(type_int = tag, "ignoring unhandled telegram"),
        }
    }

    fn apply_device_list(&mut self, list: DeviceList) {
        for entry in &list.components {
            self.components.upsert_with(
                entry.comp_id,
                || Component::new(entry.comp_id),
                |component| convert::apply_component_entry(component, entry),
            );
        }

        let count = list.devices.len();
        let mut readings = Vec::new();
        for entry in list.devices {
            let component = entry.comp_id.and_then(|id| self.components.get(id));
            let kind = convert::classify(&entry, component.as_deref());
            let before = self.registry.get(entry.device_id).and_then(|d| d.value);
            let value = convert::interpret(kind, &entry.state, before.as_ref());
            if let Some(reading) = convert::climate_readings(&entry.state) {
                readings.push((entry.device_id, reading));
            }

            let patch = DevicePatch {
                name: Some(entry.name),
                kind: Some(kind),
                comp_id: entry.comp_id,
                value,
            };
            if self.registry.upsert(entry.device_id, patch) == Upsert::Created {
                tracing::debug!(device_id = %entry.device_id, %kind, "device discovered");
            }
            self.publish_if_changed(entry.device_id, before, value);
        }

        for room in &list.rooms {
            self.apply_room(room.room_id, room.name.as_deref(), &room.fields);
        }

        // Rockers and their sensor devices may arrive in either order.
        for (source, (temperature, humidity)) in readings {
            self.feed_rockers(source, temperature, humidity);
        }

        tracing::debug!(
            devices = count,
            rooms = list.rooms.len(),
            components = list.components.len(),
            last_item = list.last_item,
            "device list applied"
        );
        if list.last_item {
            tracing::info!(
                devices = self.registry.len(),
                rooms = self.rooms.len(),
                components = self.components.len(),
                "bridge inventory loaded"
            );
            self.registry.mark_loaded();
        }
    }

    fn apply_batch(&mut self, batch: StateBatch) {
        for update in batch.devices {
            self.apply_state(update);
        }

        for update in batch.rooms {
            if self.rooms.get(update.room_id).is_none() {
                tracing::warn!(room_id = %update.room_id, "state for unannounced room");
            }
            self.apply_room(update.room_id, None, &update.fields);
        }

        for update in batch.components {
            if self.components.get(update.comp_id).is_none() {
                tracing::warn!(comp_id = update.comp_id, "state for unknown component");
                continue;
            }
            self.components.upsert_with(
                update.comp_id,
                || Component::new(update.comp_id),
                |component| convert::apply_component_state(component, &update.fields),
            );
        }
    }

    fn apply_state(&mut self, update: StateUpdate) {
        if let Some((temperature, humidity)) = convert::climate_readings(&update.fields) {
            self.feed_rockers(update.device_id, temperature, humidity);
        }

        let existing = self.registry.get(update.device_id);
        let kind = existing.as_ref().map_or(DeviceKind::Generic, |d| d.kind);
        let before = existing.as_ref().and_then(|d| d.value);
        let value = convert::interpret(kind, &update.fields, before.as_ref());

        if existing.is_none() {
            tracing::warn!(device_id = %update.device_id, "state for unannounced device");
        } else if value.is_none() {
            tracing::trace!(device_id = %update.device_id, %kind, "no usable state in telegram");
            return;
        }

        self.registry.upsert(
            update.device_id,
            DevicePatch {
                value,
                ..DevicePatch::default()
            },
        );
        self.publish_if_changed(update.device_id, before, value);
    }

    fn apply_room(&self, room_id: RoomId, name: Option<&str>, fields: &RoomFields) {
        let outcome = self.rooms.upsert_with(
            room_id,
            || Room::new(room_id),
            |room| convert::apply_room(room, name, fields),
        );
        if outcome == Upsert::Created {
            tracing::debug!(%room_id, name = ?name, "room discovered");
        }
    }

    /// Hand climate readings from `source` to every multisensor rocker
    /// whose companion it is.
    fn feed_rockers(&self, source: DeviceId, temperature: Option<f64>, humidity: Option<f64>) {
        let devices = self.registry.snapshot();
        let rockers = devices.values().filter(|device| {
            device.kind == DeviceKind::Rocker
                && device.id != source
                && device
                    .comp_id
                    .and_then(|id| self.components.get(id))
                    .is_some_and(|component| component.is_multi_sensor())
        });

        for rocker in rockers {
            if convert::companion_of(rocker, &devices) != Some(source) {
                continue;
            }
            let before = rocker.value;
            let after = convert::with_readings(before.as_ref(), temperature, humidity);
            tracing::debug!(
                device_id = %rocker.id,
                companion = %source,
                ?temperature,
                ?humidity,
                "rocker sensor readings"
            );
            self.registry.upsert(rocker.id, DevicePatch::value(after));
            self.publish_if_changed(rocker.id, before, Some(after));
        }
    }

    fn publish_if_changed(
        &self,
        device_id: DeviceId,
        before: Option<DeviceValue>,
        after: Option<DeviceValue>,
    ) {
        if let Some(value) = after {
            if before != after {
                self.hub.publish(device_id, value);
            }
        }
    }
}
