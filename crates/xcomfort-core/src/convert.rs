// ── Wire-to-domain conversions ──
//
// Classifies device-list entries into `DeviceKind`s, interprets the
// partial state fields of a telegram as a `DeviceValue` for that kind,
// and merges room and component telegrams into their domain types.

use xcomfort_api::protocol::{DOOR_SENSOR_MODE, comp_type, device_type, info_code};
use xcomfort_api::telegram::{ComponentEntry, DeviceEntry, HomeData, RoomFields, StateFields};

use crate::model::bridge::firmware_version;
use crate::model::{
    BridgeInfo, Component, Device, DeviceId, DeviceKind, DeviceValue, RctMode, RctState, Room,
    ShadeState,
};
use crate::store::DeviceSnapshot;

const FULL_DIM_LEVEL: u8 = xcomfort_api::command::MAX_DIM_LEVEL;

/// Infer the kind of a device from its type code, usage flag and the
/// component it belongs to.
pub(crate) fn classify(entry: &DeviceEntry, component: Option<&Component>) -> DeviceKind {
    match entry.dev_type {
        device_type::ACTUATOR_SWITCH | device_type::ACTUATOR_DIMM => match entry.usage {
            Some(0) if entry.dimmable == Some(true) => DeviceKind::Dimmer,
            Some(0) => DeviceKind::Switch,
            _ => DeviceKind::Generic,
        },
        device_type::SHADING_ACTUATOR => DeviceKind::Shade,
        device_type::HEATING_ACTUATOR => DeviceKind::Heater,
        device_type::RC_TOUCH => DeviceKind::Climate,
        device_type::ROCKER => DeviceKind::Rocker,
        device_type::SWITCH => match component {
            Some(comp) if comp.comp_type == comp_type::DOOR_WINDOW_SENSOR => {
                if comp.mode.as_deref() == Some(DOOR_SENSOR_MODE) {
                    DeviceKind::DoorSensor
                } else {
                    DeviceKind::WindowSensor
                }
            }
            _ => DeviceKind::Generic,
        },
        _ => DeviceKind::Generic,
    }
}

/// Interpret `fields` for a device of `kind`.
///
/// Returns `None` when the telegram carries nothing meaningful for the
/// kind; the device's stored value is then left as it is.
pub(crate) fn interpret(
    kind: DeviceKind,
    fields: &StateFields,
    previous: Option<&DeviceValue>,
) -> Option<DeviceValue> {
    match kind {
        DeviceKind::Switch | DeviceKind::Heater | DeviceKind::Generic => {
            fields.switch.map(|on| DeviceValue::Switch { on })
        }
        DeviceKind::Dimmer => {
            let on = fields.switch?;
            let level = if on {
                fields.dimm_value.map_or(FULL_DIM_LEVEL, clamp_level)
            } else {
                match previous {
                    Some(DeviceValue::Dim { level, .. }) => *level,
                    _ => FULL_DIM_LEVEL,
                }
            };
            Some(DeviceValue::Dim { on, level })
        }
        DeviceKind::Shade => interpret_shade(fields, previous),
        DeviceKind::Climate => {
            let temperature = fields.info_value(info_code::TEMPERATURE)?;
            let humidity = fields.info_value(info_code::HUMIDITY)?;
            Some(DeviceValue::Climate {
                temperature,
                humidity,
            })
        }
        DeviceKind::DoorSensor | DeviceKind::WindowSensor => fields
            .cur_state
            .map(|state| DeviceValue::Contact { closed: state == 1 }),
        DeviceKind::Rocker => {
            let on = fields.cur_state? != 0;
            let (temperature, humidity) = rocker_readings(previous);
            Some(DeviceValue::Rocker {
                on: Some(on),
                temperature,
                humidity,
            })
        }
    }
}

fn rocker_readings(value: Option<&DeviceValue>) -> (Option<f64>, Option<f64>) {
    match value {
        Some(DeviceValue::Rocker {
            temperature,
            humidity,
            ..
        }) => (*temperature, *humidity),
        _ => (None, None),
    }
}

// ── Multisensor rockers ──────────────────────────────────────────────

/// Temperature and humidity readings carried in `fields`, if any.
pub(crate) fn climate_readings(fields: &StateFields) -> Option<(Option<f64>, Option<f64>)> {
    let temperature = fields.info_value(info_code::TEMPERATURE);
    let humidity = fields.info_value(info_code::HUMIDITY);
    (temperature.is_some() || humidity.is_some()).then_some((temperature, humidity))
}

/// The device reporting climate readings for a multisensor rocker: the
/// next device id when it exists, otherwise another device of the same
/// component.
pub(crate) fn companion_of(rocker: &Device, devices: &DeviceSnapshot) -> Option<DeviceId> {
    if let Some(next) = rocker.id.0.checked_add(1).map(DeviceId) {
        if devices.contains_key(&next) {
            return Some(next);
        }
    }
    let comp_id = rocker.comp_id?;
    devices
        .values()
        .find(|device| device.id != rocker.id && device.comp_id == Some(comp_id))
        .map(|device| device.id)
}

/// `previous` with the companion's readings merged in. A reading the
/// companion did not report keeps its last value.
pub(crate) fn with_readings(
    previous: Option<&DeviceValue>,
    temperature: Option<f64>,
    humidity: Option<f64>,
) -> DeviceValue {
    let on = previous.and_then(DeviceValue::is_on);
    let (last_temperature, last_humidity) = rocker_readings(previous);
    DeviceValue::Rocker {
        on,
        temperature: temperature.or(last_temperature),
        humidity: humidity.or(last_humidity),
    }
}

// ── Rooms and components ─────────────────────────────────────────────

/// Merge a room telegram into `room`. Unknown preset or state codes are
/// ignored with a warning.
pub(crate) fn apply_room(room: &mut Room, name: Option<&str>, fields: &RoomFields) {
    if let Some(name) = name {
        name.clone_into(&mut room.name);
    }

    let state = &mut room.state;
    state.setpoint = fields.setpoint.or(state.setpoint);
    state.temperature = fields.temperature.or(state.temperature);
    state.humidity = fields.humidity.or(state.humidity);
    state.power = fields.power.or(state.power);

    if let Some(code) = fields.mode_code() {
        match RctMode::from_repr(code) {
            Some(mode) => state.mode = Some(mode),
            None => tracing::warn!(room_id = %room.id, code, "unknown room mode"),
        }
    }
    if let Some(code) = fields.state {
        match RctState::from_repr(code) {
            Some(rct_state) => state.state = Some(rct_state),
            None => tracing::warn!(room_id = %room.id, code, "unknown room state"),
        }
    }

    for preset in &fields.modes {
        match RctMode::from_repr(preset.mode) {
            Some(mode) => {
                room.mode_setpoints.insert(mode, preset.value);
            }
            None => tracing::warn!(room_id = %room.id, code = preset.mode, "unknown preset"),
        }
    }
}

pub(crate) fn apply_component_entry(component: &mut Component, entry: &ComponentEntry) {
    component.comp_type = entry.comp_type;
    entry.name.clone_into(&mut component.name);
    component.mode = entry.mode();
}

pub(crate) fn apply_component_state(component: &mut Component, fields: &StateFields) {
    for item in &fields.info {
        if let Some(value) = item.as_f64() {
            component.readings.insert(item.text.clone(), value);
        }
    }
}

fn interpret_shade(fields: &StateFields, previous: Option<&DeviceValue>) -> Option<DeviceValue> {
    if fields.cur_state.is_none()
        && fields.shade_position.is_none()
        && fields.shade_safety.is_none()
    {
        return None;
    }
    let mut state = match previous {
        Some(DeviceValue::Shade(state)) => *state,
        _ => ShadeState::default(),
    };
    if let Some(raw) = fields.cur_state {
        state.current_state = Some(raw);
    }
    if let Some(raw) = fields.shade_position {
        state.position = Some(u8::try_from(raw.clamp(0, 100)).unwrap_or(100));
    }
    if let Some(raw) = fields.shade_safety {
        state.safety = Some(raw != 0);
    }
    Some(DeviceValue::Shade(state))
}

fn clamp_level(raw: i64) -> u8 {
    u8::try_from(raw.clamp(0, i64::from(FULL_DIM_LEVEL))).unwrap_or(FULL_DIM_LEVEL)
}

pub(crate) fn bridge_info(device_id: &str, home: HomeData) -> BridgeInfo {
    BridgeInfo {
        device_id: device_id.to_owned(),
        home_id: home.id,
        name: home.name,
        bridge_type: home.bridge_type,
        firmware_build: home.fw_build,
        firmware_version: home.fw_build.map(firmware_version),
        scene_count: home.home_scenes.len(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::RoomId;

    fn entry(value: serde_json::Value) -> DeviceEntry {
        serde_json::from_value(value).unwrap()
    }

    fn component(value: serde_json::Value) -> Component {
        let entry: ComponentEntry = serde_json::from_value(value).unwrap();
        let mut component = Component::new(entry.comp_id);
        apply_component_entry(&mut component, &entry);
        component
    }

    fn fields(value: serde_json::Value) -> StateFields {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn lights_and_loads() {
        let dimmer = entry(json!({"deviceId": 1, "devType": 101, "usage": 0, "dimmable": true}));
        let light = entry(json!({"deviceId": 2, "devType": 100, "usage": 0, "dimmable": false}));
        let load = entry(json!({"deviceId": 3, "devType": 100, "usage": 1}));
        assert_eq!(classify(&dimmer, None), DeviceKind::Dimmer);
        assert_eq!(classify(&light, None), DeviceKind::Switch);
        assert_eq!(classify(&load, None), DeviceKind::Generic);
    }

    #[test]
    fn contact_sensors_use_component_mode() {
        let door_comp = component(json!({"compId": 10, "compType": 74, "mode": "1310"}));
        let window_comp = component(json!({"compId": 11, "compType": 74, "mode": 1311}));
        let door = entry(json!({"deviceId": 1, "devType": 210, "compId": 10}));
        let window = entry(json!({"deviceId": 2, "devType": 210, "compId": 11}));
        let orphan = entry(json!({"deviceId": 3, "devType": 210}));
        assert_eq!(classify(&door, Some(&door_comp)), DeviceKind::DoorSensor);
        assert_eq!(classify(&window, Some(&window_comp)), DeviceKind::WindowSensor);
        assert_eq!(classify(&orphan, None), DeviceKind::Generic);
    }

    #[test]
    fn dimmer_keeps_level_while_off() {
        let previous = DeviceValue::Dim { on: true, level: 40 };
        let off = interpret(DeviceKind::Dimmer, &fields(json!({"switch": false})), Some(&previous));
        assert_eq!(off, Some(DeviceValue::Dim { on: false, level: 40 }));

        let on = interpret(
            DeviceKind::Dimmer,
            &fields(json!({"switch": true, "dimmvalue": 120})),
            off.as_ref(),
        );
        assert_eq!(on, Some(DeviceValue::Dim { on: true, level: 99 }));
    }

    #[test]
    fn dimmer_ignores_telegrams_without_switch() {
        let value = interpret(DeviceKind::Dimmer, &fields(json!({"dimmvalue": 30})), None);
        assert_eq!(value, None);
    }

    #[test]
    fn shade_merges_partial_updates() {
        let first = interpret(DeviceKind::Shade, &fields(json!({"shPos": 30})), None);
        let second = interpret(DeviceKind::Shade, &fields(json!({"shSafety": 1})), first.as_ref());
        assert_eq!(
            second,
            Some(DeviceValue::Shade(ShadeState {
                position: Some(30),
                safety: Some(true),
                current_state: None,
            }))
        );
    }

    #[test]
    fn climate_needs_both_readings() {
        let partial = fields(json!({"info": [{"text": "1222", "value": "21.5"}]}));
        assert_eq!(interpret(DeviceKind::Climate, &partial, None), None);

        let full = fields(json!({"info": [
            {"text": "1222", "value": "21.5"},
            {"text": "1223", "value": 48}
        ]}));
        assert_eq!(
            interpret(DeviceKind::Climate, &full, None),
            Some(DeviceValue::Climate {
                temperature: 21.5,
                humidity: 48.0
            })
        );
    }

    #[test]
    fn contact_closed_on_state_one() {
        let closed = interpret(DeviceKind::WindowSensor, &fields(json!({"curstate": 1})), None);
        let open = interpret(DeviceKind::DoorSensor, &fields(json!({"curstate": 0})), None);
        assert_eq!(closed, Some(DeviceValue::Contact { closed: true }));
        assert_eq!(open, Some(DeviceValue::Contact { closed: false }));
    }

    #[test]
    fn rocker_press_keeps_sensor_readings() {
        let previous = with_readings(None, Some(21.5), Some(40.0));
        let pressed = interpret(DeviceKind::Rocker, &fields(json!({"curstate": 1})), Some(&previous));
        assert_eq!(
            pressed,
            Some(DeviceValue::Rocker {
                on: Some(true),
                temperature: Some(21.5),
                humidity: Some(40.0),
            })
        );

        let humid = with_readings(pressed.as_ref(), None, Some(55.0));
        assert_eq!(
            humid,
            DeviceValue::Rocker {
                on: Some(true),
                temperature: Some(21.5),
                humidity: Some(55.0),
            }
        );
    }

    #[test]
    fn companion_is_next_device_then_same_component() {
        use std::collections::BTreeMap;
        use std::sync::Arc;

        let device = |id: u32, comp_id: u32| {
            let mut device = Device::new(DeviceId(id));
            device.kind = DeviceKind::Rocker;
            device.comp_id = Some(comp_id);
            (DeviceId(id), Arc::new(device))
        };

        let adjacent: DeviceSnapshot = Arc::new(BTreeMap::from([device(14, 7), device(15, 9)]));
        assert_eq!(companion_of(&adjacent[&DeviceId(14)], &adjacent), Some(DeviceId(15)));

        let shared: DeviceSnapshot = Arc::new(BTreeMap::from([device(14, 7), device(30, 7)]));
        assert_eq!(companion_of(&shared[&DeviceId(14)], &shared), Some(DeviceId(30)));

        let alone: DeviceSnapshot = Arc::new(BTreeMap::from([device(14, 7)]));
        assert_eq!(companion_of(&alone[&DeviceId(14)], &alone), None);
    }

    #[test]
    fn climate_readings_need_one_of_the_codes() {
        assert_eq!(climate_readings(&fields(json!({"switch": true}))), None);
        let humidity_only = fields(json!({"info": [{"text": "1223", "value": "48"}]}));
        assert_eq!(climate_readings(&humidity_only), Some((None, Some(48.0))));
    }

    #[test]
    fn room_merges_partial_updates() {
        let heating: RoomFields = serde_json::from_value(json!({
            "currentMode": 3,
            "state": 1,
            "setpoint": 21,
            "temp": 19.5,
            "modes": [{"mode": 1, "value": 16}, {"mode": 3, "value": 21}]
        }))
        .unwrap();
        let mut room = Room::new(RoomId(1));
        apply_room(&mut room, Some("Living room"), &heating);

        let update: RoomFields =
            serde_json::from_value(json!({"temp": 20.0, "mode": 2, "state": 9})).unwrap();
        apply_room(&mut room, None, &update);

        assert_eq!(room.name, "Living room");
        assert_eq!(room.state.temperature, Some(20.0));
        assert_eq!(room.state.setpoint, Some(21.0));
        assert_eq!(room.state.mode, Some(RctMode::Eco));
        // Unknown state code 9 leaves the last known state.
        assert_eq!(room.state.state, Some(RctState::Auto));
        assert_eq!(room.setpoint_for(RctMode::Cool), Some(16.0));
    }

    #[test]
    fn component_keeps_latest_readings() {
        let mut comp = component(json!({"compId": 5, "compType": 87, "name": "Rocker"}));
        assert!(comp.is_multi_sensor());
        apply_component_state(
            &mut comp,
            &fields(json!({"info": [{"text": "1222", "value": "20.5"}, {"text": "x", "value": "n/a"}]})),
        );
        assert_eq!(comp.reading("1222"), Some(20.5));
        assert_eq!(comp.readings.len(), 1);
    }

    #[test]
    fn home_data_becomes_bridge_info() {
        let home: HomeData = serde_json::from_value(
            json!({"id": "h1", "name": "Home", "fwBuild": 16, "homeScenes": [{}]}),
        )
        .unwrap();
        let info = bridge_info("xCBridge-0001", home);
        assert_eq!(info.device_id, "xCBridge-0001");
        assert_eq!(info.firmware_build, Some(16));
        assert_eq!(info.firmware_version.as_deref(), Some("1.8.0"));
        assert_eq!(info.scene_count, 1);
    }
}
