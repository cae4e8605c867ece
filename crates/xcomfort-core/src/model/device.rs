// ── Device domain types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::DeviceId;

/// A device known to the bridge.
///
/// Held as `Arc<Device>` by the registry; every update replaces the
/// `Arc`, so a clone is a stable point-in-time view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Empty until a device list names it.
    pub name: String,
    pub kind: DeviceKind,
    /// Latest known state. `None` until the bridge reports one.
    pub value: Option<DeviceValue>,
    /// Owning component (the physical module), if reported.
    pub comp_id: Option<u32>,
}

impl Device {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            name: String::new(),
            kind: DeviceKind::Generic,
            value: None,
            comp_id: None,
        }
    }

    /// Whether the shade's safety lock is currently engaged.
    pub fn shade_safety_engaged(&self) -> bool {
        matches!(
            self.value,
            Some(DeviceValue::Shade(ShadeState { safety: Some(true), .. }))
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    /// Switching actuator or non-dimmable light.
    Switch,
    Dimmer,
    Shade,
    Heater,
    /// RC touch room controller reporting temperature and humidity.
    Climate,
    DoorSensor,
    WindowSensor,
    /// Push-button rocker.
    Rocker,
    /// Anything without a richer model, including actuators configured
    /// as a plain load rather than a light.
    Generic,
}

impl DeviceKind {
    pub fn accepts_switch(self) -> bool {
        matches!(self, Self::Switch | Self::Dimmer | Self::Heater | Self::Generic)
    }
}

/// Kind-specific device state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceValue {
    Switch { on: bool },
    /// `level` is 0–99 and is kept while the light is off.
    Dim { on: bool, level: u8 },
    Climate { temperature: f64, humidity: f64 },
    Shade(ShadeState),
    Contact { closed: bool },
    /// Push-button state. Multisensor rockers also carry the readings of
    /// their companion sensor device.
    Rocker {
        on: Option<bool>,
        temperature: Option<f64>,
        humidity: Option<f64>,
    },
}

impl DeviceValue {
    /// On/off view, where the kind has one.
    pub fn is_on(&self) -> Option<bool> {
        match *self {
            Self::Switch { on } | Self::Dim { on, .. } => Some(on),
            Self::Rocker { on, .. } => on,
            _ => None,
        }
    }
}

/// Shading actuator state, merged from partial updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadeState {
    /// 0 = fully open, 100 = fully closed.
    pub position: Option<u8>,
    /// Wind/rain safety lock; commands are refused while set.
    pub safety: Option<bool>,
    /// Raw movement state code.
    pub current_state: Option<i64>,
}

impl ShadeState {
    /// `Some` only at either end of travel; a shade part way down can
    /// move both ways and reports `None`.
    pub fn is_closed(&self) -> Option<bool> {
        match self.position? {
            0 => Some(false),
            100.. => Some(true),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(DeviceKind::DoorSensor.to_string(), "door_sensor");
        assert_eq!("dimmer".parse::<DeviceKind>().ok(), Some(DeviceKind::Dimmer));
    }

    #[test]
    fn safety_flag() {
        let mut device = Device::new(DeviceId(4));
        assert!(!device.shade_safety_engaged());
        device.value = Some(DeviceValue::Shade(ShadeState {
            safety: Some(true),
            ..ShadeState::default()
        }));
        assert!(device.shade_safety_engaged());
    }

    #[test]
    fn shade_closed_only_at_end_of_travel() {
        let at = |position| ShadeState {
            position,
            ..ShadeState::default()
        };
        assert_eq!(at(Some(0)).is_closed(), Some(false));
        assert_eq!(at(Some(50)).is_closed(), None);
        assert_eq!(at(Some(100)).is_closed(), Some(true));
        assert_eq!(at(None).is_closed(), None);
    }

    #[test]
    fn dim_reports_on_state() {
        let value = DeviceValue::Dim { on: false, level: 40 };
        assert_eq!(value.is_on(), Some(false));
        assert_eq!(DeviceValue::Contact { closed: true }.is_on(), None);
        let rocker = DeviceValue::Rocker {
            on: None,
            temperature: Some(21.0),
            humidity: None,
        };
        assert_eq!(rocker.is_on(), None);
    }
}
