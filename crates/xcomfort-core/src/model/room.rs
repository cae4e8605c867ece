// ── Room climate domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use xcomfort_api::{RctMode, RctState, RoomId};

/// A room with a climate controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Empty until a room list names it.
    pub name: String,
    pub state: RoomState,
    /// Setpoint the bridge stores for each preset. Switching presets
    /// sends the stored value along.
    pub mode_setpoints: BTreeMap<RctMode, f64>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            name: String::new(),
            state: RoomState::default(),
            mode_setpoints: BTreeMap::new(),
        }
    }

    pub fn setpoint_for(&self, mode: RctMode) -> Option<f64> {
        self.mode_setpoints.get(&mode).copied()
    }
}

/// Latest controller readings, merged from partial updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    /// Target temperature in °C for the active preset.
    pub setpoint: Option<f64>,
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Heating power reported by the room's actuators.
    pub power: Option<f64>,
    pub mode: Option<RctMode>,
    pub state: Option<RctState>,
}

/// Setpoints the bridge accepts for one preset, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    /// Range the bridge app allows for `mode`.
    pub const fn for_mode(mode: RctMode) -> Self {
        match mode {
            RctMode::Cool => Self { min: 5.0, max: 20.0 },
            RctMode::Eco => Self { min: 10.0, max: 30.0 },
            RctMode::Comfort => Self { min: 18.0, max: 40.0 },
        }
    }

    pub fn clamp(self, setpoint: f64) -> f64 {
        setpoint.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clamped(mode: RctMode, setpoint: f64) -> Option<f64> {
        Some(SetpointRange::for_mode(mode).clamp(setpoint))
    }

    #[test]
    fn setpoints_clamp_to_mode_range() {
        assert_eq!(clamped(RctMode::Cool, 25.0), Some(20.0));
        assert_eq!(clamped(RctMode::Eco, 4.0), Some(10.0));
        assert_eq!(clamped(RctMode::Comfort, 21.5), Some(21.5));
    }

    #[test]
    fn stored_setpoint_lookup() {
        let mut room = Room::new(RoomId(3));
        room.mode_setpoints.insert(RctMode::Eco, 17.0);
        assert_eq!(room.setpoint_for(RctMode::Eco), Some(17.0));
        assert_eq!(room.setpoint_for(RctMode::Comfort), None);
    }
}
