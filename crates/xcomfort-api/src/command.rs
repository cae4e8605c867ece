// ── Outbound commands ──
//
// Client → bridge control messages and their wire encoding. Decoding is
// provided too so a loopback bridge can interpret what it receives.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::DecodeError;
use crate::protocol::{DeviceId, Envelope, MessageType, RctMode, RctState, RoomId};

/// Highest dim level the bridge accepts.
pub const MAX_DIM_LEVEL: u8 = 99;

/// Highest shade position for [`ShadeAction::GoTo`].
pub const MAX_SHADE_POSITION: u8 = 100;

/// What to do with a shading actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadeAction {
    Open,
    Close,
    Stop,
    /// Move to a position in percent (0 = open, 100 = closed).
    GoTo(u8),
}

impl ShadeAction {
    const OPEN: i64 = 0;
    const CLOSE: i64 = 1;
    const STOP: i64 = 2;
    const GO_TO: i64 = 11;

    fn state_code(self) -> i64 {
        match self {
            Self::Open => Self::OPEN,
            Self::Close => Self::CLOSE,
            Self::Stop => Self::STOP,
            Self::GoTo(_) => Self::GO_TO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundCommand {
    SetSwitch { device_id: DeviceId, on: bool },
    SetDimLevel { device_id: DeviceId, level: u8 },
    SetShade { device_id: DeviceId, action: ShadeAction },
    /// Room controller preset, controller state and target temperature.
    /// `setpoint` is `None` when no setpoint is known for the preset.
    SetHeatingState {
        room_id: RoomId,
        mode: RctMode,
        state: RctState,
        setpoint: Option<f64>,
    },
    RequestDevices,
    RequestRooms,
    Heartbeat,
}

#[derive(Serialize, Deserialize)]
struct SwitchPayload {
    #[serde(rename = "deviceId")]
    device_id: DeviceId,
    switch: bool,
}

#[derive(Serialize, Deserialize)]
struct DimPayload {
    #[serde(rename = "deviceId")]
    device_id: DeviceId,
    #[serde(rename = "dimmvalue")]
    level: u8,
}

#[derive(Serialize, Deserialize)]
struct HeatingPayload {
    #[serde(rename = "roomId")]
    room_id: RoomId,
    mode: u8,
    state: u8,
    setpoint: Option<f64>,
    #[serde(default)]
    confirmed: bool,
}

#[derive(Serialize, Deserialize)]
struct ShadePayload {
    #[serde(rename = "deviceId")]
    device_id: DeviceId,
    state: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<u8>,
}

impl OutboundCommand {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SetSwitch { .. } => MessageType::ActionSwitchDevice,
            Self::SetDimLevel { .. } => MessageType::ActionSlideDevice,
            Self::SetShade { .. } => MessageType::SetDeviceShadingState,
            Self::SetHeatingState { .. } => MessageType::SetHeatingState,
            Self::RequestDevices => MessageType::RequestDevices,
            Self::RequestRooms => MessageType::RequestRooms,
            Self::Heartbeat => MessageType::Heartbeat,
        }
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Self::SetSwitch { device_id, .. }
            | Self::SetDimLevel { device_id, .. }
            | Self::SetShade { device_id, .. } => Some(*device_id),
            Self::SetHeatingState { .. }
            | Self::RequestDevices
            | Self::RequestRooms
            | Self::Heartbeat => None,
        }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::SetHeatingState { room_id, .. } => Some(*room_id),
            _ => None,
        }
    }

    /// Build the envelope for message counter `mc`. Dim levels are
    /// clamped to the bridge's range.
    pub fn to_envelope(&self, mc: i64) -> Envelope {
        let payload = match *self {
            Self::SetSwitch { device_id, on } => to_value(&SwitchPayload {
                device_id,
                switch: on,
            }),
            Self::SetDimLevel { device_id, level } => to_value(&DimPayload {
                device_id,
                level: level.min(MAX_DIM_LEVEL),
            }),
            Self::SetShade { device_id, action } => to_value(&ShadePayload {
                device_id,
                state: action.state_code(),
                value: match action {
                    ShadeAction::GoTo(position) => Some(position.min(MAX_SHADE_POSITION)),
                    _ => None,
                },
            }),
            Self::SetHeatingState {
                room_id,
                mode,
                state,
                setpoint,
            } => to_value(&HeatingPayload {
                room_id,
                mode: mode.code(),
                state: state.code(),
                setpoint,
                confirmed: false,
            }),
            Self::RequestDevices | Self::RequestRooms | Self::Heartbeat => json!({}),
        };
        Envelope::new(self.message_type(), mc, payload)
    }

    /// Interpret a client → bridge envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        let kind = envelope.kind().ok_or_else(|| {
            DecodeError::malformed(format!("unknown command type {}", envelope.type_int))
        })?;
        let payload = || {
            envelope
                .payload
                .as_ref()
                .ok_or_else(|| DecodeError::malformed(format!("{kind} without payload")))
        };

        match kind {
            MessageType::ActionSwitchDevice => {
                let p = SwitchPayload::deserialize(payload()?)?;
                Ok(Self::SetSwitch {
                    device_id: p.device_id,
                    on: p.switch,
                })
            }
            MessageType::ActionSlideDevice => {
                let p = DimPayload::deserialize(payload()?)?;
                Ok(Self::SetDimLevel {
                    device_id: p.device_id,
                    level: p.level,
                })
            }
            MessageType::SetDeviceShadingState => {
                let p = ShadePayload::deserialize(payload()?)?;
                let action = match (p.state, p.value) {
                    (ShadeAction::OPEN, _) => ShadeAction::Open,
                    (ShadeAction::CLOSE, _) => ShadeAction::Close,
                    (ShadeAction::STOP, _) => ShadeAction::Stop,
                    (ShadeAction::GO_TO, Some(position)) => ShadeAction::GoTo(position),
                    (state, _) => {
                        return Err(DecodeError::malformed(format!(
                            "unsupported shade state {state}"
                        )));
                    }
                };
                Ok(Self::SetShade {
                    device_id: p.device_id,
                    action,
                })
            }
            MessageType::SetHeatingState => {
                let p = HeatingPayload::deserialize(payload()?)?;
                let mode = RctMode::from_repr(p.mode)
                    .ok_or_else(|| DecodeError::malformed(format!("unknown room mode {}", p.mode)))?;
                let state = RctState::from_repr(p.state).ok_or_else(|| {
                    DecodeError::malformed(format!("unknown room state {}", p.state))
                })?;
                Ok(Self::SetHeatingState {
                    room_id: p.room_id,
                    mode,
                    state,
                    setpoint: p.setpoint,
                })
            }
            MessageType::RequestDevices => Ok(Self::RequestDevices),
            MessageType::RequestRooms => Ok(Self::RequestRooms),
            MessageType::Heartbeat => Ok(Self::Heartbeat),
            other => Err(DecodeError::malformed(format!("{other} is not a command"))),
        }
    }
}

// Payload structs hold only plain numbers and booleans.
fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
