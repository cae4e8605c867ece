// ── Wire protocol constants ──
//
// Message tags, device type codes and the JSON envelope shared by every
// frame the bridge sends or receives. Tag values follow the community
// documentation of the xComfort Bridge local API.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr};

/// Frame terminator the bridge appends to every text frame.
pub const FRAME_TERMINATOR: char = '\u{4}';

/// Message counter used for handshake frames, before counting starts.
pub const HANDSHAKE_MC: i64 = -1;

// ── DeviceId ─────────────────────────────────────────────────────────

/// The bridge's integer `deviceId`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// The bridge's integer `roomId`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u32);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for RoomId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ── MessageType ──────────────────────────────────────────────────────

/// Numeric `type_int` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u16)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Nack = 0,
    Ack = 1,
    Heartbeat = 2,

    // Plaintext handshake
    ConnectionStart = 10,
    ConnectionConfirm = 11,
    ConnectionAccepted = 12,
    ConnectionDeclined = 13,
    ScInit = 14,
    ScPublicKey = 15,
    ScClientKey = 16,
    ScEstablished = 17,

    // Encrypted login
    Login = 30,
    LoginResponse = 32,
    TokenApply = 33,
    TokenApplyAck = 34,
    TokenRenew = 37,
    TokenRenewResponse = 38,

    // Requests
    RequestDevices = 240,
    RequestRooms = 242,

    // Actions
    ActionSlideDevice = 280,
    ActionSwitchDevice = 281,
    SetDeviceShadingState = 282,
    SetHeatingState = 353,

    // Bridge → client data
    SetDeviceState = 291,
    SetAllData = 300,
    SetHomeData = 303,
    SetStateInfo = 310,
}

impl MessageType {
    pub const fn code(self) -> u16 {
        self as u16
    }
}

// ── Device and component codes ───────────────────────────────────────

/// `devType` values reported in device lists.
pub mod device_type {
    pub const ACTUATOR_SWITCH: u32 = 100;
    pub const ACTUATOR_DIMM: u32 = 101;
    pub const SHADING_ACTUATOR: u32 = 102;
    pub const SWITCH: u32 = 210;
    pub const ROCKER: u32 = 220;
    pub const HEATING_ACTUATOR: u32 = 440;
    pub const RC_TOUCH: u32 = 450;
}

/// `compType` values reported for components.
pub mod comp_type {
    pub const DOOR_WINDOW_SENSOR: u32 = 74;
    pub const SHADING_ACTUATOR: u32 = 86;
    pub const MULTI_SENSOR: u32 = 87;
}

// ── Room climate control ─────────────────────────────────────────────

/// Heating preset of a room controller. The wire carries the numeric
/// code; each preset has its own setpoint and allowed range.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RctMode {
    Cool = 1,
    Eco = 2,
    Comfort = 3,
}

impl RctMode {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// What a room controller is currently doing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RctState {
    Idle = 0,
    Auto = 1,
    Active = 2,
}

impl RctState {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Component `mode` that marks a contact sensor as a door.
pub const DOOR_SENSOR_MODE: &str = "1310";

/// `info[].text` codes carried by climate sensors.
pub mod info_code {
    pub const TEMPERATURE: &str = "1222";
    pub const HUMIDITY: &str = "1223";
}

// ── Envelope ─────────────────────────────────────────────────────────

/// The JSON object every frame carries.
///
/// Field order is fixed by the struct, so encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub type_int: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc: Option<i64>,

    /// Counter of the message this one acknowledges.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl Envelope {
    pub fn new(kind: MessageType, mc: i64, payload: serde_json::Value) -> Self {
        Self {
            type_int: kind.code(),
            mc: Some(mc),
            reference: None,
            payload: Some(payload),
            info: None,
        }
    }

    /// Handshake frame with no payload (e.g. `SC_INIT`).
    pub fn bare(kind: MessageType, mc: i64) -> Self {
        Self {
            type_int: kind.code(),
            mc: Some(mc),
            reference: None,
            payload: None,
            info: None,
        }
    }

    /// `{"type_int": 1, "ref": mc}`
    pub fn ack(mc: i64) -> Self {
        Self {
            type_int: MessageType::Ack.code(),
            mc: None,
            reference: Some(mc),
            payload: None,
            info: None,
        }
    }

    pub fn nack(mc: i64, info: impl Into<String>) -> Self {
        Self {
            type_int: MessageType::Nack.code(),
            mc: None,
            reference: Some(mc),
            payload: None,
            info: Some(info.into()),
        }
    }

    /// The known message type, if the tag is one we understand.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_repr(self.type_int)
    }

    /// Borrow a string field of the payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.as_ref()?.get(field)?.as_str()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn message_type_from_repr() {
        assert_eq!(MessageType::from_repr(310), Some(MessageType::SetStateInfo));
        assert_eq!(MessageType::from_repr(9999), None);
        assert_eq!(MessageType::ActionSwitchDevice.code(), 281);
        assert_eq!(MessageType::from_repr(353), Some(MessageType::SetHeatingState));
    }

    #[test]
    fn heating_codes() {
        assert_eq!(RctMode::from_repr(2), Some(RctMode::Eco));
        assert_eq!(RctMode::Comfort.code(), 3);
        assert_eq!(RctMode::from_repr(0), None);
        assert_eq!(RctState::from_repr(2), Some(RctState::Active));
        assert_eq!("cool".parse::<RctMode>().ok(), Some(RctMode::Cool));
    }

    #[test]
    fn ack_serializes_with_ref_only() {
        let json = serde_json::to_string(&Envelope::ack(7)).unwrap();
        assert_eq!(json, r#"{"type_int":1,"ref":7}"#);
    }

    #[test]
    fn envelope_field_order_is_stable() {
        let env = Envelope::new(MessageType::RequestDevices, 3, json!({}));
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"type_int":240,"mc":3,"payload":{}}"#);
    }

    #[test]
    fn nack_carries_info() {
        let env: Envelope =
            serde_json::from_str(r#"{"type_int":0,"ref":4,"info":"device busy"}"#).unwrap();
        assert_eq!(env.kind(), Some(MessageType::Nack));
        assert_eq!(env.reference, Some(4));
        assert_eq!(env.info.as_deref(), Some("device busy"));
    }
}
