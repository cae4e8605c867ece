// ── Inbound telegrams ──
//
// Typed view of the messages the bridge pushes after login. Decoding is
// lenient at the entry level: a device list with one bad entry still
// yields the rest.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::DecodeError;
use crate::protocol::{DeviceId, Envelope, MessageType, RoomId};

/// A decoded bridge → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Telegram {
    DeviceList(DeviceList),
    StateUpdate(StateBatch),
    HomeData(HomeData),
    Heartbeat,
    CommandAck { reference: Option<i64> },
    Error { reference: Option<i64>, info: Option<String> },
    Unknown(u16),
}

impl Telegram {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        let Some(kind) = envelope.kind() else {
            return Ok(Self::Unknown(envelope.type_int));
        };

        match kind {
            MessageType::Ack => Ok(Self::CommandAck {
                reference: envelope.reference,
            }),
            MessageType::Nack => Ok(Self::Error {
                reference: envelope.reference,
                info: envelope.info.clone(),
            }),
            MessageType::Heartbeat => Ok(Self::Heartbeat),
            MessageType::SetAllData => {
                DeviceList::from_payload(payload(envelope)?).map(Self::DeviceList)
            }
            MessageType::SetDeviceState => {
                let update = StateUpdate::from_value(payload(envelope)?)?;
                Ok(Self::StateUpdate(StateBatch {
                    devices: vec![update],
                    ..StateBatch::default()
                }))
            }
            MessageType::SetStateInfo => {
                StateBatch::from_payload(payload(envelope)?).map(Self::StateUpdate)
            }
            MessageType::SetHomeData => {
                let home = HomeData::deserialize(payload(envelope)?)?;
                Ok(Self::HomeData(home))
            }
            other => Ok(Self::Unknown(other.code())),
        }
    }
}

fn payload(envelope: &Envelope) -> Result<&Value, DecodeError> {
    envelope
        .payload
        .as_ref()
        .filter(|p| p.is_object())
        .ok_or_else(|| DecodeError::malformed(format!("type {} without payload", envelope.type_int)))
}

// ── State fields ─────────────────────────────────────────────────────

/// State fields a device or state-info item may carry. All optional:
/// the bridge only sends what changed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateFields {
    #[serde(default)]
    pub switch: Option<bool>,
    #[serde(default, rename = "dimmvalue")]
    pub dimm_value: Option<i64>,
    #[serde(default, rename = "curstate")]
    pub cur_state: Option<i64>,
    #[serde(default, rename = "shPos")]
    pub shade_position: Option<i64>,
    #[serde(default, rename = "shSafety")]
    pub shade_safety: Option<i64>,
    #[serde(default)]
    pub info: Vec<InfoItem>,
}

impl StateFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Numeric value of an `info[]` entry by its text code.
    pub fn info_value(&self, code: &str) -> Option<f64> {
        self.info
            .iter()
            .find(|item| item.text == code)
            .and_then(InfoItem::as_f64)
    }
}

/// One `{"text": code, "value": ...}` entry. Values arrive as strings
/// or numbers depending on firmware.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfoItem {
    pub text: String,
    #[serde(default)]
    pub value: Value,
}

impl InfoItem {
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub device_id: DeviceId,
    pub fields: StateFields,
}

#[derive(Deserialize)]
struct RawStateUpdate {
    #[serde(rename = "deviceId")]
    device_id: DeviceId,
    #[serde(flatten)]
    fields: StateFields,
}

impl StateUpdate {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let raw = RawStateUpdate::deserialize(value)?;
        Ok(Self {
            device_id: raw.device_id,
            fields: raw.fields,
        })
    }
}

/// Room controller state item.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomUpdate {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    #[serde(flatten)]
    pub fields: RoomFields,
}

/// Component state item. Components report the same shape of fields
/// as devices, mostly `info[]` readings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentUpdate {
    #[serde(rename = "compId")]
    pub comp_id: u32,
    #[serde(flatten)]
    pub fields: StateFields,
}

/// Everything one state telegram reported, split by target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBatch {
    pub devices: Vec<StateUpdate>,
    pub rooms: Vec<RoomUpdate>,
    pub components: Vec<ComponentUpdate>,
}

impl StateBatch {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.rooms.is_empty() && self.components.is_empty()
    }

    /// `SET_STATE_INFO` batches mix device, room and component items.
    fn from_payload(payload: &Value) -> Result<Self, DecodeError> {
        let items = payload
            .get("item")
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::malformed("state info without item list"))?;

        let mut batch = Self::default();
        for item in items {
            let parsed = if item.get("deviceId").is_some() {
                StateUpdate::from_value(item).map(|u| batch.devices.push(u))
            } else if item.get("roomId").is_some() {
                RoomUpdate::deserialize(item)
                    .map(|u| batch.rooms.push(u))
                    .map_err(DecodeError::from)
            } else if item.get("compId").is_some() {
                ComponentUpdate::deserialize(item)
                    .map(|u| batch.components.push(u))
                    .map_err(DecodeError::from)
            } else {
                tracing::warn!(?item, "state item names no device, room or component");
                continue;
            };
            if let Err(e) = parsed {
                tracing::warn!(error = %e, "skipping malformed state item");
            }
        }
        Ok(batch)
    }
}

// ── Room fields ──────────────────────────────────────────────────────

/// Room controller fields. Device lists name the active preset
/// `currentMode` and carry per-preset setpoints in `modes`; state info
/// items name it `mode`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoomFields {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub setpoint: Option<f64>,
    #[serde(default, rename = "temp", deserialize_with = "lenient_f64")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub power: Option<f64>,
    #[serde(default, rename = "currentMode")]
    pub current_mode: Option<u8>,
    #[serde(default)]
    pub mode: Option<u8>,
    #[serde(default)]
    pub state: Option<u8>,
    #[serde(default)]
    pub modes: Vec<ModeSetpoint>,
}

impl RoomFields {
    /// Active preset code, from whichever field the telegram used.
    pub fn mode_code(&self) -> Option<u8> {
        self.mode.or(self.current_mode)
    }
}

/// Stored setpoint of one preset.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModeSetpoint {
    pub mode: u8,
    #[serde(deserialize_with = "required_f64")]
    pub value: f64,
}

/// Numbers arrive as JSON numbers or numeric strings depending on
/// firmware.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn required_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    lenient_f64(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected a number"))
}

// ── Device list ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceList {
    pub devices: Vec<DeviceEntry>,
    pub components: Vec<ComponentEntry>,
    /// `rooms` followed by `roomHeating` entries; both describe rooms.
    pub rooms: Vec<RoomEntry>,
    /// The bridge splits large inventories over several frames and marks
    /// the final one.
    pub last_item: bool,
}

impl DeviceList {
    fn from_payload(payload: &Value) -> Result<Self, DecodeError> {
        let mut rooms = entries(payload, "rooms");
        rooms.extend(entries::<RoomEntry>(payload, "roomHeating"));
        Ok(Self {
            devices: entries(payload, "devices"),
            components: entries(payload, "comps"),
            rooms,
            last_item: payload
                .get("lastItem")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

fn entries<T: for<'de> Deserialize<'de>>(payload: &Value, field: &str) -> Vec<T> {
    let Some(items) = payload.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(field, error = %e, "skipping malformed entry");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "devType", default)]
    pub dev_type: u32,
    #[serde(rename = "compId", default)]
    pub comp_id: Option<u32>,
    /// 0 for lights; anything else is a generic load.
    #[serde(default)]
    pub usage: Option<i64>,
    #[serde(default)]
    pub dimmable: Option<bool>,
    #[serde(flatten)]
    pub state: StateFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComponentEntry {
    #[serde(rename = "compId")]
    pub comp_id: u32,
    #[serde(rename = "compType", default)]
    pub comp_type: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: Option<Value>,
}

impl ComponentEntry {
    /// `mode` as text; firmwares send it as either string or number.
    pub fn mode(&self) -> Option<String> {
        match self.mode.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomEntry {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    /// `roomHeating` entries carry no name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub fields: RoomFields,
}

// ── Home data ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HomeData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "bridgeType", default)]
    pub bridge_type: Option<i64>,
    #[serde(rename = "fwBuild", default)]
    pub fw_build: Option<i64>,
    #[serde(rename = "homeScenes", default)]
    pub home_scenes: Vec<Value>,
}
