// ── Domain model ──
//
// Canonical representation of bridge devices, rooms and components,
// independent of the wire format in `xcomfort_api`.

pub mod bridge;
pub mod component;
pub mod device;
pub mod room;

pub use bridge::BridgeInfo;
pub use component::Component;
pub use device::{Device, DeviceKind, DeviceValue, ShadeState};
pub use room::{RctMode, RctState, Room, RoomId, RoomState, SetpointRange};
pub use xcomfort_api::DeviceId;
