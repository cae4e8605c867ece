// ── Reactive stores ──

mod collection;
mod registry;

pub(crate) use collection::Collection;
pub use collection::{Snapshot, Upsert};
pub use registry::{DevicePatch, DeviceRegistry, DeviceSnapshot};

use crate::model::{Component, Room, RoomId};

pub type RoomSnapshot = Snapshot<RoomId, Room>;
pub type ComponentSnapshot = Snapshot<u32, Component>;
