// xcomfort-core: Bridge session engine between xcomfort-api and consumers.

pub mod command;
pub mod config;
mod convert;
pub mod error;
pub mod model;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Ack, CommandFuture, DeviceCommand, RoomCommand};
pub use config::{ReconnectConfig, SessionConfig};
pub use error::{BridgeError, CommandError};
pub use session::{BridgeSession, DeviceHandle, RoomHandle, SessionState, open_session};
pub use store::{ComponentSnapshot, DeviceRegistry, DeviceSnapshot, RoomSnapshot, Upsert};
pub use stream::{DeviceChangeStream, DeviceStream, Observer, StateHub, SubscriptionHandle};

pub use model::{
    BridgeInfo, Component, Device, DeviceId, DeviceKind, DeviceValue, RctMode, RctState, Room,
    RoomId, RoomState, SetpointRange, ShadeState,
};
pub use xcomfort_api::{ClientIdentity, OutboundCommand, ShadeAction};
