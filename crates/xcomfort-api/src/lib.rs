// xcomfort-api: wire protocol for the xComfort Bridge (transport, cipher, telegram codec)

pub mod cipher;
pub mod codec;
pub mod command;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod telegram;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use command::{OutboundCommand, ShadeAction};
pub use error::{AuthError, DecodeError, Error, IntegrityError, TransportError};
pub use handshake::{BridgeIdentity, ClientIdentity, SecureConnection, handshake};
pub use protocol::{DeviceId, Envelope, MessageType, RctMode, RctState, RoomId};
pub use telegram::Telegram;
pub use transport::{Connection, Connector, WsConnector};
