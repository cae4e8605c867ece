// ── Core error types ──
//
// Session-level errors. Consumers see authentication and connection
// outcomes, never raw cipher or codec failures. The
// `From<xcomfort_api::Error>` impl folds wire-layer errors into these.

use thiserror::Error;
use xcomfort_api::AuthError;

/// Why [`BridgeSession::run`](crate::BridgeSession::run) stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Bridge connection lost: {reason}")]
    Connection { reason: String },

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Session is closed")]
    Closed,
}

/// Why a command future resolved with an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The bridge answered with a negative acknowledgement.
    #[error("Command rejected by bridge: {reason}")]
    Rejected { reason: String },

    /// The connection dropped before the bridge acknowledged the
    /// command, or the session closed before it was sent.
    #[error("Connection lost before the command was acknowledged")]
    ConnectionLost,

    #[error("Invalid command: {reason}")]
    Invalid { reason: String },
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<xcomfort_api::Error> for BridgeError {
    fn from(err: xcomfort_api::Error) -> Self {
        match err {
            xcomfort_api::Error::Auth(auth) => Self::Auth(auth),
            xcomfort_api::Error::Transport(e) => Self::Connection {
                reason: e.to_string(),
            },
            xcomfort_api::Error::KeyExchange(reason) => Self::Connection {
                reason: format!("key exchange failed: {reason}"),
            },
            xcomfort_api::Error::Integrity(e) => Self::Connection {
                reason: format!("corrupt frame: {e}"),
            },
            xcomfort_api::Error::Decode(e) => Self::Connection {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use xcomfort_api::{IntegrityError, TransportError};

    use super::*;

    #[test]
    fn auth_errors_stay_auth_errors() {
        let err = BridgeError::from(xcomfort_api::Error::Auth(AuthError::InvalidKey));
        assert_eq!(err, BridgeError::Auth(AuthError::InvalidKey));
    }

    #[test]
    fn integrity_errors_become_connection_errors() {
        let err = BridgeError::from(xcomfort_api::Error::Integrity(IntegrityError::Utf8));
        assert!(matches!(err, BridgeError::Connection { .. }));
        assert!(err.to_string().contains("corrupt frame"));
    }

    #[test]
    fn transport_reason_is_kept() {
        let err = BridgeError::from(xcomfort_api::Error::Transport(TransportError::Connect {
            address: "10.0.0.5".into(),
            reason: "connection refused".into(),
        }));
        assert!(err.to_string().contains("connection refused"));
    }
}
