use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `xcomfort-api` crate.
///
/// Covers every failure mode of the wire layer: transport, handshake
/// authentication, frame integrity, and telegram decoding.
/// `xcomfort-core` maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),

    // ── Handshake ───────────────────────────────────────────────────
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Key material the bridge handed us could not be used.
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    // ── Frames ──────────────────────────────────────────────────────
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Returns `true` if the error leaves the connection unusable.
    ///
    /// Only per-frame decode failures are survivable; everything else
    /// means the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// Failures of the raw network channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Cannot connect to bridge at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Write to bridge failed: {0}")]
    Send(String),

    #[error("Read from bridge failed: {0}")]
    Receive(String),

    /// The channel was closed by either side.
    #[error("Connection closed")]
    Closed,
}

/// Handshake failures. Fatal to the connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The bridge refused the login derived from the authentication key.
    #[error("Bridge rejected the authentication key")]
    InvalidKey,

    #[error("No handshake response within {}s", .0.as_secs())]
    Timeout(Duration),

    /// The bridge turned the client connection away before login
    /// (e.g. all client slots in use).
    #[error("Bridge declined the connection: {0}")]
    Declined(String),

    #[error("Unexpected handshake reply: expected {expected}, got type {got}")]
    Protocol { expected: &'static str, got: u16 },
}

/// A frame failed to decrypt cleanly.
///
/// The cipher is a chained block mode; once a frame is corrupt the
/// position in the stream is unknown, so the session must reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("Frame is not valid base64: {0}")]
    Encoding(String),

    #[error("Ciphertext length {0} is not a multiple of the block size")]
    BlockLength(usize),

    #[error("Decrypted frame is not valid UTF-8")]
    Utf8,
}

/// A single inbound telegram could not be decoded.
///
/// Never fatal: the frame is discarded and the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed telegram: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_not_fatal() {
        let err = Error::from(DecodeError::malformed("truncated"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn integrity_and_transport_errors_are_fatal() {
        assert!(Error::from(IntegrityError::Utf8).is_fatal());
        assert!(Error::from(TransportError::Closed).is_fatal());
        assert!(Error::from(AuthError::InvalidKey).is_fatal());
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = AuthError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "No handshake response within 10s");
    }
}
