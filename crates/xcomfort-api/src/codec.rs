// Envelope <-> JSON text. Frame encryption lives in `cipher`.

use crate::error::{DecodeError, Error};
use crate::protocol::{Envelope, FRAME_TERMINATOR};

pub fn encode(envelope: &Envelope) -> Result<String, Error> {
    serde_json::to_string(envelope).map_err(|e| Error::Decode(e.into()))
}

/// Parse decrypted (or plaintext handshake) JSON into an envelope.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let body = text.trim_end_matches(FRAME_TERMINATOR).trim();
    if body.is_empty() {
        return Err(DecodeError::malformed("empty frame"));
    }
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn decode_strips_terminator() {
        let env = decode("{\"type_int\":10,\"mc\":-1,\"payload\":{}}\u{4}").unwrap();
        assert_eq!(env.kind(), Some(MessageType::ConnectionStart));
        assert_eq!(env.mc, Some(-1));
    }

    #[test]
    fn truncated_json_is_malformed() {
        let err = decode(r#"{"type_int":300,"payload":{"devi"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn empty_frame_is_malformed() {
        assert!(decode("\u{4}").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn out_of_range_tag_is_malformed() {
        assert!(decode(r#"{"type_int":70000}"#).is_err());
    }

    #[test]
    fn encode_then_decode() {
        let env = Envelope::new(MessageType::Login, 1, json!({"username": "default"}));
        assert_eq!(decode(&encode(&env).unwrap()).unwrap(), env);
    }
}
