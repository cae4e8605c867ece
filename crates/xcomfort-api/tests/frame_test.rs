#![allow(clippy::unwrap_used)]

// End-to-end frame path: command -> envelope -> encrypted frame -> back,
// and bridge telegram -> encrypted frame -> typed telegram.

use pretty_assertions::assert_eq;
use serde_json::json;
use xcomfort_api::cipher::{FrameCipher, SessionKeys};
use xcomfort_api::telegram::StateFields;
use xcomfort_api::{
    DeviceId, Envelope, IntegrityError, MessageType, OutboundCommand, ShadeAction, Telegram, codec,
};

fn cipher_pair() -> (FrameCipher, FrameCipher) {
    let key = [0x42; 32];
    let iv = [0x17; 16];
    (
        FrameCipher::new(SessionKeys::from_parts(key, iv)),
        FrameCipher::new(SessionKeys::from_parts(key, iv)),
    )
}

#[test]
fn command_survives_the_encrypted_path() {
    let (client, bridge) = cipher_pair();
    let commands = [
        OutboundCommand::SetSwitch {
            device_id: DeviceId(5),
            on: true,
        },
        OutboundCommand::SetDimLevel {
            device_id: DeviceId(6),
            level: 42,
        },
        OutboundCommand::SetShade {
            device_id: DeviceId(7),
            action: ShadeAction::Close,
        },
    ];

    for (mc, command) in (1..).zip(commands) {
        let text = codec::encode(&command.to_envelope(mc)).unwrap();
        let frame = client.seal(text.as_bytes());
        assert!(frame.ends_with('\u{4}'));

        let envelope = codec::decode(&bridge.open(&frame).unwrap()).unwrap();
        assert_eq!(envelope.mc, Some(mc));
        assert_eq!(OutboundCommand::from_envelope(&envelope).unwrap(), command);
    }
}

#[test]
fn bridge_state_update_decodes_to_telegram() {
    let (client, bridge) = cipher_pair();
    let envelope = Envelope::new(
        MessageType::SetStateInfo,
        31,
        json!({"item": [{"deviceId": 5, "switch": true}]}),
    );
    let frame = bridge.seal(codec::encode(&envelope).unwrap().as_bytes());

    let decoded = codec::decode(&client.open(&frame).unwrap()).unwrap();
    assert_eq!(decoded.mc, Some(31));
    let Telegram::StateUpdate(batch) = Telegram::from_envelope(&decoded).unwrap() else {
        panic!("expected state update");
    };
    assert_eq!(batch.devices[0].device_id, DeviceId(5));
    assert_eq!(
        batch.devices[0].fields,
        StateFields {
            switch: Some(true),
            ..StateFields::default()
        }
    );
}

#[test]
fn tampered_frame_fails_integrity() {
    let (client, bridge) = cipher_pair();
    let mut frame = bridge.seal(br#"{"type_int":2}"#);
    // Drop one base64 quad: still valid base64, no longer whole blocks.
    frame.replace_range(0..4, "");
    assert!(matches!(
        client.open(&frame),
        Err(IntegrityError::BlockLength(_))
    ));
}
