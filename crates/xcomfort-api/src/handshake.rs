//! Connection handshake and the encrypted channel it produces.
//!
//! Sequence (bridge ⇄ client):
//!
//! 1. plaintext: `CONNECTION_START` → `CONNECTION_CONFIRM` → accepted / declined
//! 2. plaintext: `SC_INIT` → `SC_PUBLIC_KEY` → `SC_CLIENT_KEY` (RSA-wrapped AES key)
//! 3. encrypted: `SC_ESTABLISHED`, salted `LOGIN` → `LOGIN_RESPONSE` (token)
//! 4. encrypted: `TOKEN_APPLY`, `TOKEN_RENEW`, `TOKEN_APPLY` with the renewed token
//!
//! The whole exchange shares a single deadline.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::cipher::{FrameCipher, SessionKeys, generate_salt, login_password, wrap_session_keys};
use crate::codec;
use crate::error::{AuthError, Error, TransportError};
use crate::protocol::{Envelope, HANDSHAKE_MC, MessageType};
use crate::transport::Connection;

const LOGIN_USERNAME: &str = "default";

/// How this client introduces itself to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_type: String,
    pub client_id: String,
    pub client_version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            client_type: "shl-app".into(),
            client_id: "c956e43f999f8004".into(),
            client_version: "3.0.0".into(),
        }
    }
}

/// Identifiers the bridge announces in `CONNECTION_START`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeIdentity {
    pub device_id: String,
    pub connection_id: String,
}

/// Run the full handshake over `conn`.
///
/// On any failure the connection is closed before returning.
pub async fn handshake<C: Connection>(
    mut conn: C,
    auth_key: &SecretString,
    client: &ClientIdentity,
    timeout: Duration,
) -> Result<SecureConnection<C>, Error> {
    let deadline = Instant::now() + timeout;

    let (bridge, keys) =
        match tokio::time::timeout_at(deadline, open_channel(&mut conn, client)).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                conn.close().await;
                return Err(e);
            }
            Err(_) => {
                conn.close().await;
                return Err(AuthError::Timeout(timeout).into());
            }
        };

    tracing::debug!(device_id = %bridge.device_id, "Secure channel open, logging in");
    let mut secure = SecureConnection::new(conn, FrameCipher::new(keys), bridge);

    let outcome =
        tokio::time::timeout_at(deadline, secure.login(auth_key.expose_secret())).await;
    match outcome {
        Ok(Ok(())) => {
            tracing::info!(device_id = %secure.bridge.device_id, "Handshake complete");
            Ok(secure)
        }
        Ok(Err(e)) => {
            secure.close().await;
            Err(e)
        }
        Err(_) => {
            secure.close().await;
            Err(AuthError::Timeout(timeout).into())
        }
    }
}

fn unexpected(expected: &'static str, got: &Envelope) -> Error {
    AuthError::Protocol {
        expected,
        got: got.type_int,
    }
    .into()
}

fn payload_string(envelope: &Envelope, field: &str, expected: &'static str) -> Result<String, Error> {
    envelope
        .payload_str(field)
        .map(str::to_owned)
        .ok_or_else(|| unexpected(expected, envelope))
}

// ── Plaintext phase ──────────────────────────────────────────────────

async fn send_plain<C: Connection>(conn: &mut C, envelope: &Envelope) -> Result<(), Error> {
    conn.send(codec::encode(envelope)?).await?;
    Ok(())
}

async fn recv_plain<C: Connection>(conn: &mut C) -> Result<Envelope, Error> {
    let frame = conn.recv().await.ok_or(TransportError::Closed)??;
    Ok(codec::decode(&frame)?)
}

async fn open_channel<C: Connection>(
    conn: &mut C,
    client: &ClientIdentity,
) -> Result<(BridgeIdentity, SessionKeys), Error> {
    let start = recv_plain(conn).await?;
    match start.kind() {
        Some(MessageType::ConnectionStart) => {}
        Some(MessageType::Nack) => {
            let reason = start.info.unwrap_or_else(|| "no reason given".into());
            return Err(AuthError::Declined(reason).into());
        }
        _ => return Err(unexpected("CONNECTION_START", &start)),
    }
    let bridge = BridgeIdentity {
        device_id: payload_string(&start, "device_id", "CONNECTION_START with device_id")?,
        connection_id: payload_string(
            &start,
            "connection_id",
            "CONNECTION_START with connection_id",
        )?,
    };

    let confirm = Envelope::new(
        MessageType::ConnectionConfirm,
        HANDSHAKE_MC,
        json!({
            "client_type": client.client_type,
            "client_id": client.client_id,
            "client_version": client.client_version,
            "connection_id": bridge.connection_id,
        }),
    );
    send_plain(conn, &confirm).await?;

    let reply = recv_plain(conn).await?;
    if reply.kind() == Some(MessageType::ConnectionDeclined) {
        let reason = reply
            .payload_str("error_message")
            .unwrap_or("no reason given")
            .to_owned();
        return Err(AuthError::Declined(reason).into());
    }

    send_plain(conn, &Envelope::bare(MessageType::ScInit, HANDSHAKE_MC)).await?;

    let offer = recv_plain(conn).await?;
    if offer.kind() != Some(MessageType::ScPublicKey) {
        return Err(unexpected("SC_PUBLIC_KEY", &offer));
    }
    let public_key = payload_string(&offer, "public_key", "SC_PUBLIC_KEY with public_key")?;

    let keys = SessionKeys::generate();
    let secret = wrap_session_keys(&public_key, &keys)?;
    send_plain(
        conn,
        &Envelope::new(
            MessageType::ScClientKey,
            HANDSHAKE_MC,
            json!({ "secret": secret }),
        ),
    )
    .await?;

    Ok((bridge, keys))
}

// ── SecureConnection ─────────────────────────────────────────────────

/// An authenticated connection: every frame is encrypted with this
/// connection's session keys.
pub struct SecureConnection<C> {
    conn: C,
    cipher: FrameCipher,
    mc: i64,
    bridge: BridgeIdentity,
}

impl<C: Connection> SecureConnection<C> {
    fn new(conn: C, cipher: FrameCipher, bridge: BridgeIdentity) -> Self {
        Self {
            conn,
            cipher,
            mc: 0,
            bridge,
        }
    }

    pub fn bridge(&self) -> &BridgeIdentity {
        &self.bridge
    }

    /// Reserve the next outbound message counter.
    pub fn next_mc(&mut self) -> i64 {
        self.mc += 1;
        self.mc
    }

    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), Error> {
        let text = codec::encode(envelope)?;
        tracing::trace!(type_int = envelope.type_int, mc = ?envelope.mc, "sending frame");
        self.conn.send(self.cipher.seal(text.as_bytes())).await?;
        Ok(())
    }

    /// Send `payload` under the next message counter; returns the counter.
    pub async fn send_message(&mut self, kind: MessageType, payload: Value) -> Result<i64, Error> {
        let mc = self.next_mc();
        self.send_envelope(&Envelope::new(kind, mc, payload)).await?;
        Ok(mc)
    }

    /// Next decrypted frame as JSON text, `None` once the channel closed.
    ///
    /// Cancel-safe.
    pub async fn recv_text(&mut self) -> Option<Result<String, Error>> {
        let frame = match self.conn.recv().await? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e.into())),
        };
        Some(self.cipher.open(&frame).map_err(Error::from))
    }

    async fn recv_envelope(&mut self) -> Result<Envelope, Error> {
        let text = self.recv_text().await.ok_or(TransportError::Closed)??;
        Ok(codec::decode(&text)?)
    }

    pub async fn close(&mut self) {
        self.conn.close().await;
    }

    async fn login(&mut self, auth_key: &str) -> Result<(), Error> {
        let established = self.recv_envelope().await?;
        if established.kind() != Some(MessageType::ScEstablished) {
            return Err(unexpected("SC_ESTABLISHED", &established));
        }

        let salt = generate_salt();
        let password = login_password(&self.bridge.device_id, auth_key, &salt);
        self.send_message(
            MessageType::Login,
            json!({ "username": LOGIN_USERNAME, "password": password, "salt": salt }),
        )
        .await?;

        let reply = self.recv_envelope().await?;
        if reply.kind() != Some(MessageType::LoginResponse) {
            tracing::warn!(type_int = reply.type_int, "Bridge refused login");
            return Err(AuthError::InvalidKey.into());
        }
        let token = payload_string(&reply, "token", "LOGIN_RESPONSE with token")?;
        self.apply_token(&token).await?;

        self.send_message(MessageType::TokenRenew, json!({ "token": token }))
            .await?;
        let renewed = self.recv_envelope().await?;
        if renewed.kind() != Some(MessageType::TokenRenewResponse) {
            return Err(unexpected("TOKEN_RENEW_RESPONSE", &renewed));
        }
        let token = payload_string(&renewed, "token", "TOKEN_RENEW_RESPONSE with token")?;
        self.apply_token(&token).await
    }

    async fn apply_token(&mut self, token: &str) -> Result<(), Error> {
        self.send_message(MessageType::TokenApply, json!({ "token": token }))
            .await?;
        let ack = self.recv_envelope().await?;
        if ack.kind() == Some(MessageType::TokenApplyAck) {
            Ok(())
        } else {
            Err(unexpected("TOKEN_APPLY_ACK", &ack))
        }
    }
}
