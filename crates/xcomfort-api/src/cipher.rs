//! Symmetric frame cipher and handshake key material.
//!
//! After the key exchange every frame is `base64(AES-256-CBC(json))`
//! followed by the `0x04` terminator. The bridge re-initialises the
//! chain for each frame with the same per-session IV, and pads with
//! zero bytes up to the next block boundary (a full block when the
//! input is already aligned).

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::{Rng, RngCore, distributions::Alphanumeric};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, IntegrityError};
use crate::protocol::FRAME_TERMINATOR;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;
const SALT_LEN: usize = 12;

// ── SessionKeys ──────────────────────────────────────────────────────

/// Per-connection AES key and IV. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    key: [u8; 32],
    iv: [u8; 16],
}

impl SessionKeys {
    /// Fresh random keys from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut keys = Self {
            key: [0; 32],
            iv: [0; 16],
        };
        rng.fill_bytes(&mut keys.key);
        rng.fill_bytes(&mut keys.iv);
        keys
    }

    pub fn from_parts(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Parse the `"<key hex>:::<iv hex>"` form sent to the bridge.
    pub fn from_secret(secret: &str) -> Option<Self> {
        let (key_hex, iv_hex) = secret.split_once(":::")?;
        let mut keys = Self {
            key: [0; 32],
            iv: [0; 16],
        };
        hex::decode_to_slice(key_hex, &mut keys.key).ok()?;
        hex::decode_to_slice(iv_hex, &mut keys.iv).ok()?;
        Some(keys)
    }

    fn secret(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "{}:::{}",
            hex::encode(self.key),
            hex::encode(self.iv)
        ))
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Wrap the session keys for the bridge with its RSA public key.
///
/// Accepts both SPKI (`BEGIN PUBLIC KEY`) and PKCS#1
/// (`BEGIN RSA PUBLIC KEY`) PEM encodings. Returns the base64 secret.
pub fn wrap_session_keys(public_key_pem: &str, keys: &SessionKeys) -> Result<String, Error> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
        .map_err(|e| Error::KeyExchange(format!("unreadable bridge public key: {e}")))?;

    let secret = keys.secret();
    let wrapped = public_key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, secret.as_bytes())
        .map_err(|e| Error::KeyExchange(e.to_string()))?;

    Ok(BASE64.encode(wrapped))
}

// ── Login credential ─────────────────────────────────────────────────

/// `hex(SHA256(salt || hex(SHA256(device_id || auth_key))))`
pub fn login_password(device_id: &str, auth_key: &str, salt: &str) -> String {
    let mut inner = Sha256::new();
    inner.update(device_id.as_bytes());
    inner.update(auth_key.as_bytes());
    let inner_hex = Zeroizing::new(hex::encode(inner.finalize()));

    let mut outer = Sha256::new();
    outer.update(salt.as_bytes());
    outer.update(inner_hex.as_bytes());
    hex::encode(outer.finalize())
}

/// Random alphanumeric login salt.
pub fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

// ── FrameCipher ──────────────────────────────────────────────────────

/// Encrypts and decrypts frames with one connection's keys.
#[derive(Debug)]
pub struct FrameCipher {
    keys: SessionKeys,
}

impl FrameCipher {
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    /// Zero-pad and encrypt. Output length is always a block multiple
    /// strictly greater than the input length.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let padding = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
        let mut buf = Zeroizing::new(Vec::with_capacity(plaintext.len() + padding));
        buf.extend_from_slice(plaintext);
        buf.resize(plaintext.len() + padding, 0);

        Aes256CbcEnc::new(&self.keys.key.into(), &self.keys.iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(&buf)
    }

    /// Decrypt and strip trailing zero padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(IntegrityError::BlockLength(ciphertext.len()));
        }
        let mut plaintext = Aes256CbcDec::new(&self.keys.key.into(), &self.keys.iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| IntegrityError::BlockLength(ciphertext.len()))?;

        let end = plaintext.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        plaintext.truncate(end);
        Ok(plaintext)
    }

    /// Encrypt a JSON body into a terminated text frame.
    pub fn seal(&self, plaintext: &[u8]) -> String {
        let mut frame = BASE64.encode(self.encrypt(plaintext));
        frame.push(FRAME_TERMINATOR);
        frame
    }

    /// Inverse of [`seal`](Self::seal). The terminator is optional.
    pub fn open(&self, frame: &str) -> Result<String, IntegrityError> {
        let body = frame.strip_suffix(FRAME_TERMINATOR).unwrap_or(frame);
        let ciphertext = BASE64
            .decode(body.trim_end())
            .map_err(|e| IntegrityError::Encoding(e.to_string()))?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| IntegrityError::Utf8)
    }
}
