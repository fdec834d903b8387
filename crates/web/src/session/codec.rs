//! Authenticated, encrypted cookie values.
//!
//! Layout before base64url encoding:
//!
//! ```text
//! timestamp (u64 big endian) | iv (16 bytes, absent without an encryption key) | payload | hmac-sha256 (32 bytes)
//! ```
//!
//! The payload is AES-CTR encrypted; the key length picks AES-128, 192 or
//! 256. The MAC covers the cookie name, so a value can't be replayed under
//! another name.

use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::SessionError;

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// One authentication key and an optional encryption key.
#[derive(Clone)]
pub struct KeyPair {
    auth: Vec<u8>,
    enc: Option<Vec<u8>>,
}

impl KeyPair {
    pub fn new(auth: Vec<u8>, enc: Option<Vec<u8>>) -> Result<Self, SessionError> {
        if auth.is_empty() {
            return Err(SessionError::Key("authentication key is empty".into()));
        }
        if let Some(enc) = &enc
            && !matches!(enc.len(), 16 | 24 | 32)
        {
            return Err(SessionError::Key(format!("encryption key must be 16, 24 or 32 bytes, got {}", enc.len())));
        }
        Ok(Self { auth, enc })
    }

    /// Pairs up `[auth, enc, auth, enc, ...]`; a trailing key authenticates
    /// without encrypting.
    pub fn from_flat(keys: &[Vec<u8>]) -> Result<Vec<Self>, SessionError> {
        keys.chunks(2).map(|pair| Self::new(pair[0].clone(), pair.get(1).cloned())).collect()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("auth_len", &self.auth.len())
            .field("enc_len", &self.enc.as_ref().map(Vec::len))
            .finish()
    }
}

/// Encodes with the first key pair, decodes with any of them.
#[derive(Debug, Clone)]
pub struct CookieCodec {
    pairs: Vec<KeyPair>,
    max_age: i64,
}

impl CookieCodec {
    /// `max_age` in seconds; values older than that are rejected when it is
    /// positive.
    pub fn new(pairs: Vec<KeyPair>, max_age: i64) -> Result<Self, SessionError> {
        if pairs.is_empty() {
            return Err(SessionError::Key("at least one key pair is required".into()));
        }
        Ok(Self { pairs, max_age })
    }

    pub fn encode(&self, name: &str, payload: &[u8]) -> Result<String, SessionError> {
        let pair = &self.pairs[0];
        let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default().to_be_bytes();

        let mut iv = Vec::new();
        let mut body = payload.to_vec();
        if let Some(enc) = &pair.enc {
            let mut block = [0u8; IV_LEN];
            rand::thread_rng().fill_bytes(&mut block);
            apply_keystream(enc, &block, &mut body)?;
            iv.extend_from_slice(&block);
        }

        let tag = mac(&pair.auth, name, &timestamp, &iv, &body)?.finalize().into_bytes();

        let mut raw = Vec::with_capacity(TIMESTAMP_LEN + iv.len() + body.len() + MAC_LEN);
        raw.extend_from_slice(&timestamp);
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&body);
        raw.extend_from_slice(&tag);

        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(&self, name: &str, value: &str) -> Result<Vec<u8>, SessionError> {
        let raw = URL_SAFE_NO_PAD.decode(value.trim()).map_err(|e| SessionError::Encoding(e.to_string()))?;

        let mut last_error = SessionError::MacMismatch;
        for pair in &self.pairs {
            match self.decode_with(pair, name, &raw) {
                Ok(payload) => return Ok(payload),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn decode_with(&self, pair: &KeyPair, name: &str, raw: &[u8]) -> Result<Vec<u8>, SessionError> {
        let iv_len = if pair.enc.is_some() { IV_LEN } else { 0 };
        if raw.len() < TIMESTAMP_LEN + iv_len + MAC_LEN {
            return Err(SessionError::Encoding(format!("cookie value too short: {} bytes", raw.len())));
        }

        let (timestamp, rest) = raw.split_at(TIMESTAMP_LEN);
        let (iv, rest) = rest.split_at(iv_len);
        let (body, tag) = rest.split_at(rest.len() - MAC_LEN);

        mac(&pair.auth, name, timestamp, iv, body)?.verify_slice(tag).map_err(|_mismatch| SessionError::MacMismatch)?;

        if self.max_age > 0 {
            let mut stamp = [0u8; TIMESTAMP_LEN];
            stamp.copy_from_slice(timestamp);
            let issued = i64::try_from(u64::from_be_bytes(stamp)).unwrap_or(i64::MAX);
            if Utc::now().timestamp().saturating_sub(issued) > self.max_age {
                return Err(SessionError::Expired);
            }
        }

        let mut body = body.to_vec();
        if let Some(enc) = &pair.enc {
            let mut block = [0u8; IV_LEN];
            block.copy_from_slice(iv);
            apply_keystream(enc, &block, &mut body)?;
        }
        Ok(body)
    }
}

fn mac(key: &[u8], name: &str, timestamp: &[u8], iv: &[u8], body: &[u8]) -> Result<HmacSha256, SessionError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| SessionError::Key(e.to_string()))?;
    mac.update(name.as_bytes());
    mac.update(timestamp);
    mac.update(iv);
    mac.update(body);
    Ok(mac)
}

fn apply_keystream(key: &[u8], iv: &[u8; IV_LEN], data: &mut [u8]) -> Result<(), SessionError> {
    let decrypt_error = |e: ctr::cipher::InvalidLength| SessionError::Decrypt(e.to_string());
    match key.len() {
        16 => Ctr128BE::<Aes128>::new_from_slices(key, iv).map_err(decrypt_error)?.apply_keystream(data),
        24 => Ctr128BE::<Aes192>::new_from_slices(key, iv).map_err(decrypt_error)?.apply_keystream(data),
        32 => Ctr128BE::<Aes256>::new_from_slices(key, iv).map_err(decrypt_error)?.apply_keystream(data),
        n => return Err(SessionError::Key(format!("encryption key must be 16, 24 or 32 bytes, got {n}"))),
    }
    Ok(())
}
