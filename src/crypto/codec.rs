//! Per-connection wire transform installed by the handshake.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::crypto::modp::KEY_LEN;
use crate::error::ChatError;

pub const NONCE_LEN: usize = 12;

/// Bidirectional plaintext <-> wire transform. Installed once per
/// connection and never swapped afterwards.
pub enum Codec {
    /// Identity in both directions.
    Plain,
    /// `wire = nonce || ciphertext-with-tag`, fresh random 96-bit nonce per
    /// encode, no associated data at this layer.
    AesGcm(Aes256Gcm),
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Plain => f.write_str("Codec::Plain"),
            Codec::AesGcm(_) => f.write_str("Codec::AesGcm(..)"),
        }
    }
}

impl Codec {
    pub fn aes_gcm(key: &[u8; KEY_LEN]) -> Self {
        Codec::AesGcm(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }

    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChatError> {
        match self {
            Codec::Plain => Ok(plaintext.to_vec()),
            Codec::AesGcm(cipher) => {
                let mut nonce = [0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut nonce);
                let ct = cipher
                    .encrypt(Nonce::from_slice(&nonce), plaintext)
                    .map_err(|_| ChatError::AuthFailure)?;
                let mut wire = Vec::with_capacity(NONCE_LEN + ct.len());
                wire.extend_from_slice(&nonce);
                wire.extend_from_slice(&ct);
                Ok(wire)
            }
        }
    }

    pub fn decode(&self, wire: &[u8]) -> Result<Vec<u8>, ChatError> {
        match self {
            Codec::Plain => Ok(wire.to_vec()),
            Codec::AesGcm(cipher) => {
                if wire.len() < NONCE_LEN {
                    return Err(ChatError::AuthFailure);
                }
                let (nonce, ct) = wire.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ct)
                    .map_err(|_| ChatError::AuthFailure)
            }
        }
    }
}

/// AES-256-GCM seal/open with caller-supplied nonce and associated data,
/// used by the E2E layer.
pub fn seal(cipher: &Aes256Gcm, nonce: &[u8; NONCE_LEN], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, ChatError> {
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: pt, aad })
        .map_err(|_| ChatError::AuthFailure)
}

pub fn open(cipher: &Aes256Gcm, nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, ChatError> {
    if nonce.len() != NONCE_LEN {
        return Err(ChatError::AuthFailure);
    }
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| ChatError::AuthFailure)
}
