//! MODP-2048 (RFC 3526 group 14) Diffie-Hellman plus HKDF-SHA256.
//!
//! Public values travel as fixed-width 256-byte big-endian integers with
//! leading zeros preserved. Both the transport handshake and the E2E layer
//! derive 32-byte AES-256-GCM keys from the shared secret with empty-salt
//! HKDF-SHA256; the info strings are part of the wire contract and must not
//! change.

use std::sync::LazyLock;

use hkdf::Hkdf;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::ChatError;

/// Byte width of an encoded public value: ceil(2048 / 8).
pub const PUB_LEN: usize = 256;

pub const GENERATOR: u32 = 2;

pub const KEY_LEN: usize = 32;

const TRANSPORT_INFO_LABEL: &[u8] = b"MODP-2048-AESGCM-CHAT";
const E2E_INFO_LABEL: &[u8] = b"E2E1-MODP14|";

// 2048-bit MODP group 14 prime, generator 2.
const MODP_2048_HEX: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AACAA68FFFFFFFFFFFFFFFF";

static PRIME: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(MODP_2048_HEX, 16).expect("group 14 prime literal is valid hex")
});

pub fn prime() -> &'static BigUint {
    &PRIME
}

/// `1 < v < P-1`; rejects the identity and order-2 subgroup endpoints.
pub fn is_valid_public(value: &BigUint) -> bool {
    let one = BigUint::from(1u32);
    *value > one && *value < prime() - &one
}

/// Parse a fixed-width public value off the wire, enforcing both the width
/// and the group range.
pub fn parse_public(bytes: &[u8]) -> Result<BigUint, ChatError> {
    if bytes.len() != PUB_LEN {
        return Err(ChatError::BadPublicValue);
    }
    let value = BigUint::from_bytes_be(bytes);
    if !is_valid_public(&value) {
        return Err(ChatError::BadPublicValue);
    }
    Ok(value)
}

/// Big-endian encoding padded to the full group width.
pub fn encode_public(value: &BigUint) -> [u8; PUB_LEN] {
    let raw = value.to_bytes_be();
    let mut out = [0u8; PUB_LEN];
    out[PUB_LEN - raw.len()..].copy_from_slice(&raw);
    out
}

/// An ephemeral DH keypair: secret exponent in `[2, P-2]`, public value
/// `G^secret mod P`.
pub struct DhKeyPair {
    secret: BigUint,
    public_bytes: [u8; PUB_LEN],
}

impl DhKeyPair {
    pub fn generate() -> Self {
        let p = prime();
        let mut rng = OsRng;
        let low = BigUint::from(2u32);
        let high = p - BigUint::from(1u32); // sampled range is [low, high)
        let secret = rng.gen_biguint_range(&low, &high);
        let public = BigUint::from(GENERATOR).modpow(&secret, p);
        Self {
            secret,
            public_bytes: encode_public(&public),
        }
    }

    pub fn public_bytes(&self) -> &[u8; PUB_LEN] {
        &self.public_bytes
    }

    /// `peer_pub^secret mod P`.
    pub fn shared_secret(&self, peer_pub: &BigUint) -> BigUint {
        peer_pub.modpow(&self.secret, prime())
    }
}

/// HKDF-SHA256, empty salt, 32-byte output.
fn hkdf_key(shared: &BigUint, info: &[u8]) -> [u8; KEY_LEN] {
    let mut ikm = encode_public(shared);
    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .expect("32 bytes is a valid hkdf-sha256 output length");
    ikm.zeroize();
    okm
}

/// Transport key: the public values appear in fixed client/server roles, so
/// both sides compute the identical info string.
pub fn derive_transport_key(
    shared: &BigUint,
    client_pub: &[u8],
    server_pub: &[u8],
) -> [u8; KEY_LEN] {
    let mut info = Vec::with_capacity(TRANSPORT_INFO_LABEL.len() + client_pub.len() + server_pub.len());
    info.extend_from_slice(TRANSPORT_INFO_LABEL);
    info.extend_from_slice(client_pub);
    info.extend_from_slice(server_pub);
    hkdf_key(shared, &info)
}

/// Directional E2E key for the `from -> to` channel. Each side derives the
/// same bytes for a given direction, so one peer's send key is the other's
/// receive key.
pub fn derive_e2e_key(
    shared: &BigUint,
    from: &str,
    to: &str,
    from_pub: &[u8],
    to_pub: &[u8],
) -> [u8; KEY_LEN] {
    let mut info = Vec::with_capacity(
        E2E_INFO_LABEL.len() + from.len() + 2 + to.len() + 1 + from_pub.len() + to_pub.len(),
    );
    info.extend_from_slice(E2E_INFO_LABEL);
    info.extend_from_slice(from.as_bytes());
    info.extend_from_slice(b"->");
    info.extend_from_slice(to.as_bytes());
    info.extend_from_slice(b"|");
    info.extend_from_slice(from_pub);
    info.extend_from_slice(to_pub);
    hkdf_key(shared, &info)
}
