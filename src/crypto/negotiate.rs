//! One-round-trip algorithm negotiation over a fresh, unencrypted framed
//! channel. The client offers, the server answers (for DH) or stays silent
//! (plaintext), and both sides install the agreed codec. Nothing is
//! registered server-side until the handshake has succeeded.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::crypto::codec::Codec;
use crate::crypto::modp::{self, DhKeyPair, PUB_LEN};
use crate::error::ChatError;
use crate::net::framing::{read_frame, write_frame};

pub const ALG_PLAIN: &[u8] = b"ALG:PLAIN";
pub const ALG_DHMP14: &[u8] = b"ALG:DHMP14";
pub const ALG_DHMP14R: &[u8] = b"ALG:DHMP14R";

/// Transport algorithm offered by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Plain,
    Dh,
}

pub async fn client_negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    alg: Algorithm,
) -> Result<Codec, ChatError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match alg {
        Algorithm::Plain => {
            write_frame(writer, ALG_PLAIN).await?;
            Ok(Codec::Plain)
        }
        Algorithm::Dh => {
            let own = DhKeyPair::generate();
            let mut offer = Vec::with_capacity(ALG_DHMP14.len() + PUB_LEN);
            offer.extend_from_slice(ALG_DHMP14);
            offer.extend_from_slice(own.public_bytes());
            debug!("offering MODP-2048 key agreement");
            write_frame(writer, &offer).await?;

            let reply = read_frame(reader).await?;
            if reply.len() != ALG_DHMP14R.len() + PUB_LEN || !reply.starts_with(ALG_DHMP14R) {
                return Err(ChatError::UnknownAlgorithm);
            }
            let server_pub_bytes = &reply[ALG_DHMP14R.len()..];
            let server_pub = modp::parse_public(server_pub_bytes)?;
            let key = modp::derive_transport_key(
                &own.shared_secret(&server_pub),
                own.public_bytes(),
                server_pub_bytes,
            );
            debug!("transport key installed");
            Ok(Codec::aes_gcm(&key))
        }
    }
}

/// Server side: classify the client's first frame and answer accordingly.
/// Anything unrecognized fails without a reply.
pub async fn server_negotiate<R, W>(reader: &mut R, writer: &mut W) -> Result<Codec, ChatError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = read_frame(reader).await?;
    if hello == ALG_PLAIN {
        return Ok(Codec::Plain);
    }
    if hello.starts_with(ALG_DHMP14) && hello.len() == ALG_DHMP14.len() + PUB_LEN {
        let client_pub_bytes = &hello[ALG_DHMP14.len()..];
        let client_pub = modp::parse_public(client_pub_bytes)?;
        let own = DhKeyPair::generate();
        let mut reply = Vec::with_capacity(ALG_DHMP14R.len() + PUB_LEN);
        reply.extend_from_slice(ALG_DHMP14R);
        reply.extend_from_slice(own.public_bytes());
        write_frame(writer, &reply).await?;
        let key = modp::derive_transport_key(
            &own.shared_secret(&client_pub),
            client_pub_bytes,
            own.public_bytes(),
        );
        debug!("transport key installed");
        return Ok(Codec::aes_gcm(&key));
    }
    Err(ChatError::UnknownAlgorithm)
}
