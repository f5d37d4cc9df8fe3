use std::io;

use thiserror::Error;

/// Everything that can go wrong between a socket and a chat line.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The stream ended inside a frame header or payload.
    #[error("stream ended mid-frame")]
    ShortRead,

    /// The 10-byte header was not a non-negative decimal length.
    #[error("invalid frame header")]
    BadHeader,

    /// The payload does not fit in the 10-digit length header.
    #[error("payload of {0} bytes exceeds header capacity")]
    EncodeTooLarge(usize),

    /// The peer opened with a frame we do not recognize.
    #[error("unknown handshake algorithm")]
    UnknownAlgorithm,

    /// A DH public value outside (1, P-1).
    #[error("public value outside group range")]
    BadPublicValue,

    /// AEAD decryption failed: bad tag, truncated nonce, or wrong key.
    #[error("ciphertext authentication failed")]
    AuthFailure,

    /// A timed receive expired; the session is still usable.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The session was closed before the call.
    #[error("not connected")]
    NotConnected,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ChatError {
    /// EOF inside a frame is a protocol-level short read, anything else
    /// stays an i/o error.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ChatError::ShortRead
        } else {
            ChatError::Io(err)
        }
    }
}
