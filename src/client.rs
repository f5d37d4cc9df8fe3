//! Client session: connect, negotiate, announce the username, then trade
//! application frames. The session splits into independently-owned halves
//! so a reader task and a writer task can run concurrently.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Duration, timeout};
use tracing::debug;

use crate::crypto::Codec;
use crate::crypto::negotiate::{Algorithm, client_negotiate};
use crate::error::ChatError;
use crate::net::framing::{read_message, write_message};

pub struct ChatSender {
    writer: OwnedWriteHalf,
    codec: Arc<Codec>,
}

impl ChatSender {
    pub async fn send(&mut self, message: &str) -> Result<(), ChatError> {
        write_message(&mut self.writer, message.as_bytes(), &self.codec).await
    }

    pub async fn close(mut self) -> Result<(), ChatError> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.writer).await?;
        Ok(())
    }
}

pub struct ChatReceiver {
    reader: OwnedReadHalf,
    codec: Arc<Codec>,
}

impl ChatReceiver {
    /// Wait for the next frame and decode it to UTF-8.
    pub async fn recv(&mut self) -> Result<String, ChatError> {
        let raw = read_message(&mut self.reader, &self.codec).await?;
        String::from_utf8(raw).map_err(|err| {
            ChatError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })
    }

    /// Like [`recv`](Self::recv) but bounded; on expiry the connection is
    /// still usable.
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<String, ChatError> {
        timeout(limit, self.recv()).await.map_err(|_| ChatError::Timeout)?
    }
}

pub struct ChatClient {
    sender: ChatSender,
    receiver: ChatReceiver,
}

impl ChatClient {
    /// Open the stream, run the handshake, then announce the username as
    /// the first encoded frame.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        alg: Algorithm,
    ) -> Result<Self, ChatError> {
        let stream = TcpStream::connect((host, port)).await?;
        let (mut reader, mut writer) = stream.into_split();
        let codec = Arc::new(client_negotiate(&mut reader, &mut writer, alg).await?);
        debug!(user = %username, ?alg, "session negotiated");

        let mut client = Self {
            sender: ChatSender {
                writer,
                codec: Arc::clone(&codec),
            },
            receiver: ChatReceiver { reader, codec },
        };
        client.send(username).await?;
        Ok(client)
    }

    pub async fn send(&mut self, message: &str) -> Result<(), ChatError> {
        self.sender.send(message).await
    }

    pub async fn recv(&mut self) -> Result<String, ChatError> {
        self.receiver.recv().await
    }

    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<String, ChatError> {
        self.receiver.recv_timeout(limit).await
    }

    /// Split into halves that can live on different tasks.
    pub fn split(self) -> (ChatSender, ChatReceiver) {
        (self.sender, self.receiver)
    }

    pub async fn close(self) -> Result<(), ChatError> {
        self.sender.close().await
    }
}
