//! End-to-end private messaging layered on top of the broadcast.
//!
//! Control and ciphertext frames are ordinary chat lines carrying reserved
//! ASCII prefixes, so the relay forwards them like any other message while
//! only the addressed peer can read the payload. Peer discovery is a
//! best-effort HELLO/REPLY exchange of MODP-2048 public values; each peer
//! pair then derives one AES-256-GCM key per direction, lazily, on first
//! send or receive. Malformed E2E frames are always swallowed so control
//! bytes never reach the user.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use aes_gcm::{Aes256Gcm, Key};
use aes_gcm::aead::KeyInit;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use num_bigint::BigUint;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tokio::time::{Duration, timeout};
use tracing::debug;

use crate::client::{ChatClient, ChatReceiver, ChatSender};
use crate::crypto::codec::{self, NONCE_LEN};
use crate::crypto::modp::{self, DhKeyPair, PUB_LEN};
use crate::crypto::negotiate::Algorithm;
use crate::error::ChatError;

pub const HELLO_TAG: &str = "__E2E1_HELLO__:";
pub const REPLY_TAG: &str = "__E2E1_REPLY__:";
pub const MSG_TAG: &str = "__E2E1_MSG__:";

/// What the manager decided about one incoming payload.
#[derive(Debug, PartialEq, Eq)]
pub enum E2eAction {
    /// Not an E2E frame; the host shows the line as-is.
    Pass,
    /// Control frame, suppressed frame, or undecryptable ciphertext.
    Consumed,
    /// Control frame that requires sending this line back over broadcast.
    Reply(String),
    /// A private message addressed to us.
    Decrypted(String),
}

struct PeerKey {
    value: BigUint,
    bytes: [u8; PUB_LEN],
}

struct Channel {
    send: Aes256Gcm,
    recv: Aes256Gcm,
}

/// Peer public-key table plus lazily-derived directional channels.
/// Transport-free: methods produce lines for the host to send.
pub struct E2eManager {
    username: String,
    keypair: DhKeyPair,
    peers: HashMap<String, PeerKey>,
    channels: HashMap<String, Channel>,
}

impl E2eManager {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            keypair: DhKeyPair::generate(),
            peers: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn known_users(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Peers are never evicted implicitly; this is the explicit hook.
    pub fn forget_peer(&mut self, user: &str) {
        self.peers.remove(user);
        self.channels.remove(user);
    }

    /// The HELLO announcement carrying our public value.
    pub fn announce_line(&self) -> String {
        format!("{HELLO_TAG}{}", URL_SAFE.encode(self.keypair.public_bytes()))
    }

    fn reply_line(&self) -> String {
        format!("{REPLY_TAG}{}", URL_SAFE.encode(self.keypair.public_bytes()))
    }

    /// Encrypt `text` once per recipient, returning the broadcast lines to
    /// send. `None` means every known peer except ourselves; recipients we
    /// have no public value for are silently skipped.
    pub fn seal_private(
        &mut self,
        text: &str,
        recipients: Option<&[String]>,
    ) -> Result<Vec<String>, ChatError> {
        let recipients: Vec<String> = match recipients {
            Some(list) => list.to_vec(),
            None => self
                .peers
                .keys()
                .filter(|user| **user != self.username)
                .cloned()
                .collect(),
        };

        let mut lines = Vec::with_capacity(recipients.len());
        for to in recipients {
            if !self.peers.contains_key(&to) {
                continue;
            }
            self.ensure_channel(&to);
            let channel = &self.channels[&to];

            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            let aad = format!("{}->{}", self.username, to);
            let ct = codec::seal(&channel.send, &nonce, aad.as_bytes(), text.as_bytes())?;

            let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
            blob.extend_from_slice(&nonce);
            blob.extend_from_slice(&ct);
            lines.push(format!("{MSG_TAG}{to}:{}", URL_SAFE.encode(&blob)));
        }
        Ok(lines)
    }

    /// Classify and process one broadcast payload from `sender`.
    pub fn handle_incoming(&mut self, sender: &str, payload: &str) -> E2eAction {
        if let Some(b64) = payload.strip_prefix(HELLO_TAG) {
            if self.record_peer(sender, b64) {
                return E2eAction::Reply(self.reply_line());
            }
            return E2eAction::Consumed;
        }
        if let Some(b64) = payload.strip_prefix(REPLY_TAG) {
            self.record_peer(sender, b64);
            return E2eAction::Consumed;
        }
        if let Some(rest) = payload.strip_prefix(MSG_TAG) {
            return self.open_private(sender, rest);
        }
        E2eAction::Pass
    }

    /// Record an announced public value; invalid announcements are dropped.
    fn record_peer(&mut self, sender: &str, b64: &str) -> bool {
        let Ok(bytes) = URL_SAFE.decode(b64) else {
            return false;
        };
        let Ok(value) = modp::parse_public(&bytes) else {
            return false;
        };
        let mut fixed = [0u8; PUB_LEN];
        fixed.copy_from_slice(&bytes);

        // A re-announce may carry a new public value; channels derived from
        // the old one would no longer interoperate.
        if let Some(existing) = self.peers.get(sender) {
            if existing.bytes != fixed {
                self.channels.remove(sender);
            }
        }
        debug!(peer = %sender, "recorded peer public value");
        self.peers.insert(sender.to_string(), PeerKey { value, bytes: fixed });
        true
    }

    fn open_private(&mut self, sender: &str, rest: &str) -> E2eAction {
        let Some((to_user, b64)) = rest.split_once(':') else {
            return E2eAction::Consumed;
        };
        if to_user != self.username || !self.peers.contains_key(sender) {
            return E2eAction::Consumed;
        }
        let Ok(blob) = URL_SAFE.decode(b64) else {
            return E2eAction::Consumed;
        };
        if blob.len() < NONCE_LEN {
            return E2eAction::Consumed;
        }

        self.ensure_channel(sender);
        let channel = &self.channels[sender];
        let (nonce, ct) = blob.split_at(NONCE_LEN);
        let aad = format!("{sender}->{}", self.username);
        match codec::open(&channel.recv, nonce, aad.as_bytes(), ct) {
            Ok(pt) => match String::from_utf8(pt) {
                Ok(text) => E2eAction::Decrypted(text),
                Err(_) => E2eAction::Consumed,
            },
            Err(_) => E2eAction::Consumed,
        }
    }

    fn ensure_channel(&mut self, peer: &str) {
        if self.channels.contains_key(peer) {
            return;
        }
        let key = &self.peers[peer];
        let shared = self.keypair.shared_secret(&key.value);
        let k_send = modp::derive_e2e_key(
            &shared,
            &self.username,
            peer,
            self.keypair.public_bytes(),
            &key.bytes,
        );
        let k_recv = modp::derive_e2e_key(
            &shared,
            peer,
            &self.username,
            &key.bytes,
            self.keypair.public_bytes(),
        );
        self.channels.insert(
            peer.to_string(),
            Channel {
                send: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&k_send)),
                recv: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&k_recv)),
            },
        );
    }
}

/// Split a relayed line `"<user> > <message>"` into sender and payload.
pub fn split_sender(line: &str) -> Option<(&str, &str)> {
    line.split_once(" > ")
        .map(|(user, message)| (user.trim(), message.trim()))
}

/// A chat session with the E2E layer wired into the receive path: control
/// frames are consumed (REPLYs sent automatically), private messages are
/// decrypted and rendered, everything else passes through untouched.
///
/// Shareable between a reader task and a writer task; `close` tears the
/// session down and later calls fail with [`ChatError::NotConnected`].
pub struct E2eChatClient {
    sender: Mutex<Option<ChatSender>>,
    receiver: Mutex<Option<ChatReceiver>>,
    e2e: StdMutex<E2eManager>,
}

impl E2eChatClient {
    /// Connect, then immediately announce our public value.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        alg: Algorithm,
    ) -> Result<Self, ChatError> {
        let (sender, receiver) = ChatClient::connect(host, port, username, alg).await?.split();
        let client = Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            e2e: StdMutex::new(E2eManager::new(username)),
        };
        client.announce().await?;
        Ok(client)
    }

    async fn send_line(&self, line: &str) -> Result<(), ChatError> {
        let mut guard = self.sender.lock().await;
        let sender = guard.as_mut().ok_or(ChatError::NotConnected)?;
        sender.send(line).await
    }

    /// Broadcast (or re-broadcast) the HELLO announcement.
    pub async fn announce(&self) -> Result<(), ChatError> {
        let line = self.e2e.lock().expect("e2e lock").announce_line();
        self.send_line(&line).await
    }

    /// Ordinary broadcast message, readable by everyone.
    pub async fn send_plain(&self, text: &str) -> Result<(), ChatError> {
        self.send_line(text).await
    }

    /// Private message; `None` targets every known peer.
    pub async fn send_private(
        &self,
        text: &str,
        recipients: Option<&[String]>,
    ) -> Result<(), ChatError> {
        let lines = self
            .e2e
            .lock()
            .expect("e2e lock")
            .seal_private(text, recipients)?;
        for line in lines {
            self.send_line(&line).await?;
        }
        Ok(())
    }

    pub async fn known_users(&self) -> Vec<String> {
        self.e2e.lock().expect("e2e lock").known_users()
    }

    /// Next displayable line: filters control frames, auto-replies to
    /// HELLOs, and renders decrypted private messages as
    /// `"<sender> [E2E] > <plaintext>"`.
    pub async fn recv(&self) -> Result<String, ChatError> {
        loop {
            let line = {
                let mut guard = self.receiver.lock().await;
                let receiver = guard.as_mut().ok_or(ChatError::NotConnected)?;
                receiver.recv().await?
            };
            let Some((sender, payload)) = split_sender(&line) else {
                return Ok(line);
            };
            let action = self
                .e2e
                .lock()
                .expect("e2e lock")
                .handle_incoming(sender, payload);
            match action {
                E2eAction::Pass => return Ok(line),
                E2eAction::Consumed => continue,
                E2eAction::Reply(reply) => {
                    self.send_line(&reply).await?;
                    continue;
                }
                E2eAction::Decrypted(text) => return Ok(format!("{sender} [E2E] > {text}")),
            }
        }
    }

    pub async fn recv_timeout(&self, limit: Duration) -> Result<String, ChatError> {
        timeout(limit, self.recv()).await.map_err(|_| ChatError::Timeout)?
    }

    pub async fn close(&self) -> Result<(), ChatError> {
        self.receiver.lock().await.take();
        match self.sender.lock().await.take() {
            Some(sender) => sender.close().await,
            None => Ok(()),
        }
    }
}
