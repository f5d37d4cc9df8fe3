//! The broadcast relay.
//!
//! One task per admitted connection reads frames in arrival order; each
//! line is stamped `"<user> > <text>"` and fanned out in parallel to every
//! other admitted connection. A target that fails or stalls past
//! [`BROADCAST_TIMEOUT`] is evicted after the whole fan-out settles, so an
//! eviction never invalidates a send already in flight. There is no queue;
//! eviction is the only backpressure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

use crate::crypto::Codec;
use crate::crypto::negotiate::server_negotiate;
use crate::error::ChatError;
use crate::net::framing::{read_message, write_frame};

pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(1);

type ConnId = u64;

struct Peer {
    username: String,
    codec: Arc<Codec>,
    // Held for the duration of a frame write; frame writes are not atomic,
    // so a writer must never be shared without it.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    // Signalled on eviction so the connection's read task ends too.
    closed: Notify,
}

#[derive(Clone)]
pub struct ChatServer {
    peers: Arc<Mutex<HashMap<ConnId, Arc<Peer>>>>,
    next_id: Arc<AtomicU64>,
}

impl ChatServer {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Accept loop: one task per connection, forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ChatError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            info!(%addr, "connection accepted");
            let server = self.clone();
            tokio::spawn(async move { server.handle_client(stream).await });
        }
    }

    /// Usernames of currently admitted connections.
    pub async fn users(&self) -> Vec<String> {
        self.peers
            .lock()
            .await
            .values()
            .map(|p| p.username.clone())
            .collect()
    }

    async fn handle_client(&self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();

        // Handshake, then the username frame. Failures in either step close
        // the stream silently and register nothing.
        let codec = match server_negotiate(&mut reader, &mut writer).await {
            Ok(codec) => Arc::new(codec),
            Err(err) => {
                warn!(%err, "handshake failed");
                return;
            }
        };
        let username = match read_message(&mut reader, &codec).await {
            Ok(raw) => match String::from_utf8(raw) {
                Ok(name) => name,
                Err(_) => {
                    warn!("username frame was not utf-8");
                    return;
                }
            },
            Err(err) => {
                warn!(%err, "connection lost before username");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer {
            username: username.clone(),
            codec,
            writer: Arc::new(Mutex::new(writer)),
            closed: Notify::new(),
        });
        self.peers.lock().await.insert(id, Arc::clone(&peer));
        info!(user = %username, "client admitted");

        loop {
            let read = tokio::select! {
                res = read_message(&mut reader, &peer.codec) => res,
                _ = peer.closed.notified() => break,
            };
            let text = match read {
                Ok(raw) => match String::from_utf8(raw) {
                    Ok(text) => text,
                    Err(_) => break,
                },
                Err(_) => break,
            };
            info!(user = %username, message = %text, "message received");
            let line = format!("{username} > {text}");
            self.broadcast(id, line.into_bytes()).await;
        }

        if self.peers.lock().await.remove(&id).is_some() {
            info!(user = %username, "client disconnected");
        }
        let mut w = peer.writer.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *w).await;
    }

    /// Parallel fan-out to every admitted connection except the sender.
    /// Targets are snapshotted under the map lock; evictions are applied
    /// only after every send has settled.
    async fn broadcast(&self, from: ConnId, plaintext: Vec<u8>) {
        let targets: Vec<(ConnId, Arc<Peer>)> = self
            .peers
            .lock()
            .await
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, peer)| (*id, Arc::clone(peer)))
            .collect();

        let mut sends = JoinSet::new();
        for (id, peer) in targets {
            let data = plaintext.clone();
            sends.spawn(async move {
                let sent = timeout(BROADCAST_TIMEOUT, async {
                    let wire = peer.codec.encode(&data)?;
                    let mut writer = peer.writer.lock().await;
                    write_frame(&mut *writer, &wire).await
                })
                .await;
                (id, matches!(sent, Ok(Ok(()))))
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            if let Ok((id, ok)) = joined {
                if !ok {
                    failed.push(id);
                }
            }
        }
        if failed.is_empty() {
            return;
        }

        let mut peers = self.peers.lock().await;
        let evicted: Vec<Arc<Peer>> = failed.iter().filter_map(|id| peers.remove(id)).collect();
        drop(peers);
        for peer in evicted {
            warn!(user = %peer.username, "evicting unresponsive client");
            peer.closed.notify_one();
            let mut writer = peer.writer.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
        }
    }
}

impl Default for ChatServer {
    fn default() -> Self {
        Self::new()
    }
}
