//! Broadcast chat with a negotiated transport codec and an end-to-end
//! private-messaging layer on top.
//!
//! A central relay re-emits every line it receives to every other admitted
//! connection, stamped with the sender's name. Transport encryption (MODP
//! group 14 key agreement into AES-256-GCM) is negotiated per connection so
//! the relay can attribute messages; the E2E layer rides the broadcast as
//! reserved-prefix lines the relay forwards but cannot read.

pub mod client;
pub mod crypto;
pub mod e2e;
pub mod error;
pub mod net;
pub mod server;

pub use client::{ChatClient, ChatReceiver, ChatSender};
pub use crypto::negotiate::Algorithm;
pub use e2e::{E2eChatClient, E2eManager};
pub use error::ChatError;
pub use server::ChatServer;
