use std::net::SocketAddr;

use anyhow::Result;
use secure_chat::net::framing::{read_frame, write_frame};
use secure_chat::{Algorithm, ChatClient, ChatError, ChatServer, E2eChatClient};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, sleep};

async fn start_server() -> Result<(ChatServer, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = ChatServer::new();
    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.serve(listener).await;
    });
    Ok((server, addr))
}

async fn connect(addr: SocketAddr, username: &str, alg: Algorithm) -> Result<ChatClient> {
    Ok(ChatClient::connect(&addr.ip().to_string(), addr.port(), username, alg).await?)
}

/// Consume buffered lines (E2E control traffic) until the window goes quiet.
async fn drain(client: &E2eChatClient) {
    while client
        .recv_timeout(Duration::from_millis(500))
        .await
        .is_ok()
    {}
}

async fn broadcast_reaches_other_clients(alg: Algorithm) -> Result<()> {
    let (_server, addr) = start_server().await?;
    let mut alice = connect(addr, "alice", alg).await?;
    let mut bob = connect(addr, "bob", alg).await?;
    let mut carol = connect(addr, "carol", alg).await?;

    alice.send("hello").await?;

    assert_eq!(bob.recv_timeout(Duration::from_secs(2)).await?, "alice > hello");
    assert_eq!(carol.recv_timeout(Duration::from_secs(2)).await?, "alice > hello");

    // exactly one frame each
    assert!(matches!(
        bob.recv_timeout(Duration::from_millis(300)).await,
        Err(ChatError::Timeout)
    ));

    // the sender is not in the fan-out set
    assert!(matches!(
        alice.recv_timeout(Duration::from_millis(300)).await,
        Err(ChatError::Timeout)
    ));

    alice.close().await?;
    bob.close().await?;
    carol.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_plain() -> Result<()> {
    broadcast_reaches_other_clients(Algorithm::Plain).await
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_dh() -> Result<()> {
    broadcast_reaches_other_clients(Algorithm::Dh).await
}

async fn disconnect_does_not_break_broadcast(alg: Algorithm) -> Result<()> {
    let (server, addr) = start_server().await?;
    let mut alice = connect(addr, "alice", alg).await?;
    let bob = connect(addr, "bob", alg).await?;
    let mut carol = connect(addr, "carol", alg).await?;

    bob.close().await?;
    sleep(Duration::from_millis(100)).await;

    alice.send("hi all").await?;
    assert_eq!(
        carol.recv_timeout(Duration::from_secs(2)).await?,
        "alice > hi all"
    );

    sleep(Duration::from_millis(100)).await;
    let users = server.users().await;
    assert!(!users.contains(&"bob".to_string()));
    assert!(users.contains(&"alice".to_string()));
    assert!(users.contains(&"carol".to_string()));

    alice.close().await?;
    carol.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_plain() -> Result<()> {
    disconnect_does_not_break_broadcast(Algorithm::Plain).await
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_dh() -> Result<()> {
    disconnect_does_not_break_broadcast(Algorithm::Dh).await
}

async fn unicode_survives(alg: Algorithm) -> Result<()> {
    let (_server, addr) = start_server().await?;
    let mut alice = connect(addr, "алиса", alg).await?;
    let mut boris = connect(addr, "борис", alg).await?;

    alice.send("Привет, мир 🌍").await?;
    assert_eq!(
        boris.recv_timeout(Duration::from_secs(2)).await?,
        "алиса > Привет, мир 🌍"
    );

    alice.close().await?;
    boris.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unicode_plain() -> Result<()> {
    unicode_survives(Algorithm::Plain).await
}

#[tokio::test(flavor = "multi_thread")]
async fn unicode_dh() -> Result<()> {
    unicode_survives(Algorithm::Dh).await
}

#[tokio::test(flavor = "multi_thread")]
async fn bogus_handshake_closes_only_that_connection() -> Result<()> {
    let (server, addr) = start_server().await?;
    let mut alice = connect(addr, "alice", Algorithm::Plain).await?;
    let mut bob = connect(addr, "bob", Algorithm::Plain).await?;

    let mut bogus = TcpStream::connect(addr).await?;
    write_frame(&mut bogus, b"ALG:BOGUS").await?;
    // the relay closes without replying
    assert!(read_frame(&mut bogus).await.is_err());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.users().await.len(), 2);

    alice.send("still here").await?;
    assert_eq!(
        bob.recv_timeout(Duration::from_secs(2)).await?,
        "alice > still here"
    );

    alice.close().await?;
    bob.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_private_message_is_opaque_to_bystanders() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let host = addr.ip().to_string();

    let alice = E2eChatClient::connect(&host, addr.port(), "alice", Algorithm::Plain).await?;
    let bob = E2eChatClient::connect(&host, addr.port(), "bob", Algorithm::Plain).await?;
    // carol watches the raw broadcast without an E2E layer
    let mut carol = connect(addr, "carol", Algorithm::Plain).await?;

    // alice consumes bob's HELLO and auto-replies; bob then consumes the REPLY
    drain(&alice).await;
    drain(&bob).await;
    assert!(alice.known_users().await.contains(&"bob".to_string()));
    assert!(bob.known_users().await.contains(&"alice".to_string()));

    alice.send_private("secret", Some(&["bob".to_string()])).await?;

    assert_eq!(
        bob.recv_timeout(Duration::from_secs(2)).await?,
        "alice [E2E] > secret"
    );

    // carol sees the envelope, never the plaintext
    let envelope = loop {
        let line = carol.recv_timeout(Duration::from_secs(2)).await?;
        if line.starts_with("alice > __E2E1_MSG__:") {
            break line;
        }
    };
    assert!(envelope.starts_with("alice > __E2E1_MSG__:bob:"));
    assert!(!envelope.contains("secret"));

    alice.close().await?;
    bob.close().await?;
    carol.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_group_message_reaches_every_recipient() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let host = addr.ip().to_string();

    let alice = E2eChatClient::connect(&host, addr.port(), "alice", Algorithm::Dh).await?;
    let bob = E2eChatClient::connect(&host, addr.port(), "bob", Algorithm::Dh).await?;
    let carol = E2eChatClient::connect(&host, addr.port(), "carol", Algorithm::Dh).await?;

    // let the HELLO/REPLY traffic settle pairwise
    drain(&alice).await;
    drain(&bob).await;
    drain(&carol).await;
    drain(&alice).await;

    alice.send_private("meeting at noon", None).await?;

    assert_eq!(
        bob.recv_timeout(Duration::from_secs(2)).await?,
        "alice [E2E] > meeting at noon"
    );
    assert_eq!(
        carol.recv_timeout(Duration::from_secs(2)).await?,
        "alice [E2E] > meeting at noon"
    );

    alice.close().await?;
    bob.close().await?;
    carol.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_lines_pass_through_e2e_clients() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let host = addr.ip().to_string();

    let alice = E2eChatClient::connect(&host, addr.port(), "alice", Algorithm::Plain).await?;
    let bob = E2eChatClient::connect(&host, addr.port(), "bob", Algorithm::Plain).await?;
    drain(&alice).await;
    drain(&bob).await;

    alice.send_plain("lunch?").await?;
    assert_eq!(
        bob.recv_timeout(Duration::from_secs(2)).await?,
        "alice > lunch?"
    );

    alice.close().await?;
    bob.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn send_after_close_is_not_connected() -> Result<()> {
    let (_server, addr) = start_server().await?;
    let host = addr.ip().to_string();

    let alice = E2eChatClient::connect(&host, addr.port(), "alice", Algorithm::Plain).await?;
    alice.close().await?;
    assert!(matches!(
        alice.send_plain("anyone?").await,
        Err(ChatError::NotConnected)
    ));
    Ok(())
}
