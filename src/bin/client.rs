use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use secure_chat::{Algorithm, E2eChatClient};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AlgArg {
    Plain,
    Dh,
}

impl From<AlgArg> for Algorithm {
    fn from(alg: AlgArg) -> Self {
        match alg {
            AlgArg::Plain => Algorithm::Plain,
            AlgArg::Dh => Algorithm::Dh,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive chat client with E2E private messaging")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 1234)]
    port: u16,

    #[arg(long)]
    username: String,

    /// Transport algorithm to offer the relay.
    #[arg(long, value_enum, default_value = "dh")]
    alg: AlgArg,
}

fn print_usage(cmd: &str) {
    match cmd {
        "/personal" => println!("Usage: /personal <user> <message>"),
        "/group" => println!("Usage: /group <user1,user2,...> <message>"),
        _ => println!("Usage: {cmd} <message>"),
    }
}

async fn dispatch(client: &E2eChatClient, line: &str) -> Result<()> {
    if let Some(rest) = line.strip_prefix("/personal ") {
        match rest.split_once(' ') {
            Some((to, msg)) => {
                client
                    .send_private(msg, Some(&[to.to_string()]))
                    .await?
            }
            None => print_usage("/personal"),
        }
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix("/group ") {
        match rest.split_once(' ') {
            Some((list, msg)) => {
                let recipients: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect();
                client.send_private(msg, Some(&recipients)).await?;
            }
            None => print_usage("/group"),
        }
        return Ok(());
    }
    if let Some(msg) = line.strip_prefix("/all ") {
        client.send_private(msg, None).await?;
        return Ok(());
    }
    if line == "/announce" {
        client.announce().await?;
        return Ok(());
    }
    if line == "/users" {
        println!("Known users: {:?}", client.known_users().await);
        return Ok(());
    }
    client.send_plain(line).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = Arc::new(
        E2eChatClient::connect(&args.host, args.port, &args.username, args.alg.into()).await?,
    );

    // Line input is blocking, so it lives on its own thread and feeds the
    // cooperative side through a channel.
    let (tx, mut rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.blocking_send(line.trim_end().to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            loop {
                match client.recv().await {
                    Ok(line) => println!("\n{line}"),
                    Err(_) => break,
                }
            }
        })
    };

    while let Some(line) = rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(err) = dispatch(&client, line).await {
            warn!(%err, "send failed");
            break;
        }
    }

    reader.abort();
    client.close().await?;
    Ok(())
}
