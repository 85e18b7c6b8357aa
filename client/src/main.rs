use clap::Parser;
use client::Session;
use log::{info, warn};
use shared::{default_registry, ChatPacket};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Username presented at login
    #[arg(short = 'u', long, default_value = "guest")]
    username: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let registry = Arc::new(default_registry());

    info!("connecting to {} as {}", args.server, args.username);
    let session = Session::connect(&args.server, registry, args.username).await?;
    info!("type a line to chat, ctrl-d to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll_interval = interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) => {
                    if !text.trim().is_empty() && !session.send_chat(text) {
                        warn!("send failed; connection is gone");
                        break;
                    }
                }
                None => break,
            },
            _ = poll_interval.tick() => {
                while let Some(packet) = session.poll() {
                    if let Some(chat) = packet.as_any().downcast_ref::<ChatPacket>() {
                        println!("[{}] {}", chat.sender, chat.message);
                    }
                }
                if !session.is_alive() {
                    warn!("connection to server lost");
                    break;
                }
            },
        }
    }

    session.close().await;
    Ok(())
}
