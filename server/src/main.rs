use clap::Parser;
use log::info;
use server::{ChatHandler, Server, ServerEvent};
use shared::default_registry;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.host, args.port);

    let registry = Arc::new(default_registry());
    let server = Server::new(bind_addr, registry);
    let mut events = server.subscribe();

    server.start().await?;

    // Log lifecycle events alongside the dispatch loop.
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                ServerEvent::Connected { client_id, args } => {
                    info!(
                        "connected: {} ({})",
                        client_id,
                        args.param("ip").unwrap_or("?")
                    );
                }
                ServerEvent::Disconnected { client_id, args } => {
                    info!(
                        "disconnected: {} ({})",
                        client_id,
                        args.param("reason").unwrap_or("no reason")
                    );
                }
                ServerEvent::Authenticated { client_id, args } => {
                    info!("authenticated: {} (success={})", client_id, args.success);
                }
                other => info!("server event: {:?}", other),
            }
        }
    });

    let run_server = server.clone();
    let run_task = tokio::spawn(async move {
        run_server.run(Arc::new(ChatHandler)).await;
    });

    tokio::select! {
        _ = run_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            server.shutdown().await;
        }
    }

    event_task.abort();
    Ok(())
}
