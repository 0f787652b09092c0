use clap::Parser;
use log::info;
use server::{Server, ServerConfig, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum number of connected peers
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Peers that must connect before the match can start (0 = start solo)
    #[arg(short, long, default_value = "0")]
    expected_peers: usize,

    /// Seed for role assignment and spawn placement
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tick_rate = args.tick_rate.max(1);

    info!("Starting server...");
    info!(
        "Tick rate: {}Hz, max peers: {}, expected peers: {}",
        tick_rate, args.max_clients, args.expected_peers
    );

    let mut server = Server::new(ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
        max_clients: args.max_clients,
        expected_peers: args.expected_peers,
        seed: args.seed,
    })
    .await?;

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
