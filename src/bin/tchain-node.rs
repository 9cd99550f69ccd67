#![forbid(unsafe_code)]
//! TChain full node

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tchain::config::load_config;
use tchain::node::Node;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to accept RPC connections on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// SQLite database path
    #[arg(long)]
    db: Option<String>,

    /// Bootstrap peer to dial on startup; may be repeated
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(listen) = cli.listen {
        config.network.listen_addr = listen;
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    config.network.bootstrap_peers.extend(cli.peers);

    let node = Node::init(config).await?;
    node.run().await?;

    Ok(())
}
