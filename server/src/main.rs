use clap::Parser;
use log::{error, info};
use server::config::{GameMode, ServerConfig};
use server::network::{Server, ServerMessage};
use std::path::PathBuf;

/// Command line arguments. Flags override values from the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
    /// Maximum number of players
    #[clap(short, long)]
    max_players: Option<usize>,
    /// Game mode
    #[clap(long, value_enum)]
    mode: Option<GameMode>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, server::error::ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting {:?} server for up to {} players",
        config.mode, config.max_players
    );

    let mut server = Server::bind(config).await?;
    let shutdown = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
