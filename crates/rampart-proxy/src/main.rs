mod auth;
mod backend;
mod bungeecord;
mod chat;
mod config;
mod connect;
mod crypto;
mod events;
mod forge;
mod forwarding;
mod messages;
mod network;
mod phase;
mod player;
mod plugin_message;
mod proxy;
mod proxyproto;
mod ratelimit;
mod server;
mod session;
mod tablist;
#[cfg(test)]
mod test_support;

use clap::Parser;
use config::ProxyConfig;
use proxy::Proxy;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "rampart", version, about = "A Minecraft Java edition proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "RAMPART_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ProxyConfig::load(&args.config)?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Rampart proxy...");
    info!(
        "Config loaded: bind={}, online_mode={}, forwarding={:?}, servers={}",
        config.bind,
        config.online_mode,
        config.forwarding.mode,
        config.servers.len()
    );

    let proxy = Proxy::new(config)?;

    let shutdown = proxy.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.shutdown(None).await,
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    proxy.run(Vec::new()).await?;
    proxy.shutdown(None).await;
    Ok(())
}
