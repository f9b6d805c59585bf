//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p sync_client -- [--config client.json] [--addr 127.0.0.1:11000]
//!       [--name Diver] [--password secret]
//!
//! Joins the server, acknowledges the initial sync, then logs every packet
//! the server sends until the connection closes.

use std::{env, time::Duration};

use anyhow::Context;
use sync_client::client::SyncClient;
use sync_shared::{
    config::ClientConfig,
    session::{AuthenticationContext, PlayerSettings},
};
use tracing::info;

const JOIN_TIMEOUT: Duration = Duration::from_secs(600);

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let raw = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            ClientConfig::from_json_str(&raw).context("parse config")?
        }
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--password" if i + 1 < args.len() => {
                cfg.server_password = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = SyncClient::connect_with(&cfg).await.context("connect")?;

    let mut auth = AuthenticationContext::new(cfg.player_name.clone());
    if let Some(password) = &cfg.server_password {
        auth = auth.with_password(password.clone());
    }
    let sync = client
        .join(auth, PlayerSettings::default(), JOIN_TIMEOUT)
        .await
        .context("join")?;
    info!(
        player_id = ?client.player_id,
        entities = sync.global_root_entities.len(),
        simulations = sync.simulations.len(),
        "Joined"
    );

    loop {
        match client.recv_timeout(Duration::from_secs(1)).await {
            Ok(Some(packet)) => info!(packet = packet.kind(), "Received"),
            Ok(None) => {}
            Err(e) => {
                info!(error = %e, "Disconnected from server");
                break;
            }
        }
    }

    Ok(())
}
