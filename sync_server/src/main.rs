//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p sync_server -- [--config server.json] [--addr 0.0.0.0:11000]
//!       [--max-connections 100] [--password secret] [--hardcore] [--save world.json]
//!
//! Command line flags override values from the config file. The world is
//! restored from the save file when it exists and written back whenever the
//! last player leaves.

use std::{env, path::Path};

use anyhow::Context;
use sync_server::{
    persistence::SaveFile,
    server::{in_memory_manager, GameServer},
};
use sync_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let raw = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            ServerConfig::from_json_str(&raw).context("parse config")?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--max-connections" if i + 1 < args.len() => {
                cfg.max_connections = args[i + 1].parse().unwrap_or(cfg.max_connections);
                i += 2;
            }
            "--password" if i + 1 < args.len() => {
                cfg.server_password = Some(args[i + 1].clone());
                i += 2;
            }
            "--save" if i + 1 < args.len() => {
                cfg.save_path = args[i + 1].clone();
                i += 2;
            }
            "--hardcore" => {
                cfg.hardcore = true;
                i += 1;
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
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        max_connections = cfg.max_connections,
        hardcore = cfg.hardcore,
        save = %cfg.save_path,
        "Starting server"
    );

    let save = SaveFile::load(Path::new(&cfg.save_path)).context("load world")?;
    if let Some(save) = &save {
        info!(
            players = save.players.len(),
            entities = save.entities.len(),
            saved_at = %save.saved_at,
            "Restored world"
        );
    }

    let manager = in_memory_manager(cfg, save);
    let server = GameServer::bind(manager.clone())
        .await
        .context("create server")?;
    info!(local = %server.local_addr()?, "Server listening");

    manager.spawn_join_queue();
    server.run().await
}
