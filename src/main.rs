//! `nexusd`: the development server binary. Wires the world core to the
//! in-memory character store and the built-in static data set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nexus_network::NetworkSettings;
use nexus_server::{MemoryCharacterStore, WorldConfig, WorldServer};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nexusd", about = "WildStar world-simulation server")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Config {
    listen: Option<SocketAddr>,
    max_connections: Option<usize>,
    #[serde(default)]
    world: WorldSection,
    #[serde(default)]
    accounts: Vec<AccountSection>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WorldSection {
    tick_ms: Option<u64>,
    cell_size: Option<f32>,
    broadcast_radius: Option<f32>,
    creature_budget: Option<usize>,
}

/// Development accounts registered at startup; a production deployment
/// has a real character store instead.
#[derive(Deserialize)]
struct AccountSection {
    email: String,
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<Config>(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::default(),
    };

    let mut settings = NetworkSettings::default();
    if let Some(listen) = args.listen.or(config.listen) {
        settings.address = listen;
    }
    if let Some(max) = config.max_connections {
        settings.max_connections = max;
    }

    let mut world = WorldConfig::default();
    if let Some(tick_ms) = config.world.tick_ms {
        world.tick_interval = Duration::from_millis(tick_ms);
    }
    if let Some(cell_size) = config.world.cell_size {
        world.cell_size = cell_size;
    }
    if let Some(radius) = config.world.broadcast_radius {
        world.broadcast_radius = radius;
    }
    if let Some(budget) = config.world.creature_budget {
        world.creature_budget = budget;
    }

    let store = Arc::new(MemoryCharacterStore::new());
    for account in &config.accounts {
        let account_id = store.create_account(&account.email, &account.password);
        info!(account_id, email = %account.email, "registered account");
    }

    let data = Arc::new(nexus_server::static_data::builtin());

    WorldServer::new(store, data, world, settings).run().await
}
