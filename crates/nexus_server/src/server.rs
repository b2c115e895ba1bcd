//! Wires the network pipeline to the world runtime.

use std::sync::Arc;

use anyhow::Context;
use nexus_network::{NetworkSettings, SharedNetworkState};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::WorldConfig;
use crate::directory::WorldDirectory;
use crate::session::{run_session, WorldContext};
use crate::static_data::StaticDataStore;
use crate::store::{CharacterStore, StoreAuthProvider};
use crate::zone::registry::ZoneRegistry;

pub struct WorldServer {
    ctx: WorldContext,
    settings: NetworkSettings,
}

impl WorldServer {
    pub fn new(
        store: Arc<dyn CharacterStore>,
        data: Arc<StaticDataStore>,
        config: WorldConfig,
        settings: NetworkSettings,
    ) -> Self {
        let config = Arc::new(config);
        let directory = Arc::new(WorldDirectory::new());
        let registry = ZoneRegistry::new(
            config.clone(),
            data.clone(),
            store.clone(),
            directory.clone(),
        );

        Self {
            ctx: WorldContext {
                directory,
                registry,
                store,
                data,
                config,
            },
            settings,
        }
    }

    /// The assembled context, for embedding the world without a socket
    /// (tests, tooling).
    pub fn context(&self) -> WorldContext {
        self.ctx.clone()
    }

    /// Binds the configured address and serves until the process exits.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.settings.address)
            .await
            .with_context(|| format!("binding {}", self.settings.address))?;
        self.run_on(listener).await
    }

    /// Serves on an already-bound listener. Tests bind port zero and read
    /// the local address back before calling this.
    pub async fn run_on(self, listener: TcpListener) -> anyhow::Result<()> {
        let (new_sessions_tx, new_sessions_rx) = flume::bounded(64);

        let shared = SharedNetworkState::new(
            self.settings.clone(),
            Arc::new(StoreAuthProvider(self.ctx.store.clone())),
            new_sessions_tx,
        );

        info!(address = %listener.local_addr()?, "world server listening");
        tokio::spawn(nexus_network::serve(listener, shared));

        loop {
            let new = new_sessions_rx
                .recv_async()
                .await
                .context("network layer shut down")?;
            tokio::spawn(run_session(self.ctx.clone(), new));
        }
    }
}
