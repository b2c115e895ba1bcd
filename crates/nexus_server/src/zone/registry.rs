//! The zone supervisor: lazily spawns instances, hands out handles, and
//! forgets instances that retire.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{ZoneArgs, ZoneHandle, ZoneInstance};
use crate::config::WorldConfig;
use crate::directory::WorldDirectory;
use crate::static_data::{ContentType, StaticDataStore};
use crate::store::CharacterStore;

#[derive(Default)]
struct RegistryInner {
    zones: FxHashMap<(u32, u32), ZoneHandle>,
    /// Instance ids are content-defined and monotonic per world; a retired
    /// expedition re-enters as the next instance.
    next_instance: FxHashMap<u32, u32>,
}

pub struct ZoneRegistry {
    inner: Mutex<RegistryInner>,
    config: Arc<WorldConfig>,
    data: Arc<StaticDataStore>,
    store: Arc<dyn CharacterStore>,
    directory: Arc<WorldDirectory>,
    retire_tx: flume::Sender<(u32, u32)>,
}

impl ZoneRegistry {
    pub fn new(
        config: Arc<WorldConfig>,
        data: Arc<StaticDataStore>,
        store: Arc<dyn CharacterStore>,
        directory: Arc<WorldDirectory>,
    ) -> Arc<Self> {
        let (retire_tx, retire_rx) = flume::unbounded();

        let registry = Arc::new(Self {
            inner: Mutex::default(),
            config,
            data,
            store,
            directory,
            retire_tx,
        });

        // Supervision loop: drop registry entries as instances report
        // retirement. Holding a weak reference lets the whole registry be
        // dropped in tests without a task keeping it alive.
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Ok(coord) = retire_rx.recv_async().await {
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                registry.inner.lock().zones.remove(&coord);
                debug!(world_id = coord.0, instance_id = coord.1, "zone deregistered");
            }
        });

        registry
    }

    /// Handle for a zone the caller may create by entering: an existing
    /// live instance of the world is reused, otherwise a fresh instance is
    /// spawned under the next instance id.
    pub fn enter(&self, world_id: u32) -> anyhow::Result<ZoneHandle> {
        let content = self
            .data
            .zone(world_id)
            .map(|z| z.content)
            .with_context(|| format!("unknown world {world_id}"))?;

        let mut inner = self.inner.lock();

        if let Some(handle) = inner
            .zones
            .iter()
            .filter(|((w, _), _)| *w == world_id)
            .map(|(_, handle)| handle)
            .find(|h| h.is_live())
        {
            return Ok(handle.clone());
        }

        let next = inner.next_instance.entry(world_id).or_insert(0);
        *next += 1;
        let instance_id = *next;

        let handle = self.spawn_instance(world_id, instance_id, content);
        inner.zones.insert((world_id, instance_id), handle.clone());
        Ok(handle)
    }

    /// Handle for an already-running instance; entering cannot create a
    /// specific instance id.
    pub fn get(&self, world_id: u32, instance_id: u32) -> Option<ZoneHandle> {
        self.inner
            .lock()
            .zones
            .get(&(world_id, instance_id))
            .filter(|h| h.is_live())
            .cloned()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().zones.values().filter(|h| h.is_live()).count()
    }

    fn spawn_instance(&self, world_id: u32, instance_id: u32, content: ContentType) -> ZoneHandle {
        ZoneInstance::spawn(ZoneArgs {
            world_id,
            instance_id,
            content,
            config: self.config.clone(),
            data: self.data.clone(),
            store: self.store.clone(),
            directory: self.directory.clone(),
            retire_tx: self.retire_tx.clone(),
        })
    }
}

impl std::fmt::Debug for ZoneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}
