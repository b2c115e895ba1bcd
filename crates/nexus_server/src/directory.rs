//! Process-wide session state: who is online, under which character name,
//! and where. Contention here is session-event rate, not tick rate, so a
//! mutex-protected map is the right shape.

use nexus_network::ConnectionHandle;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::guid::{Guid, GuidAllocator, GuidKind};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SessionPhase {
    Selecting,
    Loading,
    InWorld,
}

/// The character a session has committed to, populated at select and
/// completed at world entry.
#[derive(Clone, Debug)]
pub struct SessionCharacter {
    pub character_id: u64,
    pub name: String,
    pub guid: Option<Guid>,
    pub zone: Option<(u32, u32)>,
}

pub struct WorldSession {
    pub account_id: u32,
    pub connection: ConnectionHandle,
    pub phase: SessionPhase,
    pub character: Option<SessionCharacter>,
}

#[derive(Default)]
struct DirectoryInner {
    sessions: FxHashMap<u32, WorldSession>,
    /// `lower(character_name) -> account_id`, coherent with session
    /// insert/remove.
    names: FxHashMap<String, u32>,
}

/// Owner of the session map, the name index and the GUID counter.
pub struct WorldDirectory {
    inner: Mutex<DirectoryInner>,
    guids: GuidAllocator,
}

/// What a removed session was doing, so the caller can despawn and save.
pub struct RemovedSession {
    pub character_id: Option<u64>,
    pub guid: Option<Guid>,
    pub zone: Option<(u32, u32)>,
}

impl WorldDirectory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::default(),
            guids: GuidAllocator::new(),
        }
    }

    pub fn allocate_guid(&self, kind: GuidKind) -> Guid {
        self.guids.allocate(kind)
    }

    /// Registers a fresh session. `false` means the account already has a
    /// live session (duplicate login).
    pub fn try_insert(&self, account_id: u32, connection: ConnectionHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&account_id) {
            return false;
        }
        inner.sessions.insert(
            account_id,
            WorldSession {
                account_id,
                connection,
                phase: SessionPhase::Selecting,
                character: None,
            },
        );
        true
    }

    /// Binds a selected character to the session and claims its name in
    /// the index.
    pub fn bind_character(&self, account_id: u32, character_id: u64, name: &str) {
        let mut inner = self.inner.lock();
        inner.names.insert(name.to_lowercase(), account_id);
        if let Some(session) = inner.sessions.get_mut(&account_id) {
            session.phase = SessionPhase::Loading;
            session.character = Some(SessionCharacter {
                character_id,
                name: name.to_owned(),
                guid: None,
                zone: None,
            });
        }
    }

    pub fn set_in_world(&self, account_id: u32, guid: Guid, zone: (u32, u32)) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(&account_id) {
            session.phase = SessionPhase::InWorld;
            if let Some(character) = &mut session.character {
                character.guid = Some(guid);
                character.zone = Some(zone);
            }
        }
    }

    /// Removes the session and its name-index entry.
    pub fn remove(&self, account_id: u32) -> Option<RemovedSession> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(&account_id)?;
        let character = session.character;
        if let Some(character) = &character {
            inner.names.remove(&character.name.to_lowercase());
        }
        Some(RemovedSession {
            character_id: character.as_ref().map(|c| c.character_id),
            guid: character.as_ref().and_then(|c| c.guid),
            zone: character.as_ref().and_then(|c| c.zone),
        })
    }

    /// O(1) whisper routing.
    pub fn account_by_name(&self, name: &str) -> Option<u32> {
        self.inner.lock().names.get(&name.to_lowercase()).copied()
    }

    pub fn connection_of(&self, account_id: u32) -> Option<ConnectionHandle> {
        self.inner
            .lock()
            .sessions
            .get(&account_id)
            .map(|s| s.connection.clone())
    }

    pub fn phase_of(&self, account_id: u32) -> Option<SessionPhase> {
        self.inner.lock().sessions.get(&account_id).map(|s| s.phase)
    }

    pub fn character_of(&self, account_id: u32) -> Option<SessionCharacter> {
        self.inner
            .lock()
            .sessions
            .get(&account_id)
            .and_then(|s| s.character.clone())
    }

    /// Snapshot of every live connection, for global fan-out.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.inner
            .lock()
            .sessions
            .values()
            .map(|s| s.connection.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl Default for WorldDirectory {
    fn default() -> Self {
        Self::new()
    }
}
