//! The durable character store, seen from the core as an async trait.
//!
//! The core never unwinds game state on a persistence failure: writes are
//! fire-and-forget, the store owns its queueing and retries, and state is
//! reconciled on the next successful write. The in-memory implementation
//! backs the development binary and the test suite.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use glam::Vec3;
use nexus_network::{AccountRecord, AuthProvider, SessionRecord};
use parking_lot::Mutex;
use rand::RngCore;
use rustc_hash::FxHashMap;

/// A stored character row.
#[derive(Clone, Debug)]
pub struct Character {
    pub character_id: u64,
    pub account_id: u32,
    pub name: String,
    pub class_id: u32,
    pub faction_id: u32,
    pub level: u8,
    pub xp: u64,
    pub currency: u64,
    pub world_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Soft delete: the row (and its original name) is preserved.
    pub deleted: bool,
}

/// The mutable subset a world save writes back.
#[derive(Clone, Debug)]
pub struct CharacterSnapshot {
    pub character_id: u64,
    pub world_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub level: u8,
    pub xp: u64,
    pub currency: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("character name is already taken")]
    NameTaken,
    #[error("invalid character name")]
    InvalidName,
    #[error("no such character")]
    UnknownCharacter,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// This trait uses [`mod@async_trait`]. All operations are asynchronous
/// with explicit error results.
#[async_trait]
pub trait CharacterStore: Send + Sync + 'static {
    async fn account_by_email(&self, email: &str) -> anyhow::Result<Option<AccountRecord>>;

    async fn store_session_key(
        &self,
        account_id: u32,
        session_key: [u8; 16],
        expires_at: SystemTime,
    ) -> anyhow::Result<()>;

    async fn fetch_session(&self, account_id: u32) -> anyhow::Result<Option<SessionRecord>>;

    async fn clear_session(&self, account_id: u32) -> anyhow::Result<()>;

    async fn characters_for(&self, account_id: u32) -> anyhow::Result<Vec<Character>>;

    async fn create_character(
        &self,
        account_id: u32,
        name: &str,
        class_id: u32,
        faction_id: u32,
        world_id: u32,
        position: Vec3,
    ) -> Result<Character, StoreError>;

    async fn save_character(&self, snapshot: CharacterSnapshot) -> anyhow::Result<()>;

    async fn delete_character(&self, character_id: u64) -> anyhow::Result<()>;
}

/// Bridges the network handshake callbacks onto a [`CharacterStore`].
pub struct StoreAuthProvider(pub Arc<dyn CharacterStore>);

#[async_trait]
impl AuthProvider for StoreAuthProvider {
    async fn account_by_email(&self, email: &str) -> anyhow::Result<Option<AccountRecord>> {
        self.0.account_by_email(email).await
    }

    async fn store_session_key(
        &self,
        account_id: u32,
        session_key: [u8; 16],
        expires_at: SystemTime,
    ) -> anyhow::Result<()> {
        self.0
            .store_session_key(account_id, session_key, expires_at)
            .await
    }

    async fn fetch_session(&self, account_id: u32) -> anyhow::Result<Option<SessionRecord>> {
        self.0.fetch_session(account_id).await
    }

    async fn clear_session(&self, account_id: u32) -> anyhow::Result<()> {
        self.0.clear_session(account_id).await
    }
}

#[derive(Default)]
struct MemoryInner {
    accounts: FxHashMap<u32, AccountRecord>,
    accounts_by_email: FxHashMap<String, u32>,
    sessions: FxHashMap<u32, SessionRecord>,
    characters: FxHashMap<u64, Character>,
    next_account_id: u32,
    next_character_id: u64,
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryCharacterStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account, deriving its SRP6 verifier the same way the
    /// client does.
    pub fn create_account(&self, email: &str, password: &str) -> u32 {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let verifier = nexus_crypto::generate_verifier(email, password, &salt);

        let mut inner = self.inner.lock();
        inner.next_account_id += 1;
        let account_id = inner.next_account_id;
        inner.accounts.insert(
            account_id,
            AccountRecord {
                account_id,
                salt,
                verifier,
            },
        );
        inner
            .accounts_by_email
            .insert(email.to_lowercase(), account_id);
        account_id
    }

    fn name_is_valid(name: &str) -> bool {
        let len = name.chars().count();
        (2..=24).contains(&len) && name.chars().all(char::is_alphabetic)
    }
}

#[async_trait]
impl CharacterStore for MemoryCharacterStore {
    async fn account_by_email(&self, email: &str) -> anyhow::Result<Option<AccountRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .accounts_by_email
            .get(&email.to_lowercase())
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn store_session_key(
        &self,
        account_id: u32,
        session_key: [u8; 16],
        expires_at: SystemTime,
    ) -> anyhow::Result<()> {
        self.inner.lock().sessions.insert(
            account_id,
            SessionRecord {
                session_key,
                expires_at,
            },
        );
        Ok(())
    }

    async fn fetch_session(&self, account_id: u32) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.inner.lock().sessions.get(&account_id).cloned())
    }

    async fn clear_session(&self, account_id: u32) -> anyhow::Result<()> {
        self.inner.lock().sessions.remove(&account_id);
        Ok(())
    }

    async fn characters_for(&self, account_id: u32) -> anyhow::Result<Vec<Character>> {
        Ok(self
            .inner
            .lock()
            .characters
            .values()
            .filter(|c| c.account_id == account_id && !c.deleted)
            .cloned()
            .collect())
    }

    async fn create_character(
        &self,
        account_id: u32,
        name: &str,
        class_id: u32,
        faction_id: u32,
        world_id: u32,
        position: Vec3,
    ) -> Result<Character, StoreError> {
        if !Self::name_is_valid(name) {
            return Err(StoreError::InvalidName);
        }

        let mut inner = self.inner.lock();
        let taken = inner
            .characters
            .values()
            .any(|c| !c.deleted && c.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(StoreError::NameTaken);
        }

        inner.next_character_id += 1;
        let character = Character {
            character_id: inner.next_character_id,
            account_id,
            name: name.to_owned(),
            class_id,
            faction_id,
            level: 1,
            xp: 0,
            currency: 0,
            world_id,
            position,
            rotation: Vec3::ZERO,
            deleted: false,
        };
        inner
            .characters
            .insert(character.character_id, character.clone());
        Ok(character)
    }

    async fn save_character(&self, snapshot: CharacterSnapshot) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(character) = inner.characters.get_mut(&snapshot.character_id) {
            character.world_id = snapshot.world_id;
            character.position = snapshot.position;
            character.rotation = snapshot.rotation;
            character.level = snapshot.level;
            character.xp = snapshot.xp;
            character.currency = snapshot.currency;
        }
        Ok(())
    }

    async fn delete_character(&self, character_id: u64) -> anyhow::Result<()> {
        if let Some(character) = self.inner.lock().characters.get_mut(&character_id) {
            character.deleted = true;
        }
        Ok(())
    }
}
