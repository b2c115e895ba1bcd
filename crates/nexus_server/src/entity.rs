//! The in-world entity model.
//!
//! Entities are plain data owned by exactly one zone actor; nothing here
//! holds a pointer to another entity. Cross-entity references are opaque
//! GUIDs, and a dangling GUID (the attacker logged out) is a normal case
//! handled at the lookup site.

use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use nexus_network::ConnectionHandle;
use nexus_protocol::packets::EntityKindTag;
use rustc_hash::FxHashMap;

use crate::effects::EffectSet;
use crate::guid::Guid;
use crate::static_data::CreatureTemplate;

/// Symbolic faction alignment; creatures carry a numeric faction id mapped
/// onto one of these.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FactionAlignment {
    Exile,
    Dominion,
    Hostile,
    Neutral,
    Friendly,
}

impl FactionAlignment {
    pub fn from_id(faction_id: u32) -> Self {
        match faction_id {
            0 => Self::Neutral,
            1 => Self::Friendly,
            166 => Self::Dominion,
            167 => Self::Exile,
            _ => Self::Hostile,
        }
    }

    /// The hostility matrix. Exiles and Dominion fight each other and
    /// anything hostile; hostile fights everyone including itself.
    pub fn hostile_to(self, other: Self) -> bool {
        use FactionAlignment::*;
        matches!(
            (self, other),
            (Exile, Dominion)
                | (Exile, Hostile)
                | (Dominion, Exile)
                | (Dominion, Hostile)
                | (Hostile, Exile)
                | (Hostile, Dominion)
                | (Hostile, Hostile)
        )
    }
}

/// A modifiable attribute. Stat mods apply on top of the base value; the
/// effective value is always `base + Σ(active stat_mod amounts)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Stat {
    Power,
    Armor,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Stats {
    pub power: i32,
    pub armor: i32,
}

impl Stats {
    fn get(&self, stat: Stat) -> i32 {
        match stat {
            Stat::Power => self.power,
            Stat::Armor => self.armor,
        }
    }
}

/// A cast in progress, resolved by a scheduled `CastComplete` message. The
/// serial invalidates the timer if the cast is cancelled or replaced.
#[derive(Copy, Clone, Debug)]
pub struct PendingCast {
    pub spell_id: u32,
    pub target: Guid,
    pub serial: u64,
}

pub struct PlayerState {
    pub account_id: u32,
    pub character_id: u64,
    pub class_id: u32,
    pub conn: ConnectionHandle,
    pub target: Option<Guid>,
    /// Spell resource pool.
    pub resource: u32,
    pub xp: u64,
    pub currency: u64,
    pub pending_cast: Option<PendingCast>,
    pub cast_serial: u64,
    pub last_move_at: Instant,
}

/// Creature AI states. `Dead` is terminal within a life; respawn creates a
/// new entity under a new GUID.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum AiState {
    Idle,
    Combat {
        target: Guid,
        entered_at: Instant,
        /// Last successful damage against a valid target; the combat
        /// timeout measures from here.
        last_progress_at: Instant,
    },
    Evade,
    Dead,
}

impl AiState {
    pub fn name(&self) -> &'static str {
        match self {
            AiState::Idle => "idle",
            AiState::Combat { .. } => "combat",
            AiState::Evade => "evade",
            AiState::Dead => "dead",
        }
    }
}

/// Per-attacker accumulated threat. Keys are opaque GUIDs and may dangle;
/// they are pruned on target selection.
#[derive(Default)]
pub struct ThreatTable {
    entries: FxHashMap<Guid, u64>,
}

impl ThreatTable {
    pub fn add(&mut self, attacker: Guid, amount: u64) {
        *self.entries.entry(attacker).or_default() += amount;
    }

    pub fn remove(&mut self, guid: Guid) {
        self.entries.remove(&guid);
    }

    /// Highest non-zero entry for which `alive` holds, pruning entries
    /// that fail the check.
    pub fn select_target(&mut self, mut alive: impl FnMut(Guid) -> bool) -> Option<Guid> {
        self.entries.retain(|&guid, &mut threat| threat > 0 && alive(guid));
        self.entries
            .iter()
            .max_by_key(|(_, &threat)| threat)
            .map(|(&guid, _)| guid)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = (Guid, u64)> + '_ {
        self.entries.iter().map(|(&g, &t)| (g, t))
    }

    pub fn get(&self, guid: Guid) -> u64 {
        self.entries.get(&guid).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CreatureState {
    pub template: Arc<CreatureTemplate>,
    pub spawn_point: Vec3,
    pub ai: AiState,
    pub threat: ThreatTable,
    pub last_attack_at: Instant,
}

pub enum EntityData {
    Player(PlayerState),
    Creature(CreatureState),
}

/// An object occupying space in exactly one zone instance.
pub struct Entity {
    pub guid: Guid,
    pub name: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub faction_id: u32,
    pub faction: FactionAlignment,
    pub level: u8,
    pub health: u32,
    pub max_health: u32,
    pub base_stats: Stats,
    pub effects: EffectSet,
    pub data: EntityData,
}

impl Entity {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn kind_tag(&self) -> EntityKindTag {
        match self.data {
            EntityData::Player(_) => EntityKindTag::Player,
            EntityData::Creature(_) => EntityKindTag::Creature,
        }
    }

    pub fn as_player(&self) -> Option<&PlayerState> {
        match &self.data {
            EntityData::Player(p) => Some(p),
            EntityData::Creature(_) => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.data {
            EntityData::Player(p) => Some(p),
            EntityData::Creature(_) => None,
        }
    }

    pub fn as_creature(&self) -> Option<&CreatureState> {
        match &self.data {
            EntityData::Creature(c) => Some(c),
            EntityData::Player(_) => None,
        }
    }

    pub fn as_creature_mut(&mut self) -> Option<&mut CreatureState> {
        match &mut self.data {
            EntityData::Creature(c) => Some(c),
            EntityData::Player(_) => None,
        }
    }

    /// Base value plus every live stat-mod, evaluated at `now` so an
    /// expired mod is never observable even before its removal message
    /// lands.
    pub fn effective_stat(&self, stat: Stat, now: Instant) -> i32 {
        self.base_stats.get(stat) + self.effects.stat_bonus(stat, now)
    }

    pub fn display_id(&self) -> u32 {
        match &self.data {
            EntityData::Creature(c) => c.template.display_id,
            EntityData::Player(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faction_matrix_matches_the_table() {
        use FactionAlignment::*;

        let all = [Exile, Dominion, Hostile, Neutral, Friendly];
        for a in all {
            // Neutral and friendly fight nobody and nobody... initiates on
            // them through aggro.
            assert!(!a.hostile_to(Neutral));
            assert!(!a.hostile_to(Friendly));
            assert!(!Neutral.hostile_to(a));
            assert!(!Friendly.hostile_to(a));
        }

        assert!(Exile.hostile_to(Dominion));
        assert!(Dominion.hostile_to(Exile));
        assert!(Hostile.hostile_to(Exile));
        assert!(Hostile.hostile_to(Dominion));
        assert!(Hostile.hostile_to(Hostile));
        assert!(!Exile.hostile_to(Exile));
        assert!(!Dominion.hostile_to(Dominion));
    }

    #[test]
    fn threat_selects_argmax_and_prunes() {
        let a = Guid::from_raw(4);
        let b = Guid::from_raw(8);
        let c = Guid::from_raw(12);

        let mut table = ThreatTable::default();
        table.add(a, 10);
        table.add(b, 30);
        table.add(c, 20);

        assert_eq!(table.select_target(|_| true), Some(b));

        // `b` logs out: pruned, next-highest wins.
        assert_eq!(table.select_target(|g| g != b), Some(c));
        assert_eq!(table.get(b), 0);

        assert_eq!(table.select_target(|_| false), None);
        assert!(table.is_empty());
    }
}
