//! The read-only static data provider.
//!
//! Extraction from the client archive is someone else's job; the core sees
//! the result as immutable tables, loaded once at startup and shared via
//! `Arc` across every zone. Concurrent reads are safe because nothing here
//! is ever written after the builder finishes.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::entity::Stat;

/// How a creature decides to pick fights.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AiDisposition {
    /// Never initiates and never retaliates.
    Passive,
    /// Retaliates when damaged, never initiates.
    Defensive,
    /// Scans for hostile players every tick while idle.
    Aggressive,
}

/// Static blueprint for a creature, shared across all instances.
#[derive(Clone, Debug)]
pub struct CreatureTemplate {
    pub template_id: u32,
    pub name: String,
    pub display_id: u32,
    pub faction_id: u32,
    pub level: u8,
    pub max_health: u32,
    pub aggro_range: f32,
    pub leash_range: f32,
    pub social_aggro_range: f32,
    pub ai: AiDisposition,
    pub attack_speed_ms: u32,
    pub attack_damage: u32,
    pub respawn_delay_ms: u32,
    pub loot_table_id: u32,
    /// Localized-text id of the unit name, for scripted chat.
    pub name_text_id: Option<u32>,
    /// Localized-text id spoken on interaction.
    pub greeting_text_id: Option<u32>,
    /// Dialog-tree unit id opened on interaction.
    pub dialog_id: Option<u32>,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum SpellEffectKind {
    Damage,
    Heal,
    Absorb,
    StatMod(Stat),
    PeriodicDamage,
    PeriodicHeal,
}

#[derive(Copy, Clone, Debug)]
pub struct SpellEffectData {
    pub kind: SpellEffectKind,
    pub amount: i32,
    /// Zero means instantaneous (damage/heal); otherwise lifetime of the
    /// applied effect.
    pub duration_ms: u32,
    /// Pulse cadence for periodic effects.
    pub tick_interval_ms: u32,
    pub is_debuff: bool,
}

#[derive(Clone, Debug)]
pub struct SpellData {
    pub spell_id: u32,
    pub name: String,
    pub cast_time_ms: u32,
    pub range: f32,
    pub cost: u32,
    pub effects: Vec<SpellEffectData>,
}

#[derive(Clone, Debug)]
pub struct LootEntry {
    pub item_id: u32,
    /// Drop chance in the unit interval.
    pub chance: f32,
}

#[derive(Clone, Debug, Default)]
pub struct LootTable {
    pub loot_table_id: u32,
    pub currency: u64,
    pub xp: u64,
    pub items: Vec<LootEntry>,
}

/// Instance-retirement class of a world, per content type.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContentType {
    OpenWorld,
    Expedition,
    Dungeon,
    Adventure,
    Raid,
}

impl ContentType {
    /// How long an instance may sit empty after the last player *leaves*
    /// before it is retired. `None` means persistent (open world, and
    /// raids, which live until the weekly reset).
    pub fn empty_ttl(self) -> Option<std::time::Duration> {
        match self {
            ContentType::OpenWorld | ContentType::Raid => None,
            ContentType::Expedition => Some(std::time::Duration::ZERO),
            ContentType::Dungeon | ContentType::Adventure => {
                Some(std::time::Duration::from_secs(300))
            }
        }
    }

    /// How long an instance is held after its last player *disconnects*,
    /// so a crash does not forfeit the run.
    pub fn disconnect_grace(self) -> Option<std::time::Duration> {
        match self {
            ContentType::OpenWorld => None,
            ContentType::Expedition => Some(std::time::Duration::from_secs(60)),
            ContentType::Dungeon | ContentType::Adventure => {
                Some(std::time::Duration::from_secs(300))
            }
            ContentType::Raid => Some(std::time::Duration::from_secs(600)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreatureSpawn {
    pub template_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Clone, Debug)]
pub struct ZoneData {
    pub world_id: u32,
    pub name: String,
    pub content: ContentType,
    /// Where a character entering this world without a saved position lands.
    pub start_position: Vec3,
    pub spawns: Vec<CreatureSpawn>,
}

#[derive(Default)]
pub struct StaticDataStore {
    creature_templates: FxHashMap<u32, CreatureTemplate>,
    spells: FxHashMap<u32, SpellData>,
    loot_tables: FxHashMap<u32, LootTable>,
    zones: FxHashMap<u32, ZoneData>,
    text: FxHashMap<u32, String>,
}

impl StaticDataStore {
    pub fn builder() -> StaticDataBuilder {
        StaticDataBuilder {
            store: Self::default(),
        }
    }

    pub fn creature_template(&self, id: u32) -> Option<&CreatureTemplate> {
        self.creature_templates.get(&id)
    }

    pub fn spell(&self, id: u32) -> Option<&SpellData> {
        self.spells.get(&id)
    }

    pub fn spell_effects(&self, spell_id: u32) -> &[SpellEffectData] {
        self.spells
            .get(&spell_id)
            .map(|s| s.effects.as_slice())
            .unwrap_or_default()
    }

    pub fn loot_table(&self, id: u32) -> Option<&LootTable> {
        self.loot_tables.get(&id)
    }

    pub fn zone(&self, world_id: u32) -> Option<&ZoneData> {
        self.zones.get(&world_id)
    }

    pub fn text(&self, id: u32) -> Option<&str> {
        self.text.get(&id).map(String::as_str)
    }
}

pub struct StaticDataBuilder {
    store: StaticDataStore,
}

impl StaticDataBuilder {
    pub fn creature_template(mut self, template: CreatureTemplate) -> Self {
        self.store
            .creature_templates
            .insert(template.template_id, template);
        self
    }

    pub fn spell(mut self, spell: SpellData) -> Self {
        self.store.spells.insert(spell.spell_id, spell);
        self
    }

    pub fn loot_table(mut self, table: LootTable) -> Self {
        self.store.loot_tables.insert(table.loot_table_id, table);
        self
    }

    pub fn zone(mut self, zone: ZoneData) -> Self {
        self.store.zones.insert(zone.world_id, zone);
        self
    }

    pub fn text(mut self, id: u32, value: impl Into<String>) -> Self {
        self.store.text.insert(id, value.into());
        self
    }

    pub fn build(self) -> StaticDataStore {
        self.store
    }
}

/// A small hand-rolled data set standing in for the extracted client
/// tables. The development binary and the test suite both run on it.
pub fn builtin() -> StaticDataStore {
    StaticDataStore::builder()
        .zone(ZoneData {
            world_id: 870,
            name: "Algoroc".into(),
            content: ContentType::OpenWorld,
            start_position: Vec3::new(-3200.0, -800.0, -580.0),
            spawns: vec![
                CreatureSpawn {
                    template_id: 1,
                    position: Vec3::new(-3150.0, -800.0, -560.0),
                    rotation: Vec3::ZERO,
                },
                CreatureSpawn {
                    template_id: 3,
                    position: Vec3::new(-3210.0, -800.0, -575.0),
                    rotation: Vec3::ZERO,
                },
            ],
        })
        .zone(ZoneData {
            world_id: 1271,
            name: "Infestation".into(),
            content: ContentType::Expedition,
            start_position: Vec3::ZERO,
            spawns: vec![CreatureSpawn {
                template_id: 2,
                position: Vec3::new(40.0, 0.0, 0.0),
                rotation: Vec3::ZERO,
            }],
        })
        .creature_template(CreatureTemplate {
            template_id: 1,
            name: "Razortail Screecher".into(),
            display_id: 21007,
            faction_id: 600,
            level: 5,
            max_health: 320,
            aggro_range: 15.0,
            leash_range: 40.0,
            social_aggro_range: 10.0,
            ai: AiDisposition::Aggressive,
            attack_speed_ms: 2000,
            attack_damage: 9,
            respawn_delay_ms: 30_000,
            loot_table_id: 10,
            name_text_id: None,
            greeting_text_id: None,
            dialog_id: None,
        })
        .creature_template(CreatureTemplate {
            template_id: 2,
            name: "Steelmaw Stalker".into(),
            display_id: 21440,
            faction_id: 600,
            level: 8,
            max_health: 100,
            aggro_range: 15.0,
            leash_range: 40.0,
            social_aggro_range: 10.0,
            ai: AiDisposition::Aggressive,
            attack_speed_ms: 2000,
            attack_damage: 12,
            respawn_delay_ms: 30_000,
            loot_table_id: 11,
            name_text_id: None,
            greeting_text_id: None,
            dialog_id: None,
        })
        .creature_template(CreatureTemplate {
            template_id: 3,
            name: "Protostar Vendbot".into(),
            display_id: 24118,
            faction_id: 1,
            level: 50,
            max_health: 5000,
            aggro_range: 0.0,
            leash_range: 0.0,
            social_aggro_range: 0.0,
            ai: AiDisposition::Passive,
            attack_speed_ms: 0,
            attack_damage: 0,
            respawn_delay_ms: 5_000,
            loot_table_id: 0,
            name_text_id: Some(700_101),
            greeting_text_id: Some(700_102),
            dialog_id: Some(4200),
        })
        .spell(SpellData {
            spell_id: 55665,
            name: "Pistol Shot".into(),
            cast_time_ms: 0,
            range: 25.0,
            cost: 10,
            effects: vec![SpellEffectData {
                kind: SpellEffectKind::Damage,
                amount: 22,
                duration_ms: 0,
                tick_interval_ms: 0,
                is_debuff: false,
            }],
        })
        .spell(SpellData {
            spell_id: 20005,
            name: "Forcefield".into(),
            cast_time_ms: 0,
            range: 30.0,
            cost: 15,
            effects: vec![SpellEffectData {
                kind: SpellEffectKind::Absorb,
                amount: 100,
                duration_ms: 10_000,
                tick_interval_ms: 0,
                is_debuff: false,
            }],
        })
        .spell(SpellData {
            spell_id: 30001,
            name: "Mending Probes".into(),
            cast_time_ms: 1500,
            range: 30.0,
            cost: 20,
            effects: vec![SpellEffectData {
                kind: SpellEffectKind::Heal,
                amount: 45,
                duration_ms: 0,
                tick_interval_ms: 0,
                is_debuff: false,
            }],
        })
        .spell(SpellData {
            spell_id: 40001,
            name: "Empowering Probes".into(),
            cast_time_ms: 0,
            range: 30.0,
            cost: 10,
            effects: vec![SpellEffectData {
                kind: SpellEffectKind::StatMod(Stat::Power),
                amount: 50,
                duration_ms: 10_000,
                tick_interval_ms: 0,
                is_debuff: false,
            }],
        })
        .spell(SpellData {
            spell_id: 50001,
            name: "Ignite".into(),
            cast_time_ms: 0,
            range: 25.0,
            cost: 12,
            effects: vec![SpellEffectData {
                kind: SpellEffectKind::PeriodicDamage,
                amount: 6,
                duration_ms: 8_000,
                tick_interval_ms: 1_000,
                is_debuff: true,
            }],
        })
        .loot_table(LootTable {
            loot_table_id: 10,
            currency: 12,
            xp: 80,
            items: vec![LootEntry {
                item_id: 90_001,
                chance: 0.35,
            }],
        })
        .loot_table(LootTable {
            loot_table_id: 11,
            currency: 25,
            xp: 140,
            items: vec![LootEntry {
                item_id: 90_002,
                chance: 0.2,
            }],
        })
        .text(700_101, "Protostar Vendbot")
        .text(700_102, "Greetings, valued customer!")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_data_is_coherent() {
        let data = builtin();

        for zone in [870, 1271] {
            let zone = data.zone(zone).unwrap();
            for spawn in &zone.spawns {
                let template = data.creature_template(spawn.template_id);
                assert!(template.is_some(), "dangling template in {}", zone.name);
            }
        }

        // Every referenced loot table and text id resolves.
        let vendor = data.creature_template(3).unwrap();
        assert!(data.text(vendor.name_text_id.unwrap()).is_some());
        assert!(data.text(vendor.greeting_text_id.unwrap()).is_some());
        assert!(data.loot_table(10).is_some());

        assert_eq!(data.spell_effects(55665).len(), 1);
        assert!(data.spell_effects(1).is_empty());
    }
}
