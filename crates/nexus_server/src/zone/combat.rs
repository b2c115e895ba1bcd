//! The spell/effect pipeline and the damage path.
//!
//! Handlers run on the zone actor, so every function here may mutate at
//! most one entity at a time and re-looks entities up between steps;
//! GUIDs dangling across a step (the attacker despawned mid-resolution)
//! degrade to dropped events, never to stale pointers.

use std::time::{Duration, Instant};

use glam::Vec3;
use nexus_protocol::packets::{
    BuffRemoveReason, CastFailReason, EffectKindTag, ServerBuffApply, ServerBuffRemove,
    ServerEntityDestroy, ServerHealthUpdate, ServerSpellFail, ServerSpellGo, SpellHit,
};
use tracing::{debug, warn};

use super::{entity_create_packet, ZoneInstance, ZoneMessage};
use crate::entity::{AiState, EntityData, PendingCast, Stat, Stats};
use crate::entity::{CreatureState, FactionAlignment, ThreatTable};
use crate::guid::{Guid, GuidKind};
use crate::static_data::{SpellData, SpellEffectData, SpellEffectKind};

/// What a single damage application did.
#[derive(Debug, Clone, Copy)]
pub(super) struct AppliedDamage {
    pub absorbed: u32,
    pub health_damage: u32,
    pub killed: bool,
}

impl ZoneInstance {
    // ---- casting ---------------------------------------------------------

    pub(super) fn handle_cast(&mut self, caster: Guid, spell_id: u32, target_raw: Guid) {
        let now = Instant::now();
        let data = self.data.clone();

        let Some(spell) = data.spell(spell_id) else {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::UnknownSpell));
            return;
        };

        // Validation pass, read-only.
        let Some(caster_ent) = self.entities.get(&caster) else {
            debug!(%caster, "cast by unknown caster dropped");
            return;
        };
        if !caster_ent.is_alive() {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::CasterDead));
            return;
        }
        let Some(player) = caster_ent.as_player() else {
            return;
        };
        if player.pending_cast.is_some() {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::AlreadyCasting));
            return;
        }
        if player.resource < spell.cost {
            self.send_to(
                caster,
                &spell_fail(spell_id, CastFailReason::NotEnoughResource),
            );
            return;
        }

        // Explicit target, else current target, else self.
        let target = if target_raw.to_raw() != 0 {
            target_raw
        } else {
            player.target.unwrap_or(caster)
        };

        let Some(target_ent) = self.entities.get(&target) else {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::BadTarget));
            return;
        };
        if !target_ent.is_alive() {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::BadTarget));
            return;
        }

        let reach = spell.range + self.config.range_tolerance;
        if caster_ent.position.distance_squared(target_ent.position) > reach * reach {
            self.send_to(caster, &spell_fail(spell_id, CastFailReason::OutOfRange));
            return;
        }

        let cast_time = spell.cast_time_ms;
        let cost = spell.cost;
        let spell = spell.clone();

        // Commit: consume the cost, then resolve or start the cast bar.
        let player = self
            .entities
            .get_mut(&caster)
            .and_then(|e| e.as_player_mut())
            .expect("validated above");
        player.resource -= cost;

        if cast_time == 0 {
            self.resolve_spell(caster, target, &spell, now);
        } else {
            player.cast_serial += 1;
            let serial = player.cast_serial;
            player.pending_cast = Some(PendingCast {
                spell_id,
                target,
                serial,
            });
            self.schedule(
                Duration::from_millis(u64::from(cast_time)),
                ZoneMessage::CastComplete { caster, serial },
            );
        }
    }

    pub(super) fn handle_cast_complete(&mut self, caster: Guid, serial: u64) {
        let now = Instant::now();

        // Liveness: the caster may have despawned, died or cancelled since
        // the timer was armed.
        let Some(pending) = self
            .entities
            .get_mut(&caster)
            .and_then(|e| e.as_player_mut())
            .and_then(|p| match p.pending_cast {
                Some(pending) if pending.serial == serial => p.pending_cast.take(),
                _ => None,
            })
        else {
            return;
        };

        if !self.entities.get(&caster).is_some_and(|e| e.is_alive()) {
            return;
        }

        let data = self.data.clone();
        let Some(spell) = data.spell(pending.spell_id) else {
            return;
        };

        if !self
            .entities
            .get(&pending.target)
            .is_some_and(|t| t.is_alive())
        {
            self.send_to(
                caster,
                &spell_fail(pending.spell_id, CastFailReason::BadTarget),
            );
            return;
        }

        self.resolve_spell(caster, pending.target, spell, now);
    }

    pub(super) fn handle_cancel_cast(&mut self, caster: Guid) {
        if let Some(player) = self
            .entities
            .get_mut(&caster)
            .and_then(|e| e.as_player_mut())
        {
            // Bumping the serial orphans the completion timer.
            if player.pending_cast.take().is_some() {
                player.cast_serial += 1;
            }
        }
    }

    /// The `apply_spell_effect` surface: every effect of the spell, no
    /// cast-pipeline validation. Content systems use this for scripted
    /// auras.
    pub(super) fn apply_spell_effects(&mut self, caster: Guid, target: Guid, spell_id: u32) {
        let now = Instant::now();
        let data = self.data.clone();
        let Some(spell) = data.spell(spell_id) else {
            warn!(spell_id, "unknown spell in apply_spell_effect");
            return;
        };
        self.resolve_spell(caster, target, spell, now);
    }

    fn resolve_spell(&mut self, caster: Guid, target: Guid, spell: &SpellData, now: Instant) {
        let Some(caster_pos) = self.entities.get(&caster).map(|e| e.position) else {
            return;
        };

        let power = self
            .entities
            .get(&caster)
            .map(|e| e.effective_stat(Stat::Power, now))
            .unwrap_or(0);

        let mut hits = Vec::new();
        for effect in &spell.effects {
            match effect.kind {
                SpellEffectKind::Damage => {
                    let amount = (effect.amount + power).max(0) as u32;
                    if let Some(applied) = self.apply_damage(caster, target, amount, now) {
                        hits.push(SpellHit {
                            target: target.to_raw(),
                            kind: EffectKindTag::Damage,
                            amount: applied.absorbed + applied.health_damage,
                        });
                    }
                }
                SpellEffectKind::Heal => {
                    let amount = (effect.amount + power).max(0) as u32;
                    let healed = self.apply_heal(target, amount);
                    hits.push(SpellHit {
                        target: target.to_raw(),
                        kind: EffectKindTag::Heal,
                        amount: healed,
                    });
                }
                SpellEffectKind::Absorb
                | SpellEffectKind::StatMod(_)
                | SpellEffectKind::PeriodicDamage
                | SpellEffectKind::PeriodicHeal => {
                    if self.apply_effect(caster, target, spell.spell_id, effect, now) {
                        hits.push(SpellHit {
                            target: target.to_raw(),
                            kind: effect_kind_tag(effect.kind),
                            amount: effect.amount.max(0) as u32,
                        });
                    }
                }
            }
        }

        self.broadcast(
            caster_pos,
            self.config.broadcast_radius,
            None,
            &ServerSpellGo {
                caster: caster.to_raw(),
                primary_target: target.to_raw(),
                spell_id: spell.spell_id,
                hits,
            },
        );
    }

    // ---- damage and healing ---------------------------------------------

    pub(super) fn apply_damage(
        &mut self,
        attacker: Guid,
        target: Guid,
        amount: u32,
        now: Instant,
    ) -> Option<AppliedDamage> {
        let Some(entity) = self.entities.get_mut(&target) else {
            debug!(%attacker, %target, "damage against unknown target dropped");
            return None;
        };
        if !entity.is_alive() {
            return None;
        }

        let absorb = entity.effects.absorb_damage(amount, now);
        let health_damage = absorb.remaining.min(entity.health);
        entity.health -= health_damage;

        let killed = entity.health == 0;
        let position = entity.position;
        let health = entity.health;
        let max_health = entity.max_health;

        // Threat and retaliation. Passive creatures never retaliate.
        let mut pull_social = false;
        if let Some(creature) = entity.as_creature_mut() {
            creature.threat.add(attacker, u64::from(amount));
            if creature.ai == AiState::Idle
                && creature.template.ai != crate::static_data::AiDisposition::Passive
            {
                creature.ai = AiState::Combat {
                    target: attacker,
                    entered_at: now,
                    last_progress_at: now,
                };
                pull_social = true;
            }
        }

        // An absorb consumed to zero is removed immediately, with a single
        // removal broadcast.
        for effect_id in &absorb.depleted {
            self.broadcast(
                position,
                self.config.broadcast_radius,
                None,
                &ServerBuffRemove {
                    target: target.to_raw(),
                    effect_id: *effect_id,
                    reason: BuffRemoveReason::Cancelled,
                },
            );
        }

        self.broadcast(
            position,
            self.config.broadcast_radius,
            None,
            &ServerHealthUpdate {
                guid: target.to_raw(),
                health,
                max_health,
            },
        );

        // Attack progress keeps the attacker's combat alive.
        if health_damage > 0 || absorb.absorbed > 0 {
            if let Some(AiState::Combat {
                last_progress_at, ..
            }) = self
                .entities
                .get_mut(&attacker)
                .and_then(|e| e.as_creature_mut())
                .map(|c| &mut c.ai)
            {
                *last_progress_at = now;
            }
        }

        if pull_social {
            self.social_pull(target, attacker, now);
        }

        if killed {
            self.handle_death(target, attacker);
        }

        Some(AppliedDamage {
            absorbed: absorb.absorbed,
            health_damage,
            killed,
        })
    }

    pub(super) fn apply_heal(&mut self, target: Guid, amount: u32) -> u32 {
        let Some(entity) = self.entities.get_mut(&target) else {
            return 0;
        };
        if !entity.is_alive() {
            return 0;
        }

        let healed = amount.min(entity.max_health - entity.health);
        entity.health += healed;
        let packet = ServerHealthUpdate {
            guid: target.to_raw(),
            health: entity.health,
            max_health: entity.max_health,
        };
        let position = entity.position;
        self.broadcast(position, self.config.broadcast_radius, None, &packet);
        healed
    }

    /// Applies one non-instant effect and arms its expiry timer. Returns
    /// `false` if the target is gone.
    fn apply_effect(
        &mut self,
        caster: Guid,
        target: Guid,
        spell_id: u32,
        data: &SpellEffectData,
        now: Instant,
    ) -> bool {
        let Some(entity) = self.entities.get_mut(&target) else {
            debug!(%target, "buff application to unknown target dropped");
            return false;
        };
        if !entity.is_alive() {
            return false;
        }

        let position = entity.position;
        let applied = entity.effects.apply(spell_id, caster, data, now);
        let (effect_id, serial) = (applied.effect_id, applied.serial);

        self.broadcast(
            position,
            self.config.broadcast_radius,
            None,
            &ServerBuffApply {
                target: target.to_raw(),
                caster: caster.to_raw(),
                effect_id,
                spell_id,
                kind: effect_kind_tag(data.kind),
                amount: data.amount,
                duration_ms: data.duration_ms,
                is_debuff: data.is_debuff,
            },
        );

        // Refresh bumped the serial, so a previously armed timer for this
        // effect id is now inert: no timer leak, no early removal.
        self.schedule(
            Duration::from_millis(u64::from(data.duration_ms)),
            ZoneMessage::EffectExpired {
                holder: target,
                effect_id,
                serial,
            },
        );
        true
    }

    pub(super) fn handle_effect_expired(&mut self, holder: Guid, effect_id: u32, serial: u64) {
        let Some(entity) = self.entities.get_mut(&holder) else {
            // Holder despawned; death already cleared its effects.
            return;
        };

        if entity.effects.remove_if_serial(effect_id, serial).is_some() {
            let position = entity.position;
            self.broadcast(
                position,
                self.config.broadcast_radius,
                None,
                &ServerBuffRemove {
                    target: holder.to_raw(),
                    effect_id,
                    reason: BuffRemoveReason::Expired,
                },
            );
        }
    }

    /// Periodic pulses, at tick resolution.
    pub(super) fn tick_effects(&mut self, now: Instant) {
        let holders: Vec<Guid> = self
            .entities
            .iter()
            .filter(|(_, e)| !e.effects.is_empty())
            .map(|(&g, _)| g)
            .collect();

        for holder in holders {
            let Some(entity) = self.entities.get_mut(&holder) else {
                continue;
            };
            for pulse in entity.effects.periodic_due(now) {
                let amount = pulse.amount.max(0) as u32;
                match pulse.kind {
                    SpellEffectKind::PeriodicDamage => {
                        self.apply_damage(pulse.caster, holder, amount, now);
                    }
                    SpellEffectKind::PeriodicHeal => {
                        self.apply_heal(holder, amount);
                    }
                    _ => {}
                }
            }
        }
    }

    // ---- death and respawn ----------------------------------------------

    fn handle_death(&mut self, victim: Guid, killer: Guid) {
        let Some(entity) = self.entities.get_mut(&victim) else {
            return;
        };

        // Death clears every active effect without per-effect removal
        // packets; the despawn broadcast is enough.
        entity.effects.clear();
        let is_player = matches!(entity.data, EntityData::Player(_));

        if is_player {
            self.player_death(victim);
        } else {
            self.creature_death(victim, killer);
        }
    }

    /// Players respawn in place at the zone start point, at full health.
    /// (The retail death-and-holo-crypt flow is content, not core.)
    fn player_death(&mut self, victim: Guid) {
        let data = self.data.clone();
        let start = data
            .zone(self.world_id)
            .map(|z| z.start_position)
            .unwrap_or(Vec3::ZERO);

        let Some(entity) = self.entities.get_mut(&victim) else {
            return;
        };
        let death_pos = entity.position;

        self.broadcast(
            death_pos,
            self.config.broadcast_radius,
            None,
            &ServerEntityDestroy {
                guid: victim.to_raw(),
            },
        );

        let entity = self.entities.get_mut(&victim).expect("checked above");
        entity.health = entity.max_health;
        entity.position = start;
        self.grid.update(victim, start);

        let packet = entity_create_packet(self.entities.get(&victim).expect("checked above"));
        self.broadcast(start, self.config.broadcast_radius, None, &packet);

        // Nobody keeps hunting a corpse: drop the victim from every threat
        // table and send now-empty creatures home.
        self.forget_attacker(victim);
    }

    fn creature_death(&mut self, victim: Guid, killer: Guid) {
        let Some(entity) = self.entities.remove(&victim) else {
            return;
        };
        self.grid.remove(victim);
        self.roster.retain(|&g| g != victim);

        let EntityData::Creature(creature) = &entity.data else {
            return;
        };
        let template = &creature.template;

        self.broadcast(
            entity.position,
            self.config.broadcast_radius,
            None,
            &ServerEntityDestroy {
                guid: victim.to_raw(),
            },
        );

        self.award_kill(killer, template.loot_table_id);

        self.schedule(
            Duration::from_millis(u64::from(template.respawn_delay_ms)),
            ZoneMessage::RespawnCreature {
                template_id: template.template_id,
                position: creature.spawn_point,
                rotation: entity.rotation,
            },
        );

        debug!(%victim, %killer, template = template.template_id, "creature died");
    }

    /// Kill credit: loot roll plus XP/currency, persisted fire-and-forget.
    fn award_kill(&mut self, killer: Guid, loot_table_id: u32) {
        let data = self.data.clone();
        let Some(table) = data.loot_table(loot_table_id) else {
            return;
        };

        let Some(entity) = self.entities.get_mut(&killer) else {
            return;
        };
        let Some(player) = entity.as_player_mut() else {
            return;
        };

        player.xp += table.xp;
        player.currency += table.currency;

        for item in &table.items {
            if rand::random::<f32>() < item.chance {
                // Inventory is the character store's domain; the core only
                // decides the roll.
                debug!(%killer, item = item.item_id, "loot item rolled");
            }
        }

        let Some(entity) = self.entities.get(&killer) else {
            return;
        };
        if let Some(player) = entity.as_player() {
            self.save_player(entity, player);
        }
    }

    /// Removes `attacker` from every threat table; creatures left with an
    /// empty table evade home.
    fn forget_attacker(&mut self, attacker: Guid) {
        let roster = self.roster.clone();
        for guid in roster {
            let Some(creature) = self
                .entities
                .get_mut(&guid)
                .and_then(|e| e.as_creature_mut())
            else {
                continue;
            };
            creature.threat.remove(attacker);
            if let AiState::Combat { target, .. } = creature.ai {
                if target == attacker && creature.threat.is_empty() {
                    self.begin_evade(guid);
                }
            }
        }
    }

    // ---- creature spawn --------------------------------------------------

    pub(super) fn spawn_creature(
        &mut self,
        template_id: u32,
        position: Vec3,
        rotation: Vec3,
        announce: bool,
    ) {
        let data = self.data.clone();
        let Some(template) = data.creature_template(template_id) else {
            warn!(template_id, "creature spawn with unknown template");
            return;
        };

        let guid = self.directory.allocate_guid(GuidKind::Creature);
        let now = Instant::now();

        let entity = crate::entity::Entity {
            guid,
            name: template.name.clone(),
            position,
            rotation,
            faction_id: template.faction_id,
            faction: FactionAlignment::from_id(template.faction_id),
            level: template.level,
            health: template.max_health,
            max_health: template.max_health,
            base_stats: Stats::default(),
            effects: Default::default(),
            data: EntityData::Creature(CreatureState {
                template: std::sync::Arc::new(template.clone()),
                spawn_point: position,
                ai: AiState::Idle,
                threat: ThreatTable::default(),
                last_attack_at: now,
            }),
        };

        self.grid.insert(guid, position);
        self.roster.push(guid);

        if announce {
            let packet = entity_create_packet(&entity);
            self.broadcast(position, self.config.broadcast_radius, Some(guid), &packet);
        }
        self.entities.insert(guid, entity);
    }
}

fn spell_fail(spell_id: u32, reason: CastFailReason) -> ServerSpellFail {
    ServerSpellFail { spell_id, reason }
}

fn effect_kind_tag(kind: SpellEffectKind) -> EffectKindTag {
    match kind {
        SpellEffectKind::Damage => EffectKindTag::Damage,
        SpellEffectKind::Heal => EffectKindTag::Heal,
        SpellEffectKind::Absorb => EffectKindTag::Absorb,
        SpellEffectKind::StatMod(_) => EffectKindTag::StatMod,
        SpellEffectKind::PeriodicDamage | SpellEffectKind::PeriodicHeal => EffectKindTag::Periodic,
    }
}
