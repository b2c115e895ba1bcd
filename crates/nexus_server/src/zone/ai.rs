//! Creature AI: the idle/combat/evade/dead state machine.
//!
//! Each tick plans one action per creature from a read-only pass, then
//! applies it. The per-tick budget caps latency; unserved creatures resume
//! in round-robin order next tick.

use std::time::Instant;

use glam::Vec3;
use nexus_protocol::packets::{MoveFlags, ServerHealthUpdate, ServerMovement};
use rustc_hash::FxHashSet;
use tracing::debug;

use super::ZoneInstance;
use crate::entity::{AiState, Entity};
use crate::guid::Guid;
use crate::static_data::AiDisposition;

/// One planned step for one creature.
enum Action {
    None,
    /// Enter combat against a freshly noticed player (pulls social).
    Aggro(Guid),
    /// Swing at the current target.
    Attack(Guid),
    /// Close distance to the current target.
    ChaseStep(Vec3),
    /// Switch to the next-highest live threat entry.
    Retarget(Guid),
    /// Give up and head home.
    Evade,
    /// One evade step toward spawn.
    EvadeStep(Vec3),
    /// Reached spawn: restore and go idle.
    EvadeArrive(Vec3),
}

impl ZoneInstance {
    pub(super) fn tick_creatures(&mut self, now: Instant) {
        if self.roster.is_empty() {
            return;
        }

        let budget = self.config.creature_budget.min(self.roster.len());
        for _ in 0..budget {
            if self.roster.is_empty() {
                break;
            }
            if self.ai_cursor >= self.roster.len() {
                self.ai_cursor = 0;
            }
            let guid = self.roster[self.ai_cursor];
            self.ai_cursor += 1;

            let action = self.plan_creature(guid, now);
            self.apply_action(guid, action, now);
        }
    }

    fn plan_creature(&self, guid: Guid, now: Instant) -> Action {
        let Some(entity) = self.entities.get(&guid) else {
            return Action::None;
        };
        let Some(creature) = entity.as_creature() else {
            return Action::None;
        };
        let template = &creature.template;

        match creature.ai {
            AiState::Idle => {
                if template.ai != AiDisposition::Aggressive || template.aggro_range <= 0.0 {
                    return Action::None;
                }

                // Minimum-distance hostile player within aggro range; at
                // most one grid query per idle creature per tick.
                let mut best: Option<(Guid, f32)> = None;
                for candidate in self
                    .grid
                    .entities_in_range(entity.position, template.aggro_range)
                {
                    let Some(other) = self.entities.get(&candidate) else {
                        continue;
                    };
                    if other.as_player().is_none() || !other.is_alive() {
                        continue;
                    }
                    if !entity.faction.hostile_to(other.faction) {
                        continue;
                    }
                    let d2 = entity.position.distance_squared(other.position);
                    if best.map_or(true, |(_, b)| d2 < b) {
                        best = Some((candidate, d2));
                    }
                }

                match best {
                    Some((target, _)) => Action::Aggro(target),
                    None => Action::None,
                }
            }

            AiState::Combat {
                target,
                last_progress_at,
                ..
            } => {
                // Timeout first, then leash, then target validity.
                if now.duration_since(last_progress_at) >= self.config.combat_timeout {
                    return Action::Evade;
                }

                let leash = template.leash_range;
                if leash > 0.0
                    && entity.position.distance_squared(creature.spawn_point) > leash * leash
                {
                    return Action::Evade;
                }

                let target_alive = self
                    .entities
                    .get(&target)
                    .is_some_and(Entity::is_alive);
                if !target_alive {
                    // Re-select from the live remainder of the threat
                    // table; an empty table means evade.
                    let alive: FxHashSet<Guid> = creature
                        .threat
                        .entries()
                        .filter(|&(g, threat)| {
                            threat > 0 && self.entities.get(&g).is_some_and(Entity::is_alive)
                        })
                        .map(|(g, _)| g)
                        .collect();
                    return match alive.is_empty() {
                        true => Action::Evade,
                        false => Action::Retarget(target),
                    };
                }

                // Out of reach: close distance. Leash above bounds the
                // pursuit.
                let target_pos = self
                    .entities
                    .get(&target)
                    .map(|t| t.position)
                    .unwrap_or(entity.position);
                let to_target = target_pos - entity.position;
                let melee = self.config.melee_range;
                if to_target.length_squared() > melee * melee {
                    let step = to_target.length().min(self.config.chase_step);
                    return Action::ChaseStep(entity.position + to_target.normalize() * step);
                }

                let cadence_ms = u64::from(template.attack_speed_ms);
                if cadence_ms > 0
                    && now.duration_since(creature.last_attack_at).as_millis()
                        >= u128::from(cadence_ms)
                {
                    Action::Attack(target)
                } else {
                    Action::None
                }
            }

            AiState::Evade => {
                let to_spawn = creature.spawn_point - entity.position;
                let arrive = self.config.evade_arrive_distance;
                if to_spawn.length_squared() < arrive * arrive {
                    Action::EvadeArrive(creature.spawn_point)
                } else {
                    let step = to_spawn.length().min(self.config.evade_step);
                    Action::EvadeStep(entity.position + to_spawn.normalize() * step)
                }
            }

            AiState::Dead => Action::None,
        }
    }

    fn apply_action(&mut self, guid: Guid, action: Action, now: Instant) {
        match action {
            Action::None => {}

            Action::Aggro(target) => self.enter_combat(guid, target, now, true),

            Action::Attack(target) => {
                let Some(creature) = self
                    .entities
                    .get_mut(&guid)
                    .and_then(Entity::as_creature_mut)
                else {
                    return;
                };
                creature.last_attack_at = now;
                let damage = creature.template.attack_damage;
                self.apply_damage(guid, target, damage, now);
            }

            Action::Retarget(dead_target) => {
                let Some(creature) = self
                    .entities
                    .get_mut(&guid)
                    .and_then(Entity::as_creature_mut)
                else {
                    return;
                };
                creature.threat.remove(dead_target);

                // Prune-and-pick happens in two steps because the liveness
                // check needs the entity table.
                let candidates: Vec<(Guid, u64)> = creature.threat.entries().collect();
                let next = candidates
                    .iter()
                    .filter(|&&(g, threat)| {
                        threat > 0 && self.entities.get(&g).is_some_and(Entity::is_alive)
                    })
                    .max_by_key(|&&(_, threat)| threat)
                    .map(|&(g, _)| g);

                match next {
                    Some(next) => {
                        if let Some(creature) = self
                            .entities
                            .get_mut(&guid)
                            .and_then(Entity::as_creature_mut)
                        {
                            if let AiState::Combat { target, .. } = &mut creature.ai {
                                *target = next;
                            }
                        }
                    }
                    None => self.begin_evade(guid),
                }
            }

            Action::Evade => self.begin_evade(guid),

            Action::ChaseStep(new_pos) | Action::EvadeStep(new_pos) => {
                self.move_creature(guid, new_pos);
            }

            Action::EvadeArrive(spawn) => {
                self.move_creature(guid, spawn);
                let Some(entity) = self.entities.get_mut(&guid) else {
                    return;
                };
                entity.health = entity.max_health;
                let (health, max_health) = (entity.health, entity.max_health);
                if let Some(creature) = entity.as_creature_mut() {
                    creature.ai = AiState::Idle;
                }
                self.broadcast(
                    spawn,
                    self.config.broadcast_radius,
                    None,
                    &ServerHealthUpdate {
                        guid: guid.to_raw(),
                        health,
                        max_health,
                    },
                );
            }
        }
    }

    /// Combat entry. `social` pulls idle same-faction neighbors onto the
    /// same target; social pulls themselves never propagate further.
    pub(super) fn enter_combat(&mut self, guid: Guid, target: Guid, now: Instant, social: bool) {
        {
            let Some(creature) = self
                .entities
                .get_mut(&guid)
                .and_then(Entity::as_creature_mut)
            else {
                return;
            };
            if !matches!(creature.ai, AiState::Idle) {
                return;
            }
            creature.ai = AiState::Combat {
                target,
                entered_at: now,
                last_progress_at: now,
            };
            debug!(%guid, %target, "creature entered combat");
        }

        if social {
            self.social_pull(guid, target, now);
        }
    }

    /// Idle same-faction creatures near `source` join against `target`.
    pub(super) fn social_pull(&mut self, source: Guid, target: Guid, now: Instant) {
        let Some(entity) = self.entities.get(&source) else {
            return;
        };
        let Some(creature) = entity.as_creature() else {
            return;
        };
        let range = creature.template.social_aggro_range;
        if range <= 0.0 {
            return;
        }

        let faction_id = entity.faction_id;
        let helpers: Vec<Guid> = self
            .grid
            .entities_in_range(entity.position, range)
            .into_iter()
            .filter(|&g| g != source)
            .filter(|g| {
                self.entities.get(g).is_some_and(|e| {
                    e.is_alive()
                        && e.faction_id == faction_id
                        && e.as_creature().is_some_and(|c| matches!(c.ai, AiState::Idle))
                })
            })
            .collect();

        for helper in helpers {
            self.enter_combat(helper, target, now, false);
        }
    }

    /// Leash, timeout or an empty threat table all end here. Threat and
    /// active effects are dropped at the transition; health comes back at
    /// spawn.
    pub(super) fn begin_evade(&mut self, guid: Guid) {
        let Some(entity) = self.entities.get_mut(&guid) else {
            return;
        };
        entity.effects.clear();
        if let Some(creature) = entity.as_creature_mut() {
            creature.threat.clear();
            creature.ai = AiState::Evade;
            debug!(%guid, "creature evading");
        }
    }

    fn move_creature(&mut self, guid: Guid, new_pos: Vec3) {
        let Some(entity) = self.entities.get_mut(&guid) else {
            return;
        };
        entity.position = new_pos;
        let rotation = entity.rotation;
        self.grid.update(guid, new_pos);

        let radius = self.movement_radius();
        self.broadcast(
            new_pos,
            radius,
            None,
            &ServerMovement {
                guid: guid.to_raw(),
                position: new_pos,
                rotation,
                velocity: Vec3::ZERO,
                flags: MoveFlags::new(),
                client_time_ms: 0,
            },
        );
    }
}
