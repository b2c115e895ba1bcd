//! Active buffs and debuffs on one entity.
//!
//! Effects are indexed by a per-holder `effect_id` and kept in insertion
//! order, which is the consumption order for absorb shields. Re-applying
//! an effect from the same spell refreshes it in place: same `effect_id`,
//! new amount and expiry, new serial so the stale expiry timer becomes a
//! no-op instead of a leak.

use std::time::{Duration, Instant};

use crate::entity::Stat;
use crate::guid::Guid;
use crate::static_data::{SpellEffectData, SpellEffectKind};

#[derive(Clone, Debug)]
pub struct ActiveEffect {
    pub effect_id: u32,
    pub spell_id: u32,
    pub caster: Guid,
    pub kind: SpellEffectKind,
    /// Remaining absorption for absorb effects; the modifier for the rest.
    pub amount: i32,
    pub is_debuff: bool,
    pub applied_at: Instant,
    pub expires_at: Instant,
    pub tick_interval_ms: u32,
    pub last_pulse_at: Instant,
    /// Bumped on refresh; expiry timers carry the serial they were armed
    /// with and are ignored on mismatch.
    pub serial: u64,
}

impl ActiveEffect {
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A damage pulse routed through the holder's shields.
#[derive(Debug, PartialEq, Eq)]
pub struct AbsorbOutcome {
    pub absorbed: u32,
    pub remaining: u32,
    /// Effects consumed to zero, removed immediately.
    pub depleted: Vec<u32>,
}

#[derive(Default)]
pub struct EffectSet {
    effects: Vec<ActiveEffect>,
    next_effect_id: u32,
    next_serial: u64,
}

impl EffectSet {
    /// Applies (or refreshes) an effect. Refresh is keyed on
    /// `(spell_id, kind)`: the same spell landing again replaces amount and
    /// duration under the original effect id.
    pub fn apply(
        &mut self,
        spell_id: u32,
        caster: Guid,
        data: &SpellEffectData,
        now: Instant,
    ) -> &ActiveEffect {
        self.next_serial += 1;
        let serial = self.next_serial;
        let expires_at = now + Duration::from_millis(u64::from(data.duration_ms));

        if let Some(i) = self
            .effects
            .iter()
            .position(|e| e.spell_id == spell_id && e.kind == data.kind)
        {
            let effect = &mut self.effects[i];
            effect.caster = caster;
            effect.amount = data.amount;
            effect.applied_at = now;
            effect.expires_at = expires_at;
            effect.last_pulse_at = now;
            effect.serial = serial;
            return &self.effects[i];
        }

        self.next_effect_id += 1;
        self.effects.push(ActiveEffect {
            effect_id: self.next_effect_id,
            spell_id,
            caster,
            kind: data.kind,
            amount: data.amount,
            is_debuff: data.is_debuff,
            applied_at: now,
            expires_at,
            tick_interval_ms: data.tick_interval_ms,
            last_pulse_at: now,
            serial,
        });
        self.effects.last().expect("just pushed")
    }

    pub fn get(&self, effect_id: u32) -> Option<&ActiveEffect> {
        self.effects.iter().find(|e| e.effect_id == effect_id)
    }

    pub fn remove(&mut self, effect_id: u32) -> Option<ActiveEffect> {
        let i = self.effects.iter().position(|e| e.effect_id == effect_id)?;
        Some(self.effects.remove(i))
    }

    /// Timer-driven removal: only fires if the effect still carries the
    /// serial the timer was armed with.
    pub fn remove_if_serial(&mut self, effect_id: u32, serial: u64) -> Option<ActiveEffect> {
        let i = self
            .effects
            .iter()
            .position(|e| e.effect_id == effect_id && e.serial == serial)?;
        Some(self.effects.remove(i))
    }

    /// Routes `amount` damage through live absorb shields, oldest first.
    pub fn absorb_damage(&mut self, amount: u32, now: Instant) -> AbsorbOutcome {
        let mut remaining = amount;
        let mut absorbed = 0u32;
        let mut depleted = Vec::new();

        for effect in &mut self.effects {
            if remaining == 0 {
                break;
            }
            if effect.kind != SpellEffectKind::Absorb || effect.expired(now) {
                continue;
            }

            let available = effect.amount.max(0) as u32;
            let soaked = available.min(remaining);
            effect.amount -= soaked as i32;
            absorbed += soaked;
            remaining -= soaked;

            if effect.amount <= 0 {
                depleted.push(effect.effect_id);
            }
        }

        self.effects
            .retain(|e| !depleted.contains(&e.effect_id));

        AbsorbOutcome {
            absorbed,
            remaining,
            depleted,
        }
    }

    /// Sum of live stat-mod amounts for `stat` at `now`.
    pub fn stat_bonus(&self, stat: Stat, now: Instant) -> i32 {
        self.effects
            .iter()
            .filter(|e| !e.expired(now))
            .filter(|e| e.kind == SpellEffectKind::StatMod(stat))
            .map(|e| e.amount)
            .sum()
    }

    /// Periodic effects due for a pulse; advances their pulse clocks.
    pub fn periodic_due(&mut self, now: Instant) -> Vec<ActiveEffect> {
        let mut due = Vec::new();
        for effect in &mut self.effects {
            if effect.expired(now) || effect.tick_interval_ms == 0 {
                continue;
            }
            let matters = matches!(
                effect.kind,
                SpellEffectKind::PeriodicDamage | SpellEffectKind::PeriodicHeal
            );
            if !matters {
                continue;
            }
            let interval = Duration::from_millis(u64::from(effect.tick_interval_ms));
            if now.duration_since(effect.last_pulse_at) >= interval {
                effect.last_pulse_at = now;
                due.push(effect.clone());
            }
        }
        due
    }

    /// Drops everything, without bookkeeping. Death clears effects with a
    /// single despawn broadcast instead of per-effect removals.
    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveEffect> {
        self.effects.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}
