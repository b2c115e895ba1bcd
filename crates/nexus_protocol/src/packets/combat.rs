//! Targeting, spell casts and health updates.

use super::{codec, enum_codec, packet};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientSetTarget {
    /// Zero clears the target.
    pub guid: u64,
}
packet!(ClientSetTarget, ClientSetTarget, Serverbound);
codec!(ClientSetTarget { guid });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientCastSpell {
    pub spell_id: u32,
    /// Zero targets the caster's current target.
    pub target: u64,
}
packet!(ClientCastSpell, ClientCastSpell, Serverbound);
codec!(ClientCastSpell { spell_id, target });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientCancelCast;
packet!(ClientCancelCast, ClientCancelCast, Serverbound);
codec!(ClientCancelCast {});

/// Wire tag shared by spell hits and buff applications.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EffectKindTag {
    Damage = 0,
    Heal = 1,
    Absorb = 2,
    StatMod = 3,
    Periodic = 4,
}

impl EffectKindTag {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Damage,
            1 => Self::Heal,
            2 => Self::Absorb,
            3 => Self::StatMod,
            4 => Self::Periodic,
            _ => return None,
        })
    }
}
enum_codec!(EffectKindTag as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SpellHit {
    pub target: u64,
    pub kind: EffectKindTag,
    /// Damage or heal actually applied, after absorption.
    pub amount: u32,
}
codec!(SpellHit {
    target,
    kind,
    amount
});

/// A resolved cast, broadcast to interest.
#[derive(Clone, PartialEq, Debug)]
pub struct ServerSpellGo {
    pub caster: u64,
    pub primary_target: u64,
    pub spell_id: u32,
    pub hits: Vec<SpellHit>,
}
packet!(ServerSpellGo, ServerSpellGo, Clientbound);
codec!(ServerSpellGo {
    caster,
    primary_target,
    spell_id,
    hits,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CastFailReason {
    CasterDead = 0,
    BadTarget = 1,
    OutOfRange = 2,
    NotEnoughResource = 3,
    AlreadyCasting = 4,
    UnknownSpell = 5,
}

impl CastFailReason {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::CasterDead,
            1 => Self::BadTarget,
            2 => Self::OutOfRange,
            3 => Self::NotEnoughResource,
            4 => Self::AlreadyCasting,
            5 => Self::UnknownSpell,
            _ => return None,
        })
    }
}
enum_codec!(CastFailReason as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerSpellFail {
    pub spell_id: u32,
    pub reason: CastFailReason,
}
packet!(ServerSpellFail, ServerSpellFail, Clientbound);
codec!(ServerSpellFail { spell_id, reason });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerHealthUpdate {
    pub guid: u64,
    pub health: u32,
    pub max_health: u32,
}
packet!(ServerHealthUpdate, ServerHealthUpdate, Clientbound);
codec!(ServerHealthUpdate {
    guid,
    health,
    max_health
});
