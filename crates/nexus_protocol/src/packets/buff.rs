//! Buff application and removal broadcasts.

use super::{codec, enum_codec, packet};
use crate::packets::combat::EffectKindTag;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerBuffApply {
    pub target: u64,
    pub caster: u64,
    /// Unique per holder; re-application under the same id is a refresh.
    pub effect_id: u32,
    pub spell_id: u32,
    pub kind: EffectKindTag,
    pub amount: i32,
    pub duration_ms: u32,
    pub is_debuff: bool,
}
packet!(ServerBuffApply, ServerBuffApply, Clientbound);
codec!(ServerBuffApply {
    target,
    caster,
    effect_id,
    spell_id,
    kind,
    amount,
    duration_ms,
    is_debuff,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum BuffRemoveReason {
    Dispel = 0,
    Expired = 1,
    Cancelled = 2,
}

impl BuffRemoveReason {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Dispel,
            1 => Self::Expired,
            2 => Self::Cancelled,
            _ => return None,
        })
    }
}
enum_codec!(BuffRemoveReason as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerBuffRemove {
    pub target: u64,
    pub effect_id: u32,
    pub reason: BuffRemoveReason,
}
packet!(ServerBuffRemove, ServerBuffRemove, Clientbound);
codec!(ServerBuffRemove {
    target,
    effect_id,
    reason
});
