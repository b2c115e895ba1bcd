//! World entry and entity lifecycle broadcasts.

use glam::Vec3;

use super::{codec, enum_codec, packet};
use crate::Bits;

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ServerWorldEnter {
    pub world_id: u32,
    pub instance_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
}
packet!(ServerWorldEnter, ServerWorldEnter, Clientbound);
codec!(ServerWorldEnter {
    world_id,
    instance_id,
    position,
    rotation,
});

/// Client acknowledgement that the world finished loading; the server spawns
/// the player entity on receipt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientEnteredWorld;
packet!(ClientEnteredWorld, ClientEnteredWorld, Serverbound);
codec!(ClientEnteredWorld {});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EntityKindTag {
    Player = 0,
    Creature = 1,
    Object = 2,
}

impl EntityKindTag {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Player,
            1 => Self::Creature,
            2 => Self::Object,
            _ => return None,
        })
    }
}
enum_codec!(EntityKindTag as 2);

#[derive(Clone, PartialEq, Debug)]
pub struct ServerEntityCreate {
    pub guid: u64,
    pub kind: EntityKindTag,
    pub name: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub faction_id: u32,
    pub level: Bits<7>,
    pub health: u32,
    pub max_health: u32,
    /// Creature display-info id; zero for players.
    pub display_id: u32,
}
packet!(ServerEntityCreate, ServerEntityCreate, Clientbound);
codec!(ServerEntityCreate {
    guid,
    kind,
    name,
    position,
    rotation,
    faction_id,
    level,
    health,
    max_health,
    display_id,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerEntityDestroy {
    pub guid: u64,
}
packet!(ServerEntityDestroy, ServerEntityDestroy, Clientbound);
codec!(ServerEntityDestroy { guid });
