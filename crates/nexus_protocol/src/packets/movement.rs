//! Movement packets.

use bitfield_struct::bitfield;
use glam::Vec3;

use super::{codec, packet};
use crate::{Decode, Encode, PacketReader, PacketWriter};

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct MoveFlags {
    pub on_ground: bool,
    pub jumping: bool,
    pub falling: bool,
    pub swimming: bool,
    #[bits(4)]
    _padding: u8,
}

impl Encode for MoveFlags {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        w.write_bits(u64::from(self.into_bits()), 8);
        Ok(())
    }
}

impl Decode for MoveFlags {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(Self::from_bits(r.read_bits(8)? as u8))
    }
}

/// A client position report. Subject to the server-side displacement clamp;
/// the GUID is implied by the session, never trusted from the wire.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ClientMovement {
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub flags: MoveFlags,
    pub client_time_ms: u32,
}
packet!(ClientMovement, ClientMovement, Serverbound);
codec!(ClientMovement {
    position,
    rotation,
    velocity,
    flags,
    client_time_ms,
});

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ServerMovement {
    pub guid: u64,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub flags: MoveFlags,
    pub client_time_ms: u32,
}
packet!(ServerMovement, ServerMovement, Clientbound);
codec!(ServerMovement {
    guid,
    position,
    rotation,
    velocity,
    flags,
    client_time_ms,
});
