//! All of the game's network packets.
//!
//! Packets are grouped in submodules by family. Field order and bit widths
//! follow the build 16042 client; a packet definition here is meant to read
//! like the packet dump it was verified against.

/// Implements [`Packet`](crate::Packet) for a packet struct.
macro_rules! packet {
    ($ty:ident, $opcode:ident, $side:ident) => {
        impl $crate::Packet for $ty {
            const OPCODE: $crate::Opcode = $crate::Opcode::$opcode;
            const NAME: &'static str = stringify!($ty);
            const SIDE: $crate::PacketSide = $crate::PacketSide::$side;
        }
    };
}

/// Implements [`Encode`](crate::Encode) and [`Decode`](crate::Decode) for a
/// struct by encoding its fields in declaration order.
macro_rules! codec {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::Encode for $ty {
            fn encode(&self, w: &mut $crate::PacketWriter) -> anyhow::Result<()> {
                $( $crate::Encode::encode(&self.$field, w)?; )+
                Ok(())
            }
        }

        impl $crate::Decode for $ty {
            fn decode(r: &mut $crate::PacketReader<'_>) -> anyhow::Result<Self> {
                Ok(Self {
                    $( $field: $crate::Decode::decode(r)?, )+
                })
            }
        }
    };
    ($ty:ident {}) => {
        impl $crate::Encode for $ty {
            fn encode(&self, _w: &mut $crate::PacketWriter) -> anyhow::Result<()> {
                Ok(())
            }
        }

        impl $crate::Decode for $ty {
            fn decode(_r: &mut $crate::PacketReader<'_>) -> anyhow::Result<Self> {
                Ok(Self)
            }
        }
    };
}

/// Implements the codec for a fieldless enum carried as a fixed-width
/// unsigned tag.
macro_rules! enum_codec {
    ($ty:ident as $width:literal) => {
        impl $crate::Encode for $ty {
            fn encode(&self, w: &mut $crate::PacketWriter) -> anyhow::Result<()> {
                w.write_bits(*self as u64, $width);
                Ok(())
            }
        }

        impl $crate::Decode for $ty {
            fn decode(r: &mut $crate::PacketReader<'_>) -> anyhow::Result<Self> {
                let raw = r.read_bits($width)?;
                $ty::from_raw(raw)
                    .ok_or_else(|| anyhow::anyhow!("invalid {} tag {raw}", stringify!($ty)))
            }
        }
    };
}

pub(crate) use {codec, enum_codec, packet};

pub mod auth;
pub mod buff;
pub mod character;
pub mod chat;
pub mod combat;
pub mod movement;
pub mod npc;
pub mod world;

pub use auth::*;
pub use buff::*;
pub use character::*;
pub use chat::*;
pub use combat::*;
pub use movement::*;
pub use npc::*;
pub use world::*;

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{Bits, Decode, Encode, Packet, PacketReader, PacketWriter};

    fn round_trip<P>(pkt: P)
    where
        P: Packet + Encode + Decode + PartialEq,
    {
        let mut w = PacketWriter::new();
        pkt.encode(&mut w).unwrap();
        let buf = w.finish();
        let mut r = PacketReader::new(&buf);
        let back = P::decode(&mut r).unwrap();
        r.expect_end().unwrap();
        assert!(back == pkt, "{} did not round-trip", P::NAME);
    }

    #[test]
    fn representative_packets_round_trip() {
        round_trip(ClientHelloAuth {
            build: 16042,
            email: "a@b.c".into(),
        });
        round_trip(ServerAuthChallenge {
            salt: [7; 16],
            server_public: [0xab; 128],
        });
        round_trip(ClientAuthProof {
            client_public: [0xcd; 128],
            evidence: [3; 32],
        });
        round_trip(ServerAuthProof {
            evidence: [4; 32],
            account_id: 42,
        });
        round_trip(ServerAuthFail {
            reason: AuthFailReason::SessionExpired,
        });
        round_trip(ClientHelloWorld {
            account_id: 42,
            token: [9; 16],
        });
        round_trip(ServerWelcome { account_id: 42 });

        round_trip(ClientCharacterList);
        round_trip(ServerCharacterList {
            characters: vec![CharacterSummary {
                character_id: 7,
                name: "Cybexa".into(),
                level: Bits(23),
                class_id: 4,
                faction_id: 167,
                world_id: 870,
            }],
        });
        round_trip(ClientCharacterCreate {
            name: "Cybexa".into(),
            class_id: 4,
            faction_id: 167,
        });
        round_trip(ServerCharacterCreateResult {
            result: CharacterCreateResult::NameTaken,
            character_id: 0,
        });
        round_trip(ClientCharacterDelete { character_id: 7 });
        round_trip(ServerCharacterDeleteResult {
            character_id: 7,
            ok: true,
        });
        round_trip(ClientCharacterSelect { character_id: 7 });

        round_trip(ServerWorldEnter {
            world_id: 870,
            instance_id: 1,
            position: Vec3::new(-3200.0, -800.0, -580.0),
            rotation: Vec3::ZERO,
        });
        round_trip(ClientEnteredWorld);
        round_trip(ServerEntityCreate {
            guid: 0x10_0001,
            kind: EntityKindTag::Player,
            name: "Cybexa".into(),
            position: Vec3::new(-3200.0, -800.0, -580.0),
            rotation: Vec3::ZERO,
            faction_id: 167,
            level: Bits(23),
            health: 1000,
            max_health: 1000,
            display_id: 0,
        });
        round_trip(ServerEntityDestroy { guid: 0x10_0001 });

        round_trip(ClientMovement {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, 1.5, 0.0),
            velocity: Vec3::new(0.5, 0.0, 0.0),
            flags: MoveFlags::new().with_on_ground(true),
            client_time_ms: 123456,
        });
        round_trip(ServerMovement {
            guid: 99,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::ZERO,
            velocity: Vec3::ZERO,
            flags: MoveFlags::new().with_falling(true),
            client_time_ms: 123456,
        });

        round_trip(ClientSetTarget { guid: 12 });
        round_trip(ClientCastSpell {
            spell_id: 55665,
            target: 12,
        });
        round_trip(ClientCancelCast);
        round_trip(ServerSpellGo {
            caster: 5,
            primary_target: 12,
            spell_id: 55665,
            hits: vec![SpellHit {
                target: 12,
                kind: EffectKindTag::Damage,
                amount: 22,
            }],
        });
        round_trip(ServerSpellFail {
            spell_id: 55665,
            reason: CastFailReason::OutOfRange,
        });
        round_trip(ServerHealthUpdate {
            guid: 12,
            health: 78,
            max_health: 100,
        });

        round_trip(ServerBuffApply {
            target: 12,
            caster: 5,
            effect_id: 11,
            spell_id: 20005,
            kind: EffectKindTag::Absorb,
            amount: 100,
            duration_ms: 10_000,
            is_debuff: false,
        });
        round_trip(ServerBuffRemove {
            target: 12,
            effect_id: 11,
            reason: BuffRemoveReason::Expired,
        });

        round_trip(ClientNpcInteract {
            guid: 33,
            event: Bits(49),
        });
        round_trip(ServerDialogStart {
            dialog_unit_id: 9001,
            is_quest_giver: true,
        });
        round_trip(ServerChatNpc {
            channel: Bits(14),
            chat_id: 0xdead_beef,
            unit_name_text_id: Bits(0x1f_0001),
            message_text_id: Bits(0x0f_0002),
        });

        round_trip(ClientChat {
            channel: ChatChannel::Whisper,
            target: "bob".into(),
            message: "hi".into(),
        });
        round_trip(ServerChat {
            channel: ChatChannel::Whisper,
            from_guid: 5,
            from_name: "Alice".into(),
            message: "hi".into(),
        });
        round_trip(ServerChatResult {
            result: ChatResult::PlayerOffline,
        });
    }

    #[test]
    fn npc_chat_is_bit_packed_exactly() {
        // 14 + 64 + 21 + 21 = 120 bits = 15 bytes.
        let mut w = PacketWriter::new();
        ServerChatNpc {
            channel: Bits(3),
            chat_id: 1,
            unit_name_text_id: Bits(2),
            message_text_id: Bits(3),
        }
        .encode(&mut w)
        .unwrap();
        assert_eq!(w.finish().len(), 15);
    }

    #[test]
    fn npc_interact_is_bit_packed_exactly() {
        // 64 + 7 = 71 bits = 9 bytes.
        let mut w = PacketWriter::new();
        ClientNpcInteract {
            guid: 1,
            event: Bits(0x7f),
        }
        .encode(&mut w)
        .unwrap();
        assert_eq!(w.finish().len(), 9);
    }
}
