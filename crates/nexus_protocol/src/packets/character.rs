//! Character list, creation, deletion and selection.

use super::{codec, enum_codec, packet};
use crate::Bits;

#[derive(Clone, PartialEq, Debug)]
pub struct CharacterSummary {
    pub character_id: u64,
    pub name: String,
    /// Levels cap at 50, packed into 7 bits.
    pub level: Bits<7>,
    pub class_id: u32,
    pub faction_id: u32,
    pub world_id: u32,
}
codec!(CharacterSummary {
    character_id,
    name,
    level,
    class_id,
    faction_id,
    world_id,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientCharacterList;
packet!(ClientCharacterList, ClientCharacterList, Serverbound);
codec!(ClientCharacterList {});

#[derive(Clone, PartialEq, Debug)]
pub struct ServerCharacterList {
    pub characters: Vec<CharacterSummary>,
}
packet!(ServerCharacterList, ServerCharacterList, Clientbound);
codec!(ServerCharacterList { characters });

#[derive(Clone, PartialEq, Debug)]
pub struct ClientCharacterCreate {
    pub name: String,
    pub class_id: u32,
    pub faction_id: u32,
}
packet!(ClientCharacterCreate, ClientCharacterCreate, Serverbound);
codec!(ClientCharacterCreate {
    name,
    class_id,
    faction_id,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CharacterCreateResult {
    Ok = 0,
    NameTaken = 1,
    InvalidName = 2,
    Failed = 3,
}

impl CharacterCreateResult {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::NameTaken,
            2 => Self::InvalidName,
            3 => Self::Failed,
            _ => return None,
        })
    }
}
enum_codec!(CharacterCreateResult as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerCharacterCreateResult {
    pub result: CharacterCreateResult,
    /// Zero unless `result` is [`CharacterCreateResult::Ok`].
    pub character_id: u64,
}
packet!(
    ServerCharacterCreateResult,
    ServerCharacterCreateResult,
    Clientbound
);
codec!(ServerCharacterCreateResult {
    result,
    character_id
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientCharacterDelete {
    pub character_id: u64,
}
packet!(ClientCharacterDelete, ClientCharacterDelete, Serverbound);
codec!(ClientCharacterDelete { character_id });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerCharacterDeleteResult {
    pub character_id: u64,
    pub ok: bool,
}
packet!(
    ServerCharacterDeleteResult,
    ServerCharacterDeleteResult,
    Clientbound
);
codec!(ServerCharacterDeleteResult { character_id, ok });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientCharacterSelect {
    pub character_id: u64,
}
packet!(ClientCharacterSelect, ClientCharacterSelect, Serverbound);
codec!(ClientCharacterSelect { character_id });
