//! Player chat.

use super::{codec, enum_codec, packet};

/// Chat channels, packed into 14 bits like the NPC chat channel field.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u16)]
pub enum ChatChannel {
    Local = 0,
    Say = 1,
    Yell = 2,
    Zone = 3,
    Global = 4,
    Whisper = 5,
}

impl ChatChannel {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Local,
            1 => Self::Say,
            2 => Self::Yell,
            3 => Self::Zone,
            4 => Self::Global,
            5 => Self::Whisper,
            _ => return None,
        })
    }
}
enum_codec!(ChatChannel as 14);

#[derive(Clone, PartialEq, Debug)]
pub struct ClientChat {
    pub channel: ChatChannel,
    /// Recipient character name; empty unless `channel` is
    /// [`ChatChannel::Whisper`].
    pub target: String,
    pub message: String,
}
packet!(ClientChat, ClientChat, Serverbound);
codec!(ClientChat {
    channel,
    target,
    message
});

#[derive(Clone, PartialEq, Debug)]
pub struct ServerChat {
    pub channel: ChatChannel,
    pub from_guid: u64,
    pub from_name: String,
    pub message: String,
}
packet!(ServerChat, ServerChat, Clientbound);
codec!(ServerChat {
    channel,
    from_guid,
    from_name,
    message,
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ChatResult {
    Ok = 0,
    PlayerOffline = 1,
    BadChannel = 2,
}

impl ChatResult {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::PlayerOffline,
            2 => Self::BadChannel,
            _ => return None,
        })
    }
}
enum_codec!(ChatResult as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerChatResult {
    pub result: ChatResult,
}
packet!(ServerChatResult, ServerChatResult, Clientbound);
codec!(ServerChatResult { result });
