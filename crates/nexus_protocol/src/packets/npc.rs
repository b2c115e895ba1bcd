//! NPC interaction and scripted dialog.

use super::{codec, packet};
use crate::Bits;

/// A click on an interactable unit. The event discriminates vendor, quest,
/// dialog and similar interactions and is packed into 7 bits.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClientNpcInteract {
    pub guid: u64,
    pub event: Bits<7>,
}
packet!(ClientNpcInteract, ClientNpcInteract, Serverbound);
codec!(ClientNpcInteract { guid, event });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerDialogStart {
    pub dialog_unit_id: u32,
    pub is_quest_giver: bool,
}
packet!(ServerDialogStart, ServerDialogStart, Clientbound);
codec!(ServerDialogStart {
    dialog_unit_id,
    is_quest_giver
});

/// Scripted NPC speech. The text ids index the localized-text table shipped
/// with the client, hence the 21-bit packing.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerChatNpc {
    pub channel: Bits<14>,
    pub chat_id: u64,
    pub unit_name_text_id: Bits<21>,
    pub message_text_id: Bits<21>,
}
packet!(ServerChatNpc, ServerChatNpc, Clientbound);
codec!(ServerChatNpc {
    channel,
    chat_id,
    unit_name_text_id,
    message_text_id,
});
