//! Per-session driver: the opcode router between a connection and the
//! world.
//!
//! One task per world session. Handlers never touch the socket (the
//! connection serializes its own outbound) and never block on other
//! actors: everything world-side is a message to a zone or a directory
//! call. Packets from one connection are handled here in arrival order.

use std::sync::Arc;
use std::time::Instant;

use nexus_network::{ConnectionHandle, NewWorldSession};
use nexus_protocol::packets::{
    AuthFailReason, CharacterCreateResult, CharacterSummary, ChatChannel, ChatResult,
    ClientCastSpell, ClientCharacterCreate, ClientCharacterDelete, ClientCharacterSelect,
    ClientChat, ClientMovement, ClientNpcInteract, ClientSetTarget, ServerAuthFail,
    ServerCharacterCreateResult, ServerCharacterDeleteResult, ServerCharacterList, ServerChat,
    ServerChatResult, ServerWorldEnter,
};
use nexus_protocol::{Bits, Decode, Opcode, Packet, PacketFrame};
use tracing::{debug, info, warn};

use crate::config::WorldConfig;
use crate::directory::WorldDirectory;
use crate::entity::{Entity, EntityData, FactionAlignment, PlayerState, Stats};
use crate::guid::{Guid, GuidKind};
use crate::static_data::StaticDataStore;
use crate::store::{Character, CharacterStore, StoreError};
use crate::zone::registry::ZoneRegistry;
use crate::zone::{RemoveReason, ZoneHandle, ZoneMessage};

/// Base vitals per level. Real class curves belong in static data; these
/// flat values stand in until that table is extracted.
const BASE_HEALTH: u32 = 150;
const HEALTH_PER_LEVEL: u32 = 50;
const BASE_RESOURCE: u32 = 250;

/// Everything a session driver needs, cheaply cloneable.
#[derive(Clone)]
pub struct WorldContext {
    pub directory: Arc<WorldDirectory>,
    pub registry: Arc<ZoneRegistry>,
    pub store: Arc<dyn CharacterStore>,
    pub data: Arc<StaticDataStore>,
    pub config: Arc<WorldConfig>,
}

/// Handler outcome taxonomy; the driver translates it into reply, drop or
/// disconnect.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    /// Close the connection: bad frame, opcode unknown or impossible for
    /// the phase.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Drop the packet, keep the connection: the client may be racing a
    /// phase change.
    #[error("{0}")]
    Ignored(String),
    /// Store or internal failure. Logged; the session survives and state
    /// reconciles on the next successful operation.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct SessionState {
    account_id: u32,
    handle: ConnectionHandle,
    /// Populated at character select.
    selected: Option<Character>,
    zone: Option<ZoneHandle>,
    /// Populated at world entry.
    guid: Option<Guid>,
}

impl SessionState {
    fn in_world(&self) -> Result<(Guid, &ZoneHandle), SessionError> {
        match (self.guid, &self.zone) {
            (Some(guid), Some(zone)) => Ok((guid, zone)),
            _ => Err(SessionError::Ignored("not in world yet".into())),
        }
    }
}

pub async fn run_session(ctx: WorldContext, new: NewWorldSession) {
    let account_id = new.account_id;

    if !ctx.directory.try_insert(account_id, new.handle.clone()) {
        // One live session per account.
        new.handle.send(&ServerAuthFail {
            reason: AuthFailReason::DuplicateLogin,
        });
        new.handle.close();
        info!(account_id, "duplicate login refused");
        return;
    }

    info!(account_id, remote_addr = %new.remote_addr, "world session started");

    let mut state = SessionState {
        account_id,
        handle: new.handle.clone(),
        selected: None,
        zone: None,
        guid: None,
    };

    while let Ok(frame) = new.inbound.recv_async().await {
        match dispatch(&ctx, &mut state, frame).await {
            Ok(()) => {}
            Err(SessionError::Protocol(reason)) => {
                warn!(account_id, "{reason}; closing connection");
                state.handle.close();
                break;
            }
            Err(SessionError::Ignored(reason)) => {
                debug!(account_id, "packet dropped: {reason}");
            }
            Err(SessionError::Internal(e)) => {
                warn!(account_id, "handler error: {e:#}");
            }
        }
    }

    logout(&ctx, &state);
}

fn logout(ctx: &WorldContext, state: &SessionState) {
    if let Some(removed) = ctx.directory.remove(state.account_id) {
        if let (Some(guid), Some((world_id, instance_id))) = (removed.guid, removed.zone) {
            if let Some(zone) = ctx.registry.get(world_id, instance_id) {
                zone.send(ZoneMessage::RemoveEntity {
                    guid,
                    reason: RemoveReason::Disconnect,
                });
            }
        }
    }
    info!(account_id = state.account_id, "world session ended");
}

fn decode<P>(frame: &PacketFrame) -> Result<P, SessionError>
where
    P: Packet + Decode,
{
    frame
        .decode()
        .map_err(|e| SessionError::Protocol(format!("malformed '{}': {e:#}", P::NAME)))
}

async fn dispatch(
    ctx: &WorldContext,
    state: &mut SessionState,
    frame: PacketFrame,
) -> Result<(), SessionError> {
    let Some(opcode) = Opcode::from_raw(frame.opcode) else {
        return Err(SessionError::Protocol(format!(
            "unknown opcode {:#06x}",
            frame.opcode
        )));
    };

    if !opcode.is_serverbound() {
        return Err(SessionError::Protocol(format!(
            "clientbound opcode {opcode:?} from client"
        )));
    }

    match opcode {
        Opcode::ClientCharacterList => {
            let _ = decode::<nexus_protocol::packets::ClientCharacterList>(&frame)?;
            character_list(ctx, state).await
        }
        Opcode::ClientCharacterCreate => {
            character_create(ctx, state, decode(&frame)?).await
        }
        Opcode::ClientCharacterDelete => {
            character_delete(ctx, state, decode(&frame)?).await
        }
        Opcode::ClientCharacterSelect => {
            character_select(ctx, state, decode(&frame)?).await
        }
        Opcode::ClientEnteredWorld => {
            let _ = decode::<nexus_protocol::packets::ClientEnteredWorld>(&frame)?;
            entered_world(ctx, state)
        }
        Opcode::ClientMovement => movement(state, decode(&frame)?),
        Opcode::ClientSetTarget => set_target(state, decode(&frame)?),
        Opcode::ClientCastSpell => cast_spell(state, decode(&frame)?),
        Opcode::ClientCancelCast => {
            let _ = decode::<nexus_protocol::packets::ClientCancelCast>(&frame)?;
            let (guid, zone) = state.in_world()?;
            zone.send(ZoneMessage::CancelCast { caster: guid });
            Ok(())
        }
        Opcode::ClientNpcInteract => npc_interact(state, decode(&frame)?),
        Opcode::ClientChat => chat(ctx, state, decode(&frame)?),

        // Handshake opcodes have no business past the handshake.
        op if HANDSHAKE_OPCODES.contains(&op) => Err(SessionError::Protocol(format!(
            "handshake opcode {op:?} after handshake"
        ))),
        // The decoder unwraps envelopes before we ever see them.
        Opcode::Encrypted => Err(SessionError::Protocol("raw envelope leaked".into())),

        _ => Err(SessionError::Protocol(format!(
            "unroutable opcode {opcode:?}"
        ))),
    }
}

// ---- character management -----------------------------------------------

async fn character_list(ctx: &WorldContext, state: &SessionState) -> Result<(), SessionError> {
    let characters = ctx.store.characters_for(state.account_id).await?;
    state.handle.send(&ServerCharacterList {
        characters: characters
            .iter()
            .map(|c| CharacterSummary {
                character_id: c.character_id,
                name: c.name.clone(),
                level: Bits(u32::from(c.level)),
                class_id: c.class_id,
                faction_id: c.faction_id,
                world_id: c.world_id,
            })
            .collect(),
    });
    Ok(())
}

async fn character_create(
    ctx: &WorldContext,
    state: &SessionState,
    pkt: ClientCharacterCreate,
) -> Result<(), SessionError> {
    // New characters start in the default world at its start position.
    const STARTING_WORLD: u32 = 870;
    let start = ctx
        .data
        .zone(STARTING_WORLD)
        .map(|z| z.start_position)
        .unwrap_or_default();

    let (result, character_id) = match ctx
        .store
        .create_character(
            state.account_id,
            &pkt.name,
            pkt.class_id,
            pkt.faction_id,
            STARTING_WORLD,
            start,
        )
        .await
    {
        Ok(character) => (CharacterCreateResult::Ok, character.character_id),
        Err(StoreError::NameTaken) => (CharacterCreateResult::NameTaken, 0),
        Err(StoreError::InvalidName) => (CharacterCreateResult::InvalidName, 0),
        Err(e) => {
            warn!("character create failed: {e}");
            (CharacterCreateResult::Failed, 0)
        }
    };

    state.handle.send(&ServerCharacterCreateResult {
        result,
        character_id,
    });
    Ok(())
}

async fn character_delete(
    ctx: &WorldContext,
    state: &SessionState,
    pkt: ClientCharacterDelete,
) -> Result<(), SessionError> {
    // Only the owner's characters are deletable.
    let owned = ctx
        .store
        .characters_for(state.account_id)
        .await?
        .iter()
        .any(|c| c.character_id == pkt.character_id);

    if owned {
        ctx.store.delete_character(pkt.character_id).await?;
    }

    state.handle.send(&ServerCharacterDeleteResult {
        character_id: pkt.character_id,
        ok: owned,
    });
    Ok(())
}

async fn character_select(
    ctx: &WorldContext,
    state: &mut SessionState,
    pkt: ClientCharacterSelect,
) -> Result<(), SessionError> {
    if state.guid.is_some() {
        return Err(SessionError::Ignored("select while in world".into()));
    }

    let character = ctx
        .store
        .characters_for(state.account_id)
        .await?
        .into_iter()
        .find(|c| c.character_id == pkt.character_id)
        .ok_or_else(|| SessionError::Ignored("select of foreign character".into()))?;

    let zone = ctx
        .registry
        .enter(character.world_id)
        .map_err(SessionError::Internal)?;

    ctx.directory
        .bind_character(state.account_id, character.character_id, &character.name);

    state.handle.send(&ServerWorldEnter {
        world_id: zone.world_id(),
        instance_id: zone.instance_id(),
        position: character.position,
        rotation: character.rotation,
    });

    info!(
        account_id = state.account_id,
        character = %character.name,
        world_id = zone.world_id(),
        instance_id = zone.instance_id(),
        "character selected"
    );

    state.selected = Some(character);
    state.zone = Some(zone);
    Ok(())
}

// ---- world entry ---------------------------------------------------------

fn entered_world(ctx: &WorldContext, state: &mut SessionState) -> Result<(), SessionError> {
    let Some(character) = &state.selected else {
        return Err(SessionError::Ignored("entered-world before select".into()));
    };
    let Some(zone) = &state.zone else {
        return Err(SessionError::Ignored("entered-world before select".into()));
    };
    if state.guid.is_some() {
        return Err(SessionError::Ignored("double entered-world".into()));
    }

    let guid = ctx.directory.allocate_guid(GuidKind::Player);
    let max_health = BASE_HEALTH + HEALTH_PER_LEVEL * u32::from(character.level);

    let entity = Entity {
        guid,
        name: character.name.clone(),
        position: character.position,
        rotation: character.rotation,
        faction_id: character.faction_id,
        faction: FactionAlignment::from_id(character.faction_id),
        level: character.level,
        health: max_health,
        max_health,
        base_stats: Stats::default(),
        effects: Default::default(),
        data: EntityData::Player(PlayerState {
            account_id: state.account_id,
            character_id: character.character_id,
            class_id: character.class_id,
            conn: state.handle.clone(),
            target: None,
            resource: BASE_RESOURCE,
            xp: character.xp,
            currency: character.currency,
            pending_cast: None,
            cast_serial: 0,
            last_move_at: Instant::now(),
        }),
    };

    zone.send(ZoneMessage::AddPlayer {
        entity: Box::new(entity),
    });
    ctx.directory
        .set_in_world(state.account_id, guid, zone.coord());
    state.guid = Some(guid);
    Ok(())
}

// ---- in-world traffic ----------------------------------------------------

fn movement(state: &SessionState, pkt: ClientMovement) -> Result<(), SessionError> {
    let (guid, zone) = state.in_world()?;
    zone.send(ZoneMessage::UpdatePosition {
        guid,
        position: pkt.position,
        rotation: pkt.rotation,
        velocity: pkt.velocity,
        flags: pkt.flags,
        client_time_ms: pkt.client_time_ms,
    });
    Ok(())
}

fn set_target(state: &SessionState, pkt: ClientSetTarget) -> Result<(), SessionError> {
    let (guid, zone) = state.in_world()?;
    let target = (pkt.guid != 0).then(|| Guid::from_raw(pkt.guid));
    zone.send(ZoneMessage::SetTarget {
        caster: guid,
        target,
    });
    Ok(())
}

fn cast_spell(state: &SessionState, pkt: ClientCastSpell) -> Result<(), SessionError> {
    let (guid, zone) = state.in_world()?;
    zone.send(ZoneMessage::CastSpell {
        caster: guid,
        spell_id: pkt.spell_id,
        target: Guid::from_raw(pkt.target),
    });
    Ok(())
}

fn npc_interact(state: &SessionState, pkt: ClientNpcInteract) -> Result<(), SessionError> {
    let (guid, zone) = state.in_world()?;
    zone.send(ZoneMessage::NpcInteract {
        from: guid,
        target: Guid::from_raw(pkt.guid),
        event: pkt.event.0 as u8,
    });
    Ok(())
}

/// Consumed by the handshake driver in `nexus_network`; seeing them here
/// is a phase violation.
const HANDSHAKE_OPCODES: &[Opcode] = &[
    Opcode::ClientHelloAuth,
    Opcode::ClientAuthProof,
    Opcode::ClientHelloWorld,
];

fn chat(ctx: &WorldContext, state: &SessionState, pkt: ClientChat) -> Result<(), SessionError> {
    let (guid, zone) = state.in_world()?;
    let from_name = state
        .selected
        .as_ref()
        .map(|c| c.name.clone())
        .unwrap_or_default();

    match pkt.channel {
        ChatChannel::Whisper => {
            // O(1) name-index lookup, cross-zone by construction.
            let target_conn = ctx
                .directory
                .account_by_name(&pkt.target)
                .and_then(|account| ctx.directory.connection_of(account));

            match target_conn {
                Some(conn) => {
                    conn.send(&ServerChat {
                        channel: ChatChannel::Whisper,
                        from_guid: guid.to_raw(),
                        from_name,
                        message: pkt.message,
                    });
                    state.handle.send(&ServerChatResult {
                        result: ChatResult::Ok,
                    });
                }
                None => {
                    state.handle.send(&ServerChatResult {
                        result: ChatResult::PlayerOffline,
                    });
                }
            }
        }
        ChatChannel::Global => {
            let packet = ServerChat {
                channel: ChatChannel::Global,
                from_guid: guid.to_raw(),
                from_name,
                message: pkt.message,
            };
            for conn in ctx.directory.connections() {
                conn.send(&packet);
            }
        }
        channel => {
            zone.send(ZoneMessage::Chat {
                from: guid,
                channel,
                message: pkt.message,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nexus_network::NetworkSettings;
    use nexus_protocol::bytes::BytesMut;
    use nexus_protocol::{Encode, PacketWriter};

    use super::*;
    use crate::server::WorldServer;
    use crate::store::MemoryCharacterStore;

    fn test_ctx() -> WorldContext {
        WorldServer::new(
            Arc::new(MemoryCharacterStore::new()),
            Arc::new(crate::static_data::builtin()),
            WorldConfig::default(),
            NetworkSettings::default(),
        )
        .context()
    }

    fn test_state() -> SessionState {
        SessionState {
            account_id: 1,
            handle: ConnectionHandle::pair(64).0,
            selected: None,
            zone: None,
            guid: None,
        }
    }

    fn frame(opcode: u16, body: &[u8]) -> PacketFrame {
        PacketFrame {
            opcode,
            body: BytesMut::from(body),
        }
    }

    fn frame_of<P>(pkt: &P) -> PacketFrame
    where
        P: Packet + Encode,
    {
        let mut w = PacketWriter::new();
        pkt.encode(&mut w).unwrap();
        frame(P::OPCODE.to_raw(), &w.finish())
    }

    #[tokio::test]
    async fn unknown_opcodes_are_protocol_violations() {
        let ctx = test_ctx();
        let mut state = test_state();
        let err = dispatch(&ctx, &mut state, frame(0x4242, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[tokio::test]
    async fn clientbound_opcodes_from_clients_are_protocol_violations() {
        let ctx = test_ctx();
        let mut state = test_state();
        let err = dispatch(
            &ctx,
            &mut state,
            frame(Opcode::ServerWelcome.to_raw(), &[]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[tokio::test]
    async fn racing_in_world_traffic_is_dropped_not_fatal() {
        let ctx = test_ctx();
        let mut state = test_state();

        let pkt = ClientMovement {
            position: glam::Vec3::ZERO,
            rotation: glam::Vec3::ZERO,
            velocity: glam::Vec3::ZERO,
            flags: nexus_protocol::packets::MoveFlags::new(),
            client_time_ms: 0,
        };
        let err = dispatch(&ctx, &mut state, frame_of(&pkt)).await.unwrap_err();
        assert!(matches!(err, SessionError::Ignored(_)));
    }

    #[tokio::test]
    async fn handshake_opcodes_after_handshake_close_the_connection() {
        let ctx = test_ctx();
        let mut state = test_state();
        for &opcode in HANDSHAKE_OPCODES {
            let err = dispatch(&ctx, &mut state, frame(opcode.to_raw(), &[]))
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Protocol(_)));
        }
    }

    /// Registry coverage: every opcode the client can send is consumed by
    /// exactly one layer.
    #[test]
    fn every_serverbound_opcode_has_a_consumer() {
        const ROUTED: &[Opcode] = &[
            Opcode::ClientCharacterList,
            Opcode::ClientCharacterCreate,
            Opcode::ClientCharacterDelete,
            Opcode::ClientCharacterSelect,
            Opcode::ClientEnteredWorld,
            Opcode::ClientMovement,
            Opcode::ClientSetTarget,
            Opcode::ClientCastSpell,
            Opcode::ClientCancelCast,
            Opcode::ClientNpcInteract,
            Opcode::ClientChat,
        ];

        for &opcode in Opcode::ALL {
            if !opcode.is_serverbound() || opcode == Opcode::Encrypted {
                continue;
            }
            assert!(
                ROUTED.contains(&opcode) || HANDSHAKE_OPCODES.contains(&opcode),
                "{opcode:?} has no consumer"
            );
        }
    }
}
