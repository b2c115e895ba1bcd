//! The zone-instance actor.
//!
//! One independent actor per `(world_id, instance_id)`. Messages are
//! processed one at a time and every mutation of the entity table, the
//! spatial grid and AI state happens on this task, so the invariants tie
//! together without locks. Cross-zone interactions are two independent
//! messages; nothing relies on two instances being synchronized.

mod ai;
mod combat;
pub mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use nexus_protocol::packets::{
    ChatChannel, EntityKindTag, MoveFlags, ServerChat, ServerChatNpc, ServerDialogStart,
    ServerEntityCreate, ServerEntityDestroy, ServerMovement,
};
use nexus_protocol::{Bits, Encode, Packet, PacketBuf};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::WorldConfig;
use crate::directory::WorldDirectory;
use crate::entity::{Entity, EntityData};
use crate::guid::Guid;
use crate::spatial::SpatialGrid;
use crate::static_data::{ContentType, StaticDataStore};
use crate::store::{CharacterSnapshot, CharacterStore};

/// The channel on which scripted NPC speech is delivered.
const NPC_SAY_CHANNEL: u32 = 23;

/// Why an entity is leaving its zone.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RemoveReason {
    /// Orderly leave: logout, teleport away.
    Leave,
    /// The socket died; instanced content is held for the disconnect
    /// grace period.
    Disconnect,
}

/// The zone actor's mailbox.
pub enum ZoneMessage {
    AddPlayer {
        entity: Box<Entity>,
    },
    RemoveEntity {
        guid: Guid,
        reason: RemoveReason,
    },
    UpdatePosition {
        guid: Guid,
        position: Vec3,
        rotation: Vec3,
        velocity: Vec3,
        flags: MoveFlags,
        client_time_ms: u32,
    },
    EntitiesInRange {
        center: Vec3,
        radius: f32,
        reply: oneshot::Sender<Vec<Guid>>,
    },
    /// A raw damage event, as emitted by content systems.
    Damage {
        attacker: Guid,
        target: Guid,
        amount: u32,
    },
    /// Applies every effect of a spell without the cast pipeline.
    ApplySpellEffect {
        caster: Guid,
        target: Guid,
        spell_id: u32,
    },
    CastSpell {
        caster: Guid,
        spell_id: u32,
        target: Guid,
    },
    CancelCast {
        caster: Guid,
    },
    SetTarget {
        caster: Guid,
        target: Option<Guid>,
    },
    Chat {
        from: Guid,
        channel: ChatChannel,
        message: String,
    },
    NpcInteract {
        from: Guid,
        target: Guid,
        event: u8,
    },
    /// Fan a pre-encoded packet out to players near `origin`.
    Broadcast {
        origin: Vec3,
        packet: PacketBuf,
    },
    /// Scheduled: a cast bar ran out.
    CastComplete {
        caster: Guid,
        serial: u64,
    },
    /// Scheduled: a buff reached its expiry time.
    EffectExpired {
        holder: Guid,
        effect_id: u32,
        serial: u64,
    },
    /// Scheduled: a dead creature comes back under a fresh GUID.
    RespawnCreature {
        template_id: u32,
        position: Vec3,
        rotation: Vec3,
    },
    /// Debug/admin introspection.
    Inspect {
        reply: oneshot::Sender<ZoneSnapshot>,
    },
}

/// Point-in-time view of a zone, for tooling and tests.
#[derive(Debug)]
pub struct ZoneSnapshot {
    pub world_id: u32,
    pub instance_id: u32,
    pub player_count: usize,
    pub entities: Vec<EntitySnapshot>,
}

impl ZoneSnapshot {
    pub fn entity(&self, guid: Guid) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.guid == guid)
    }
}

#[derive(Debug)]
pub struct EntitySnapshot {
    pub guid: Guid,
    pub name: String,
    pub kind: EntityKindTag,
    pub position: Vec3,
    pub health: u32,
    pub max_health: u32,
    pub ai_state: Option<&'static str>,
    pub target: Option<Guid>,
    pub threat: Vec<(Guid, u64)>,
    pub effects: Vec<(u32, i32)>,
}

/// Cloneable address of a zone actor.
#[derive(Clone)]
pub struct ZoneHandle {
    world_id: u32,
    instance_id: u32,
    tx: mpsc::UnboundedSender<ZoneMessage>,
}

impl ZoneHandle {
    pub fn world_id(&self) -> u32 {
        self.world_id
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn coord(&self) -> (u32, u32) {
        (self.world_id, self.instance_id)
    }

    /// `false` means the instance already retired; callers re-enter
    /// through the registry.
    pub fn send(&self, msg: ZoneMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn entities_in_range(&self, center: Vec3, radius: f32) -> Vec<Guid> {
        let (reply, rx) = oneshot::channel();
        if !self.send(ZoneMessage::EntitiesInRange {
            center,
            radius,
            reply,
        }) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Option<ZoneSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.send(ZoneMessage::Inspect { reply }) {
            return None;
        }
        rx.await.ok()
    }
}

pub(crate) struct ZoneArgs {
    pub world_id: u32,
    pub instance_id: u32,
    pub content: ContentType,
    pub config: Arc<WorldConfig>,
    pub data: Arc<StaticDataStore>,
    pub store: Arc<dyn CharacterStore>,
    pub directory: Arc<WorldDirectory>,
    pub retire_tx: flume::Sender<(u32, u32)>,
}

pub(crate) struct ZoneInstance {
    world_id: u32,
    instance_id: u32,
    content: ContentType,
    config: Arc<WorldConfig>,
    data: Arc<StaticDataStore>,
    store: Arc<dyn CharacterStore>,
    directory: Arc<WorldDirectory>,
    tx: mpsc::UnboundedSender<ZoneMessage>,
    retire_tx: flume::Sender<(u32, u32)>,

    entities: FxHashMap<Guid, Entity>,
    grid: SpatialGrid,
    players: FxHashSet<Guid>,
    /// Creature GUIDs in round-robin order for the budgeted AI tick.
    roster: Vec<Guid>,
    ai_cursor: usize,

    /// Mailbox depth sampled at the top of each loop turn, for shedding.
    mailbox_len: usize,
    next_chat_id: u64,
    /// Armed when the zone empties; `None` while populated or persistent.
    retire_at: Option<Instant>,
}

impl ZoneInstance {
    pub(crate) fn spawn(args: ZoneArgs) -> ZoneHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let cell_size = args.config.cell_size;
        let mut zone = ZoneInstance {
            world_id: args.world_id,
            instance_id: args.instance_id,
            content: args.content,
            config: args.config,
            data: args.data,
            store: args.store,
            directory: args.directory,
            tx: tx.clone(),
            retire_tx: args.retire_tx,
            entities: FxHashMap::default(),
            grid: SpatialGrid::new(cell_size),
            players: FxHashSet::default(),
            roster: Vec::new(),
            ai_cursor: 0,
            mailbox_len: 0,
            next_chat_id: 0,
            retire_at: None,
        };

        zone.seed_creatures();

        // A fresh instance whose entering player never arrives must not
        // leak; the disconnect grace doubles as its load allowance.
        zone.retire_at = zone.content.empty_ttl().map(|ttl| {
            Instant::now() + ttl.max(zone.content.disconnect_grace().unwrap_or(Duration::ZERO))
        });

        let handle = ZoneHandle {
            world_id: zone.world_id,
            instance_id: zone.instance_id,
            tx,
        };

        info!(
            world_id = zone.world_id,
            instance_id = zone.instance_id,
            content = ?zone.content,
            creatures = zone.roster.len(),
            "zone instance spawned"
        );

        tokio::spawn(zone.run(rx));
        handle
    }

    fn seed_creatures(&mut self) {
        let data = self.data.clone();
        let Some(zone_data) = data.zone(self.world_id) else {
            return;
        };
        for spawn in &zone_data.spawns {
            self.spawn_creature(spawn.template_id, spawn.position, spawn.rotation, false);
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ZoneMessage>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.mailbox_len = rx.len();

            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = ticker.tick() => self.tick(Instant::now()),
            }

            if self.should_retire(Instant::now()) {
                let _ = self.retire_tx.send((self.world_id, self.instance_id));
                info!(
                    world_id = self.world_id,
                    instance_id = self.instance_id,
                    "zone instance retired"
                );
                break;
            }
        }
    }

    fn handle_message(&mut self, msg: ZoneMessage) {
        match msg {
            ZoneMessage::AddPlayer { entity } => self.add_player(*entity),
            ZoneMessage::RemoveEntity { guid, reason } => self.remove_entity(guid, reason),
            ZoneMessage::UpdatePosition {
                guid,
                position,
                rotation,
                velocity,
                flags,
                client_time_ms,
            } => self.update_position(guid, position, rotation, velocity, flags, client_time_ms),
            ZoneMessage::EntitiesInRange {
                center,
                radius,
                reply,
            } => {
                let _ = reply.send(self.grid.entities_in_range(center, radius));
            }
            ZoneMessage::Damage {
                attacker,
                target,
                amount,
            } => {
                self.apply_damage(attacker, target, amount, Instant::now());
            }
            ZoneMessage::ApplySpellEffect {
                caster,
                target,
                spell_id,
            } => self.apply_spell_effects(caster, target, spell_id),
            ZoneMessage::CastSpell {
                caster,
                spell_id,
                target,
            } => self.handle_cast(caster, spell_id, target),
            ZoneMessage::CancelCast { caster } => self.handle_cancel_cast(caster),
            ZoneMessage::SetTarget { caster, target } => {
                if let Some(player) = self
                    .entities
                    .get_mut(&caster)
                    .and_then(Entity::as_player_mut)
                {
                    player.target = target;
                }
            }
            ZoneMessage::Chat {
                from,
                channel,
                message,
            } => self.handle_chat(from, channel, message),
            ZoneMessage::NpcInteract {
                from,
                target,
                event,
            } => self.handle_npc_interact(from, target, event),
            ZoneMessage::Broadcast { origin, packet } => {
                self.broadcast_raw(origin, self.config.broadcast_radius, None, packet);
            }
            ZoneMessage::CastComplete { caster, serial } => {
                self.handle_cast_complete(caster, serial);
            }
            ZoneMessage::EffectExpired {
                holder,
                effect_id,
                serial,
            } => self.handle_effect_expired(holder, effect_id, serial),
            ZoneMessage::RespawnCreature {
                template_id,
                position,
                rotation,
            } => {
                self.spawn_creature(template_id, position, rotation, true);
            }
            ZoneMessage::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        self.tick_effects(now);
        self.tick_creatures(now);
    }

    // ---- player lifecycle ------------------------------------------------

    fn add_player(&mut self, entity: Entity) {
        let guid = entity.guid;
        let position = entity.position;

        // The joiner sees itself first, then everything already here.
        if let Some(player) = entity.as_player() {
            player.conn.send(&entity_create_packet(&entity));
            for other in self
                .grid
                .entities_in_range(position, self.config.broadcast_radius)
            {
                if let Some(other) = self.entities.get(&other) {
                    player.conn.send(&entity_create_packet(other));
                }
            }
        }

        self.grid.insert(guid, position);
        self.players.insert(guid);
        self.retire_at = None;

        // Spawn broadcasts are immediate, not tick-deferred.
        let packet = entity_create_packet(&entity);
        self.entities.insert(guid, entity);
        self.broadcast(position, self.config.broadcast_radius, Some(guid), &packet);

        debug!(
            world_id = self.world_id,
            instance_id = self.instance_id,
            %guid,
            "player entered zone"
        );
    }

    fn remove_entity(&mut self, guid: Guid, reason: RemoveReason) {
        let Some(entity) = self.entities.remove(&guid) else {
            return;
        };
        self.grid.remove(guid);
        self.players.remove(&guid);
        self.roster.retain(|&g| g != guid);

        self.broadcast(
            entity.position,
            self.config.broadcast_radius,
            Some(guid),
            &ServerEntityDestroy {
                guid: guid.to_raw(),
            },
        );

        if let EntityData::Player(player) = &entity.data {
            self.save_player(&entity, player);
        }

        if self.players.is_empty() {
            self.arm_retire(reason);
        }
    }

    fn save_player(&self, entity: &Entity, player: &crate::entity::PlayerState) {
        let snapshot = CharacterSnapshot {
            character_id: player.character_id,
            world_id: self.world_id,
            position: entity.position,
            rotation: entity.rotation,
            level: entity.level,
            xp: player.xp,
            currency: player.currency,
        };
        let store = self.store.clone();
        // Fire-and-forget: the store owns retries, and world state is never
        // unwound on a persistence failure.
        tokio::spawn(async move {
            if let Err(e) = store.save_character(snapshot).await {
                warn!("character save failed: {e:#}");
            }
        });
    }

    fn arm_retire(&mut self, reason: RemoveReason) {
        let ttl = match reason {
            RemoveReason::Leave => self.content.empty_ttl(),
            RemoveReason::Disconnect => self.content.empty_ttl().map(|ttl| {
                ttl.max(self.content.disconnect_grace().unwrap_or(Duration::ZERO))
            }),
        };
        self.retire_at = ttl.map(|ttl| Instant::now() + ttl);
    }

    fn should_retire(&self, now: Instant) -> bool {
        self.players.is_empty() && self.retire_at.is_some_and(|at| now >= at)
    }

    // ---- movement --------------------------------------------------------

    fn update_position(
        &mut self,
        guid: Guid,
        position: Vec3,
        rotation: Vec3,
        velocity: Vec3,
        flags: MoveFlags,
        client_time_ms: u32,
    ) {
        let now = Instant::now();
        let Some(entity) = self.entities.get_mut(&guid) else {
            debug!(%guid, "movement for unknown entity dropped");
            return;
        };
        let Some(player) = entity.as_player_mut() else {
            return;
        };

        let elapsed = now.duration_since(player.last_move_at).as_secs_f32();
        player.last_move_at = now;

        // Displacement beyond the per-class speed cap is clamped, not
        // punished; the client may be racing a teleport.
        let cap = self.config.move_speed_cap * elapsed + self.config.move_tolerance;
        let delta = position - entity.position;
        let accepted = if delta.length_squared() > cap * cap {
            debug!(%guid, "implausible displacement clamped");
            entity.position + delta.normalize_or_zero() * cap
        } else {
            position
        };

        entity.position = accepted;
        entity.rotation = rotation;
        self.grid.update(guid, accepted);

        let radius = self.movement_radius();
        self.broadcast(
            accepted,
            radius,
            Some(guid),
            &ServerMovement {
                guid: guid.to_raw(),
                position: accepted,
                rotation,
                velocity,
                flags,
                client_time_ms,
            },
        );
    }

    /// Movement is the shed-first traffic class: above the mailbox
    /// watermark, distant observers stop hearing about it.
    fn movement_radius(&self) -> f32 {
        if self.mailbox_len > self.config.mailbox_watermark {
            self.config.broadcast_radius * 2.0
        } else {
            self.config.movement_broadcast_radius
        }
    }

    // ---- chat and interaction -------------------------------------------

    fn handle_chat(&mut self, from: Guid, channel: ChatChannel, message: String) {
        let Some(entity) = self.entities.get(&from) else {
            return;
        };

        let packet = ServerChat {
            channel,
            from_guid: from.to_raw(),
            from_name: entity.name.clone(),
            message,
        };

        match channel {
            ChatChannel::Local | ChatChannel::Say => {
                self.broadcast(entity.position, self.config.say_radius, None, &packet);
            }
            ChatChannel::Yell => {
                self.broadcast(entity.position, self.config.yell_radius, None, &packet);
            }
            ChatChannel::Zone => self.broadcast_zone(&packet),
            // Whisper and global routing live in the session layer.
            ChatChannel::Whisper | ChatChannel::Global => {
                debug!(%from, "misrouted chat channel {channel:?} dropped");
            }
        }
    }

    fn handle_npc_interact(&mut self, from: Guid, target: Guid, event: u8) {
        let Some(player_ent) = self.entities.get(&from) else {
            return;
        };
        let player_pos = player_ent.position;
        let Some(conn) = player_ent.as_player().map(|p| p.conn.clone()) else {
            return;
        };

        let Some(creature_ent) = self.entities.get(&target) else {
            debug!(%from, %target, "interaction with unknown unit dropped");
            return;
        };
        let Some(creature) = creature_ent.as_creature() else {
            return;
        };

        let reach = self.config.interact_radius;
        if player_pos.distance_squared(creature_ent.position) > reach * reach {
            debug!(%from, %target, "interaction out of range dropped");
            return;
        }

        let template = creature.template.clone();
        let position = creature_ent.position;
        debug!(%from, %target, event, "npc interaction");

        if let Some(dialog_id) = template.dialog_id {
            conn.send(&ServerDialogStart {
                dialog_unit_id: dialog_id,
                is_quest_giver: false,
            });
        }

        // Scripted speech only happens when both text ids exist in the
        // localized tables the client also ships.
        if let (Some(name_id), Some(text_id)) = (template.name_text_id, template.greeting_text_id)
        {
            if self.data.text(name_id).is_some() && self.data.text(text_id).is_some() {
                self.next_chat_id += 1;
                let packet = ServerChatNpc {
                    channel: Bits(NPC_SAY_CHANNEL),
                    chat_id: self.next_chat_id,
                    unit_name_text_id: Bits(name_id),
                    message_text_id: Bits(text_id),
                };
                self.broadcast(position, self.config.say_radius, None, &packet);
            }
        }
    }

    // ---- broadcast -------------------------------------------------------

    fn broadcast<P>(&self, origin: Vec3, radius: f32, exclude: Option<Guid>, pkt: &P)
    where
        P: Packet + Encode,
    {
        match PacketBuf::new(pkt) {
            Ok(buf) => self.broadcast_raw(origin, radius, exclude, buf),
            Err(e) => warn!("failed to encode '{}' for broadcast: {e:#}", P::NAME),
        }
    }

    fn broadcast_raw(&self, origin: Vec3, radius: f32, exclude: Option<Guid>, buf: PacketBuf) {
        for guid in self.grid.entities_in_range(origin, radius) {
            if exclude == Some(guid) {
                continue;
            }
            if let Some(player) = self.entities.get(&guid).and_then(Entity::as_player) {
                player.conn.send_raw(buf.clone());
            }
        }
    }

    fn broadcast_zone<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        let Ok(buf) = PacketBuf::new(pkt) else {
            return;
        };
        for guid in &self.players {
            if let Some(player) = self.entities.get(guid).and_then(Entity::as_player) {
                player.conn.send_raw(buf.clone());
            }
        }
    }

    fn send_to<P>(&self, guid: Guid, pkt: &P)
    where
        P: Packet + Encode,
    {
        if let Some(player) = self.entities.get(&guid).and_then(Entity::as_player) {
            player.conn.send(pkt);
        }
    }

    // ---- timers ----------------------------------------------------------

    /// Coroutine-shaped waits are realized as a message scheduled back
    /// into the mailbox; the handler re-checks liveness on arrival, so a
    /// timer can never act on a despawned entity.
    fn schedule(&self, delay: Duration, msg: ZoneMessage) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    // ---- introspection ---------------------------------------------------

    fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            world_id: self.world_id,
            instance_id: self.instance_id,
            player_count: self.players.len(),
            entities: self
                .entities
                .values()
                .map(|entity| {
                    let creature = entity.as_creature();
                    EntitySnapshot {
                        guid: entity.guid,
                        name: entity.name.clone(),
                        kind: entity.kind_tag(),
                        position: entity.position,
                        health: entity.health,
                        max_health: entity.max_health,
                        ai_state: creature.map(|c| c.ai.name()),
                        target: creature.and_then(|c| match c.ai {
                            crate::entity::AiState::Combat { target, .. } => Some(target),
                            _ => None,
                        }),
                        threat: creature
                            .map(|c| c.threat.entries().collect())
                            .unwrap_or_default(),
                        effects: entity
                            .effects
                            .iter()
                            .map(|e| (e.effect_id, e.amount))
                            .collect(),
                    }
                })
                .collect(),
        }
    }
}

/// Builds the spawn broadcast for an entity.
fn entity_create_packet(entity: &Entity) -> ServerEntityCreate {
    ServerEntityCreate {
        guid: entity.guid.to_raw(),
        kind: entity.kind_tag(),
        name: entity.name.clone(),
        position: entity.position,
        rotation: entity.rotation,
        faction_id: entity.faction_id,
        level: Bits(u32::from(entity.level)),
        health: entity.health,
        max_health: entity.max_health,
        display_id: entity.display_id(),
    }
}
