//! Game state and the tick loop of the host.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use protocol::packets::ClientPacket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::command::MinimapCommand;
use crate::config::Config;
use crate::context::{AppContext, PlayerRef};
use crate::error::MinimapError;
use crate::icon::IconError;
use crate::render::{Block, BlockSource};
use crate::transport::ConnectionId;
use crate::world::{BlockWorld, MIN_Y};
use crate::{PlayerId, WorldId};

/// One connection and the player on it, once joined.
#[derive(Debug)]
pub struct Session {
    pub player: Option<PlayerId>,
}

pub struct GameState {
    pub config: Config,
    pub world: BlockWorld,
    pub ctx: AppContext,
    pub sessions: HashMap<ConnectionId, Session>,
    pub tick_count: u64,
    next_connection: u32,
    next_entity: i32,
}

impl GameState {
    pub fn new(config: Config, ctx: AppContext) -> Self {
        let world = BlockWorld::generate(WorldId(0), &config.world);
        Self {
            config,
            world,
            ctx,
            sessions: HashMap::new(),
            tick_count: 0,
            next_connection: 1,
            next_entity: 1,
        }
    }

    /// Register a new connection whose writer drains `sink`.
    pub fn connect(&mut self, sink: mpsc::UnboundedSender<Bytes>) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection = self.next_connection.wrapping_add(1).max(1);
        self.ctx.transport_mut().open(id, sink);
        self.sessions.insert(id, Session { player: None });
        id
    }

    pub fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(Session { player: Some(id) }) = self.sessions.remove(&connection) {
            self.ctx.on_quit(id, connection);
        }
        self.ctx.transport_mut().close(connection);
    }

    fn player_of(&self, connection: ConnectionId) -> anyhow::Result<PlayerId> {
        self.sessions
            .get(&connection)
            .and_then(|s| s.player)
            .ok_or_else(|| anyhow::anyhow!("{} has not joined", connection))
    }

    fn reply(&mut self, connection: ConnectionId, text: &str) {
        if let Err(e) = self.ctx.send_message(connection, text) {
            debug!("Reply to {} not delivered: {}", connection, e);
        }
    }

    /// Handle one packet from a connection.
    pub fn handle_packet(&mut self, connection: ConnectionId, data: &[u8]) -> anyhow::Result<()> {
        let packet = ClientPacket::parse(data)?;
        if !matches!(packet, ClientPacket::Move { .. }) {
            debug!("{} sent {:?}", connection, packet);
        }
        match packet {
            ClientPacket::Join { player_id, name } => self.handle_join(connection, PlayerId(player_id), name),
            ClientPacket::Move { x, y, z } => self.handle_move(connection, x, y, z),
            ClientPacket::SetBlock { x, y, z, block } => self.handle_set_block(connection, x, y, z, block),
            ClientPacket::Chat { message } => self.handle_chat(connection, message),
        }
    }

    fn handle_join(&mut self, connection: ConnectionId, id: PlayerId, name: String) -> anyhow::Result<()> {
        let session = self
            .sessions
            .get_mut(&connection)
            .ok_or_else(|| anyhow::anyhow!("Unknown {}", connection))?;
        if session.player.is_some() {
            anyhow::bail!("{} joined twice", connection);
        }
        session.player = Some(id);
        // The same player on an older connection is replaced.
        for (conn, other) in self.sessions.iter_mut() {
            if *conn != connection && other.player == Some(id) {
                info!("{} takes over {} from {}", connection, id, conn);
                other.player = None;
            }
        }

        let entity_id = self.next_entity;
        self.next_entity += 1;
        let (x, y, z) = self.world.spawn_point();
        let player = PlayerRef {
            id,
            name,
            connection,
            entity_id,
            world: self.world.id(),
            x,
            y,
            z,
        };
        let welcome = format!("Welcome to {}! Type /minimap for options.", self.config.server.name);
        self.ctx.on_join(player, &self.world)?;
        self.reply(connection, &welcome);
        Ok(())
    }

    fn handle_move(&mut self, connection: ConnectionId, x: f64, y: f64, z: f64) -> anyhow::Result<()> {
        let id = self.player_of(connection)?;
        let world = self.world.id();
        self.ctx.on_move(id, world, x, y, z);

        if y < MIN_Y as f64 {
            info!("{} fell out of the world", id);
            if let Err(e) = self.ctx.on_death(id, &self.world) {
                warn!("Death point of {} not placed: {}", id, e);
            }
            let (sx, sy, sz) = self.world.spawn_point();
            self.ctx.on_move(id, world, sx, sy, sz);
            self.reply(connection, "You fell out of the world.");
        }
        Ok(())
    }

    fn handle_set_block(&mut self, connection: ConnectionId, x: i32, y: i32, z: i32, block: u16) -> anyhow::Result<()> {
        self.player_of(connection)?;
        let block = Block::from_id(block).ok_or_else(|| anyhow::anyhow!("Unknown block id {}", block))?;
        let world = self.world.id();
        if self.world.block_at(world, x, y, z) == block {
            return Ok(());
        }
        if self.world.set_block(x, y, z, block) {
            self.ctx.on_block_change(world, x, y, z);
        }
        Ok(())
    }

    fn handle_chat(&mut self, connection: ConnectionId, message: String) -> anyhow::Result<()> {
        let id = self.player_of(connection)?;
        if let Some(args) = message.strip_prefix("/minimap") {
            self.handle_minimap_command(connection, id, args);
            return Ok(());
        }
        if message.starts_with('/') {
            self.reply(connection, "Unknown command. Try /minimap.");
            return Ok(());
        }

        let name = self.ctx.player(id).map(|p| p.name.clone()).unwrap_or_default();
        info!("[Chat] {}: {}", name, message);
        let line = format!("<{}> {}", name, message);
        let connections: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for conn in connections {
            self.reply(conn, &line);
        }
        Ok(())
    }

    fn handle_minimap_command(&mut self, connection: ConnectionId, id: PlayerId, args: &str) {
        let command = match MinimapCommand::parse(args) {
            Ok(command) => command,
            Err(usage) => {
                self.reply(connection, &usage);
                return;
            }
        };

        let world = &self.world;
        let ctx = &mut self.ctx;
        let result = match &command {
            MinimapCommand::Enable => ctx.enable_minimap(id, world).map(|_| "Minimap enabled.".to_string()),
            MinimapCommand::Disable => ctx.disable_minimap(id).map(|_| "Minimap disabled.".to_string()),
            MinimapCommand::Position(pos) => ctx
                .set_position(id, *pos, world)
                .map(|_| format!("Minimap moved to the {}.", pos)),
            MinimapCommand::MarkerAdd { name, icon, at } => {
                let (x, z) = at.unwrap_or_else(|| {
                    ctx.player(id)
                        .map(|p| (p.x as i32, p.z as i32))
                        .unwrap_or_default()
                });
                let stick = ctx.config().markers.custom_markers.stick_to_border;
                ctx.add_marker(id, name, icon, x, z, stick, world)
                    .map(|_| format!("Marker '{}' added at ({}, {}).", name, x, z))
            }
            MinimapCommand::MarkerRemove { name } => ctx
                .remove_marker(id, name, world)
                .map(|_| format!("Marker '{}' removed.", name)),
            MinimapCommand::Follow { player } | MinimapCommand::Unfollow { player } => {
                match ctx.find_player(player) {
                    None => Ok(format!("No player named {}.", player)),
                    Some(target) if target == id => Ok("You cannot follow yourself.".to_string()),
                    Some(target) if matches!(command, MinimapCommand::Follow { .. }) => ctx
                        .follow(id, target, world)
                        .map(|_| format!("Following {}.", player)),
                    Some(target) => ctx
                        .unfollow(id, target, world)
                        .map(|_| format!("Stopped following {}.", player)),
                }
            }
            MinimapCommand::Fullscreen => ctx.toggle_fullscreen(id, world).map(|open| {
                if open {
                    "Fullscreen map opened. Walk to look around.".to_string()
                } else {
                    "Fullscreen map closed.".to_string()
                }
            }),
        };

        let text = match result {
            Ok(text) => text,
            Err(e @ MinimapError::InvalidIcon(IconError::NotRegistered(_))) => {
                format!("{}. Available icons: {}", e, self.ctx.marker_icon_names().join(", "))
            }
            Err(e) => {
                warn!("/minimap {} from {} failed: {}", args.trim(), id, e);
                e.to_string()
            }
        };
        self.reply(connection, &text);
    }

    /// Advance one tick.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        self.ctx.tick(&self.world);
    }
}

/// Run the tick loop until the process exits.
pub async fn run_game_loop(state: Arc<RwLock<GameState>>, tick_interval_ms: u64) {
    let start = Instant::now() + Duration::from_millis(tick_interval_ms);
    let mut ticker = interval_at(start, Duration::from_millis(tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    {
        let game = state.read().await;
        info!("Game loop started ({}ms ticks)", tick_interval_ms);
        debug!("Update interval: {} ticks", game.config.minimap.update_interval_ticks);
    }

    loop {
        let scheduled = ticker.tick().await;

        // Nothing to draw for nobody.
        {
            let game = state.read().await;
            if game.sessions.is_empty() {
                drop(game);
                sleep(Duration::from_millis((tick_interval_ms * 4).max(100))).await;
                continue;
            }
        }

        let mut skipped = 0u32;
        while ticker.tick().now_or_never().is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            debug!(
                "Skipped {} ticks to stay current (lag: {:?})",
                skipped,
                Instant::now().saturating_duration_since(scheduled)
            );
        }

        let mut game = state.write().await;
        let tick_start = std::time::Instant::now();
        game.tick();
        let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;

        let tick_budget = tick_interval_ms as f64 * 0.9;
        if tick_ms > tick_budget {
            let (hits, misses) = game.ctx.renderer().cache().stats();
            warn!(
                "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} sessions, cache {} hits / {} misses",
                game.tick_count,
                tick_ms,
                tick_budget,
                game.sessions.len(),
                hits,
                misses
            );
        }
    }
}
