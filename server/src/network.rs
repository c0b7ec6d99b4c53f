//! Server orchestration: message handling and the fixed-rate tick loop.
//!
//! A single task owns every piece of simulation state and alternates between
//! two wakeup sources: decoded envelopes arriving from the transport, and the
//! 40 Hz tick timer. Each tick runs the same ordered pipeline: clear the
//! per-map quadtrees, rebuild the updater's index and drain finished paths,
//! advance every object and re-insert it into its map's quadtree, route
//! events, promote charged attacks, expire spent ones, then broadcast a full
//! state snapshot on the unreliable channel and flush reliable retransmits.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::interval;

use realm_shared::{
    AttackKind, Envelope, Frame, Message, ObjectId, ObjectRecord, TileKind,
    LOITER_INTERVAL_SECS, MAP_WORLD_SCALE, NAVMAP_SIZE, NO_OBJECT, STARTING_MAP, TILE_SIZE,
};

use crate::combat::AttackPipeline;
use crate::events::EventBus;
use crate::maps::MapRepository;
use crate::namegen;
use crate::objects::ObjectTable;
use crate::path::PathService;
use crate::transport::{PeerTable, Transport};
use crate::updater::ObjectUpdater;

/// Knobs surfaced on the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_hz: u32,
    pub max_peers: usize,
    pub path_workers: usize,
    pub creatures_per_map: usize,
}

/// The authoritative server. All fields are owned by the tick-loop task.
pub struct Server {
    maps: MapRepository,
    objects: ObjectTable,
    updater: ObjectUpdater,
    paths: PathService,
    combat: AttackPipeline,
    bus: EventBus,
    peers: PeerTable,
    transport: Transport,
    inbound_rx: mpsc::UnboundedReceiver<(SocketAddr, Envelope)>,
    next_object_id: ObjectId,
    tick_duration: Duration,
    tick_count: u64,
    rng: StdRng,
}

impl Server {
    /// Binds the transport and seeds the world with creatures.
    pub async fn new(
        config: ServerConfig,
        maps: MapRepository,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (transport, inbound_rx) = Transport::bind(&config.bind_addr).await?;

        let mut server = Server {
            maps,
            objects: ObjectTable::new(),
            updater: ObjectUpdater::new(),
            paths: PathService::new(config.path_workers),
            combat: AttackPipeline::new(),
            bus: EventBus::new(),
            peers: PeerTable::new(config.max_peers),
            transport,
            inbound_rx,
            next_object_id: 1,
            tick_duration: Duration::from_secs_f64(1.0 / config.tick_hz as f64),
            tick_count: 0,
            rng: StdRng::from_entropy(),
        };
        server.seed_creatures(config.creatures_per_map);
        Ok(server)
    }

    /// Main loop: handle envelopes as they arrive, advance the world on
    /// every tick.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut ticker = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!(
            "server running at {} Hz with {} maps",
            (1.0 / self.tick_duration.as_secs_f64()).round(),
            self.maps.map_names().count()
        );

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => {
                    match inbound {
                        Some((addr, envelope)) => self.handle_envelope(addr, envelope),
                        None => {
                            info!("transport closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt_millis = now.duration_since(last_tick).as_secs_f32() * 1000.0;
                    last_tick = now;
                    self.tick(dt_millis);
                }
            }
        }

        Ok(())
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    /// Places a handful of creatures on random walkable tiles of every map.
    fn seed_creatures(&mut self, per_map: usize) {
        let mut map_names: Vec<String> = self.maps.map_names().map(str::to_string).collect();
        map_names.sort_unstable();

        for map in &map_names {
            let navmap = std::sync::Arc::clone(self.maps.navmap(map));
            let origin = self.maps.meta(map).position;
            let mut placed = 0;
            let mut attempts = 0;

            while placed < per_map && attempts < per_map * 100 {
                attempts += 1;
                let col = self.rng.gen_range(0..NAVMAP_SIZE as i32);
                let row = self.rng.gen_range(0..NAVMAP_SIZE as i32);
                let tile = glam::IVec2::new(col, row);
                if navmap.tile_at(tile) != TileKind::Walkable {
                    continue;
                }
                let position = navmap.tile_to_world(tile, origin, MAP_WORLD_SCALE, 0.0);
                let id = self.allocate_id();
                let mut record =
                    ObjectRecord::creature(id, position, map, namegen::creature_name(&mut self.rng));
                // Stagger first decisions so the pack does not move in lockstep.
                record.action_timer = self.rng.gen_range(0.0..LOITER_INTERVAL_SECS);
                self.objects.insert(record);
                placed += 1;
            }

            if placed < per_map {
                warn!("map {} only fit {}/{} creatures", map, placed, per_map);
            }
        }
        info!("seeded {} creatures", self.objects.len());
    }

    /// Transport-facing entry: reliability bookkeeping, then dispatch.
    fn handle_envelope(&mut self, addr: SocketAddr, envelope: Envelope) {
        let message = match envelope.frame {
            Frame::Ack { seq } => {
                self.peers.handle_ack(addr, seq);
                return;
            }
            Frame::Payload(message) => message,
        };

        // Admission happens before reliability bookkeeping: a Connect from a
        // stranger is the one message that may create the peer entry.
        if !self.peers.contains(addr) {
            match &message {
                Message::Connect { .. } => {
                    if !self.peers.register(addr) {
                        warn!("rejecting {}: server full", addr);
                        return;
                    }
                }
                _ => {
                    debug!("dropping message from unknown peer {}", addr);
                    return;
                }
            }
        }

        if envelope.channel == realm_shared::Channel::Reliable {
            let (fresh, ack) = self.peers.accept_reliable(addr, envelope.seq);
            if let Some(ack) = ack {
                self.transport.send(ack);
            }
            if !fresh {
                return; // duplicate of an already-delivered envelope
            }
        }

        self.handle_message(addr, message);
    }

    /// Dispatches one fresh payload. Runs on the tick-loop task only.
    fn handle_message(&mut self, addr: SocketAddr, message: Message) {
        match message {
            Message::Connect { client_version } => self.handle_connect(addr, client_version),
            Message::Disconnect => self.handle_disconnect(addr),
            Message::ObjectStateUpdate { record } => self.handle_state_update(addr, record),
            Message::BeginAttackRequest {
                attacker_id,
                attack_kind,
                projectile_kind,
            } => self.handle_begin_attack(addr, attacker_id, attack_kind, projectile_kind),
            Message::CancelAttack { attacker_id } => self.handle_cancel_attack(addr, attacker_id),
            Message::DebugQuadtreeRequest => self.handle_debug_quadtree(addr),
            Message::DebugObjectPathRequest { object_id } => {
                self.handle_debug_path(addr, object_id)
            }
            other => {
                warn!("unexpected server-bound message from {}: {:?}", addr, other);
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, client_version: u16) {
        if let Some(existing) = self.peers.bound_object(addr) {
            if existing != NO_OBJECT {
                debug!("peer {} re-sent connect; avatar {} kept", addr, existing);
                return;
            }
        }
        info!("peer {} connecting (client version {})", addr, client_version);

        let id = self.allocate_id();
        let spawn = self.random_spawn_position();
        let record = ObjectRecord::player(id, spawn, STARTING_MAP);

        self.objects.insert(record.clone());
        self.peers.bind_object(addr, id);

        // The newcomer learns its own id first, then the world it joined.
        if let Some(datagram) = self
            .peers
            .send_reliable(addr, &Message::PlayerConnected { id })
        {
            self.transport.send(datagram);
        }
        for other in self.objects.sorted_ids() {
            if other == id {
                continue;
            }
            let existing = self.objects.get(other).expect("id from table").clone();
            if let Some(datagram) = self
                .peers
                .send_reliable(addr, &Message::ObjectCreated { record: existing })
            {
                self.transport.send(datagram);
            }
        }
        let created = self.peers.broadcast_reliable(&Message::ObjectCreated { record });
        self.transport.send_all(created);
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        let Some(peer) = self.peers.remove(addr) else {
            return;
        };
        info!("peer {} disconnected", addr);
        if peer.bound_object == NO_OBJECT {
            return;
        }

        // Charging attacks die with their owner.
        self.combat.cancel_for(peer.bound_object);
        self.objects.remove(peer.bound_object, &mut self.bus);

        let gone = self.peers.broadcast_reliable(&Message::PlayerDisconnected {
            id: peer.bound_object,
        });
        self.transport.send_all(gone);
    }

    fn handle_state_update(&mut self, addr: SocketAddr, record: ObjectRecord) {
        let bound = self.peers.bound_object(addr).unwrap_or(NO_OBJECT);
        // The one ownership rule of the protocol: a peer only ever authors
        // its own avatar.
        if bound == NO_OBJECT || record.id != bound {
            warn!(
                "peer {} authored id {} but owns {}; dropping update",
                addr, record.id, bound
            );
            return;
        }
        if !self.objects.contains(record.id) {
            debug!("state update for missing object {}", record.id);
            return;
        }
        self.objects.insert(record);
    }

    fn handle_begin_attack(
        &mut self,
        addr: SocketAddr,
        attacker_id: ObjectId,
        attack_kind: AttackKind,
        projectile_kind: realm_shared::ProjectileKind,
    ) {
        let bound = self.peers.bound_object(addr).unwrap_or(NO_OBJECT);
        let admission = if bound != NO_OBJECT && attacker_id == bound {
            match self.objects.get(attacker_id) {
                Some(attacker) => {
                    let attacker = attacker.clone();
                    let attack_object_id = self.allocate_id();
                    self.combat
                        .begin_attack(attack_object_id, &attacker, attack_kind)
                }
                None => crate::combat::AttackAdmission {
                    allowed: false,
                    charge_duration_secs: 0.0,
                },
            }
        } else {
            warn!(
                "peer {} requested attack for {} but owns {}",
                addr, attacker_id, bound
            );
            crate::combat::AttackAdmission {
                allowed: false,
                charge_duration_secs: 0.0,
            }
        };

        if let Some(datagram) = self.peers.send_reliable(
            addr,
            &Message::BeginAttackResponse {
                attacker_id,
                allowed: admission.allowed,
                attack_kind,
                projectile_kind,
                charge_duration_secs: admission.charge_duration_secs,
            },
        ) {
            self.transport.send(datagram);
        }
    }

    fn handle_cancel_attack(&mut self, addr: SocketAddr, attacker_id: ObjectId) {
        let bound = self.peers.bound_object(addr).unwrap_or(NO_OBJECT);
        if bound == NO_OBJECT || attacker_id != bound {
            warn!(
                "peer {} tried to cancel attacks of {} but owns {}",
                addr, attacker_id, bound
            );
            return;
        }
        self.combat.cancel_for(attacker_id);
    }

    fn handle_debug_quadtree(&mut self, addr: SocketAddr) {
        let bound = self.peers.bound_object(addr).unwrap_or(NO_OBJECT);
        let Some(player) = self.objects.get(bound) else {
            return;
        };
        let rects = self.maps.quadtree(&player.current_map).debug_rects();
        if let Some(datagram) = self
            .peers
            .send_reliable(addr, &Message::DebugQuadtreeResponse { rects })
        {
            self.transport.send(datagram);
        }
    }

    fn handle_debug_path(&mut self, addr: SocketAddr, object_id: ObjectId) {
        let waypoints = self
            .paths
            .waypoints(object_id)
            .map(|path| path.iter().copied().collect())
            .unwrap_or_default();
        if let Some(datagram) = self.peers.send_unreliable(
            addr,
            &Message::DebugObjectPathResponse {
                object_id,
                waypoints,
            },
        ) {
            self.transport.send(datagram);
        }
    }

    /// One simulation step of `dt_millis`.
    pub fn tick(&mut self, dt_millis: f32) {
        self.tick_count += 1;

        // Removals since the last tick (disconnects) release sidecar state
        // before anything runs this tick.
        self.route_destroyed();

        self.maps.clear_quadtrees();
        self.updater.pre_update_setup(&self.objects, &mut self.paths);

        for id in self.objects.sorted_ids() {
            let Some(mut record) = self.objects.take(id) else {
                continue;
            };
            self.updater.update(
                &mut record,
                &self.objects,
                &self.maps,
                &mut self.paths,
                &mut self.bus,
                dt_millis,
            );
            let extents = record.collider.dimensions * record.scale / 2.0;
            self.maps
                .quadtree_mut(&record.current_map)
                .insert(id, record.position, extents);
            self.objects.insert(record);
        }

        self.route_events();

        // Charged attacks enter the world.
        let promoted = self.combat.tick_pending(dt_millis, &self.objects);
        for record in promoted {
            debug!("attack {} of {} goes live", record.id, record.parent_id);
            self.objects.insert(record.clone());
            let created = self.peers.broadcast_reliable(&Message::ObjectCreated { record });
            self.transport.send_all(created);
        }

        // Spent attacks leave it.
        let expired = self.combat.tick_ttl(dt_millis, &self.objects);
        for id in expired {
            self.objects.remove(id, &mut self.bus);
            let destroyed = self.peers.broadcast_reliable(&Message::ObjectDestroyed { id });
            self.transport.send_all(destroyed);
        }
        self.route_destroyed();

        // Full snapshot, once per object per tick, unreliable.
        for id in self.objects.sorted_ids() {
            let record = self.objects.get(id).expect("id from table").clone();
            let snapshot = self
                .peers
                .broadcast_unreliable(&Message::ObjectStateUpdate { record });
            self.transport.send_all(snapshot);
        }

        // Reliable-channel upkeep; unresponsive peers disconnect here.
        let (resends, dead) = self.peers.flush_retransmits();
        self.transport.send_all(resends);
        for addr in dead {
            self.handle_disconnect(addr);
        }

        if self.tick_count % 200 == 0 {
            debug!(
                "tick {}: {} objects, {} peers, {} pending paths",
                self.tick_count,
                self.objects.len(),
                self.peers.len(),
                self.paths.pending_tasks()
            );
        }
    }

    /// Routes update-phase events to the components that consume them.
    fn route_events(&mut self) {
        let collisions: Vec<_> = self.bus.drain_collisions().collect();
        for collision in collisions {
            if collision.rhs == NO_OBJECT {
                // Struck world geometry: removed on the expiry pass below.
                self.combat.set_ttl(collision.lhs, 0.0);
            }
        }

        let aggro: Vec<_> = self.bus.drain_aggro().collect();
        for event in aggro {
            debug!("creature {} aggroed object {}", event.attacker, event.target);
        }

        let swings: Vec<_> = self.bus.drain_npc_attacks().collect();
        for swing in swings {
            let Some(attacker) = self.objects.get(swing.attacker) else {
                continue;
            };
            let attacker = attacker.clone();
            let attack_object_id = self.allocate_id();
            let admission =
                self.combat
                    .begin_attack(attack_object_id, &attacker, swing.attack_kind);
            if !admission.allowed {
                debug!(
                    "creature {} swing of {:?} refused",
                    swing.attacker, swing.attack_kind
                );
            }
        }
    }

    /// Releases every sidecar entry of objects that died since the last
    /// drain.
    fn route_destroyed(&mut self) {
        let destroyed: Vec<_> = self.bus.drain_destroyed().collect();
        for event in destroyed {
            self.paths.on_object_destroyed(event.id);
            self.updater.on_object_destroyed(event.id);
            self.combat.on_object_destroyed(event.id);
        }
    }

    /// Spawn point on the starting map: its center plus up to a tile of
    /// jitter in each axis.
    fn random_spawn_position(&mut self) -> Vec3 {
        let center = self.maps.world_center(STARTING_MAP);
        let jitter_x = self.rng.gen_range(-TILE_SIZE..TILE_SIZE);
        let jitter_y = self.rng.gen_range(-TILE_SIZE..TILE_SIZE);
        center + Vec3::new(jitter_x, jitter_y, 0.0)
    }

    #[cfg(test)]
    pub(crate) fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    #[cfg(test)]
    pub(crate) fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    #[cfg(test)]
    pub(crate) fn peers_mut(&mut self) -> &mut PeerTable {
        &mut self.peers
    }

    #[cfg(test)]
    pub(crate) fn combat(&self) -> &AttackPipeline {
        &self.combat
    }

    #[cfg(test)]
    pub(crate) fn dispatch_for_tests(&mut self, addr: SocketAddr, message: Message) {
        self.handle_message(addr, message);
    }

    #[cfg(test)]
    pub(crate) fn maps_ref(&self) -> &MapRepository {
        &self.maps
    }
}
