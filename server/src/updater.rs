//! Per-tick advancement of every world object.
//!
//! The updater is driven by the tick loop: once per tick it receives a
//! read-only view of the object table to rebuild its per-map index and drain
//! finished paths, then gets handed each record in id order for exclusive
//! mutation. Attacks integrate their velocity and die on solid geometry;
//! creatures run the behavior state machine below.
//!
//! Creature behavior in short: an idle creature first looks for a cross-
//! faction target in range with line of sight (aggro), otherwise rolls a
//! loiter step every few seconds. Chasing is not a state of its own: a
//! creature chases exactly while it owns a path. Once its collider overlaps
//! the target's it swings, holds `MeleeAttack` for the animation, re-checks
//! overlap and either swings again or drops back to idle and re-paths.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{IVec2, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use realm_shared::pathfinding::has_line_of_sight;
use realm_shared::{
    colliders_intersect, AttackKind, FacingDirection, Faction, Navmap, ObjectId, ObjectKind,
    ObjectRecord, ObjectState, ProjectileKind, TileKind, AGGRO_RANGE, ATTACK_ANIM_SECS,
    LOITER_INTERVAL_SECS, MAP_WORLD_SCALE, REPATH_INTERVAL_SECS,
};

use crate::events::EventBus;
use crate::maps::{ConnectionDirection, MapRepository};
use crate::objects::ObjectTable;
use crate::path::{PathService, PathTask};

/// Chase bookkeeping for one creature. Erased when either side dies, the
/// creature loses interest, or melee concludes.
#[derive(Debug, Clone, Copy)]
pub struct NpcTargetLink {
    pub target: ObjectId,
    pub repath_timer_secs: f32,
}

/// Tick-loop-owned updater state: the per-map id index rebuilt each tick and
/// the creature target links that persist across ticks.
#[derive(Debug)]
pub struct ObjectUpdater {
    ids_per_map: HashMap<String, Vec<ObjectId>>,
    target_links: HashMap<ObjectId, NpcTargetLink>,
    rng: StdRng,
}

impl ObjectUpdater {
    pub fn new() -> Self {
        Self {
            ids_per_map: HashMap::new(),
            target_links: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            ids_per_map: HashMap::new(),
            target_links: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Rebuilds the per-map id index and installs finished paths. Runs once
    /// per tick before any object updates.
    pub fn pre_update_setup(&mut self, table: &ObjectTable, paths: &mut PathService) {
        self.ids_per_map.clear();
        for id in table.sorted_ids() {
            let record = table.get(id).expect("id came from the table");
            self.ids_per_map
                .entry(record.current_map.clone())
                .or_default()
                .push(id);
        }
        paths.drain_results();
    }

    pub fn target_link(&self, id: ObjectId) -> Option<&NpcTargetLink> {
        self.target_links.get(&id)
    }

    /// Drops every link owned by or pointing at a destroyed object.
    pub fn on_object_destroyed(&mut self, id: ObjectId) {
        self.target_links.remove(&id);
        self.target_links.retain(|_, link| link.target != id);
    }

    /// Advances one object by `dt_millis`. `table` is the read-only view of
    /// every *other* object; the tick loop takes the record out of the
    /// table for the duration of the call.
    pub fn update(
        &mut self,
        record: &mut ObjectRecord,
        table: &ObjectTable,
        maps: &MapRepository,
        paths: &mut PathService,
        bus: &mut EventBus,
        dt_millis: f32,
    ) {
        match record.kind {
            ObjectKind::Attack => self.update_attack(record, maps, bus, dt_millis),
            ObjectKind::Creature => self.update_creature(record, table, maps, paths, bus, dt_millis),
            ObjectKind::Player | ObjectKind::Static => {}
        }
    }

    fn update_attack(
        &mut self,
        record: &mut ObjectRecord,
        maps: &MapRepository,
        bus: &mut EventBus,
        dt_millis: f32,
    ) {
        record.position += record.velocity * dt_millis;

        // The navmap is only meaningful while the position is inside the
        // map's rectangle; past an edge the transition check below routes the
        // object to its neighbor instead.
        if record.attack_kind == AttackKind::Projectile
            && inside_map_bounds(record.position, maps, &record.current_map)
        {
            let meta = maps.meta(&record.current_map);
            let navmap = maps.navmap(&record.current_map);
            let tile = navmap.world_to_tile(record.position, meta.position, MAP_WORLD_SCALE);
            if navmap.tile_at(tile) == TileKind::Solid {
                bus.publish_collision(record.id, realm_shared::NO_OBJECT);
            }
        }

        check_map_transition(record, maps);
    }

    fn update_creature(
        &mut self,
        record: &mut ObjectRecord,
        table: &ObjectTable,
        maps: &MapRepository,
        paths: &mut PathService,
        bus: &mut EventBus,
        dt_millis: f32,
    ) {
        let meta = maps.meta(&record.current_map);
        let origin = meta.position;
        let navmap = Arc::clone(maps.navmap(&record.current_map));

        record.velocity = Vec3::ZERO;
        record.action_timer -= dt_millis / 1000.0;

        match record.state {
            ObjectState::Idle => {
                if paths.has_path(record.id) {
                    self.follow_path(record, table, maps, paths, bus, dt_millis);
                } else if let Some(target_id) =
                    self.find_valid_target(record, table, &navmap, origin, dt_millis)
                {
                    self.target_links.insert(
                        record.id,
                        NpcTargetLink {
                            target: target_id,
                            repath_timer_secs: REPATH_INTERVAL_SECS,
                        },
                    );
                    let target = table.get(target_id).expect("validated target is live");
                    record.facing = FacingDirection::from_vec(target.position - record.position);
                    bus.publish_aggro(record.id, target_id);
                    paths.request(PathTask {
                        requester: record.id,
                        start: record.position,
                        target: target.position,
                        map_origin: origin,
                        scale: MAP_WORLD_SCALE,
                        navmap,
                    });
                } else if record.action_timer <= 0.0 {
                    record.action_timer = LOITER_INTERVAL_SECS;
                    self.roll_loiter_step(record, &navmap, origin, paths);
                }
            }

            ObjectState::MeleeAttack => {
                if record.action_timer > 0.0 {
                    return; // swing animation still playing
                }
                match self.target_links.get(&record.id).copied() {
                    None => record.state = ObjectState::Idle,
                    Some(link) => match table.get(link.target) {
                        Some(target) if colliders_intersect(record, target) => {
                            bus.publish_npc_attack(
                                record.id,
                                AttackKind::Melee,
                                ProjectileKind::None,
                            );
                            record.action_timer = ATTACK_ANIM_SECS;
                        }
                        Some(target) => {
                            record.state = ObjectState::Idle;
                            paths.request(PathTask {
                                requester: record.id,
                                start: record.position,
                                target: target.position,
                                map_origin: origin,
                                scale: MAP_WORLD_SCALE,
                                navmap,
                            });
                        }
                        None => record.state = ObjectState::Idle,
                    },
                }
            }

            // Movement is represented by path ownership, not by a state.
            _ => record.state = ObjectState::Idle,
        }
    }

    /// Shared follow-path subroutine for any creature that owns a path.
    fn follow_path(
        &mut self,
        record: &mut ObjectRecord,
        table: &ObjectTable,
        maps: &MapRepository,
        paths: &mut PathService,
        bus: &mut EventBus,
        dt_millis: f32,
    ) {
        let path = paths.path_mut(record.id).expect("caller checked has_path");
        let waypoint = *path.front().expect("stored paths are never empty");

        let to_waypoint = waypoint - record.position;
        let distance = to_waypoint.length();
        let step = record.speed * dt_millis;

        if distance > step {
            record.velocity = to_waypoint.normalize() * step;
            record.position += record.velocity;
        } else {
            record.position = waypoint;
            record.velocity = Vec3::ZERO;
            path.pop_front();
            if path.is_empty() {
                paths.clear(record.id);
                record.state = ObjectState::Idle;
            }
        }
        record.facing = FacingDirection::from_vec(to_waypoint);

        if let Some(link) = self.target_links.get_mut(&record.id) {
            let target = table.get(link.target);
            let overlapping = target
                .map(|t| colliders_intersect(record, t))
                .unwrap_or(false);

            if record.action_timer <= 0.0 && overlapping {
                bus.publish_npc_attack(record.id, AttackKind::Melee, ProjectileKind::None);
                record.action_timer = ATTACK_ANIM_SECS;
                record.state = ObjectState::MeleeAttack;
                paths.clear(record.id);
            } else if let Some(target) = target {
                link.repath_timer_secs -= dt_millis / 1000.0;
                if link.repath_timer_secs <= 0.0 {
                    link.repath_timer_secs += REPATH_INTERVAL_SECS;
                    let meta = maps.meta(&record.current_map);
                    paths.request(PathTask {
                        requester: record.id,
                        start: record.position,
                        target: target.position,
                        map_origin: meta.position,
                        scale: MAP_WORLD_SCALE,
                        navmap: Arc::clone(maps.navmap(&record.current_map)),
                    });
                }
            }
        }

        // Paths are map-local.
        if check_map_transition(record, maps) {
            paths.clear(record.id);
        }
    }

    /// Picks a uniform random direction and, if the adjacent tile is
    /// walkable, wanders one tile that way.
    fn roll_loiter_step(
        &mut self,
        record: &mut ObjectRecord,
        navmap: &Navmap,
        origin: Vec2,
        paths: &mut PathService,
    ) {
        let direction = FacingDirection::ALL[self.rng.gen_range(0..FacingDirection::ALL.len())];
        let here = navmap.world_to_tile(record.position, origin, MAP_WORLD_SCALE);
        let (dc, dr) = direction.tile_step();
        let next = IVec2::new(here.x + dc, here.y + dr);

        if navmap.tile_at(next) == TileKind::Walkable {
            let target = navmap.tile_to_world(next, origin, MAP_WORLD_SCALE, record.position.z);
            paths.set_single_target(record.id, target);
            record.facing = direction;
        }
    }

    /// First live cross-faction object in range with line of sight, or none.
    fn find_valid_target(
        &self,
        record: &ObjectRecord,
        table: &ObjectTable,
        navmap: &Navmap,
        origin: Vec2,
        dt_millis: f32,
    ) -> Option<ObjectId> {
        if record.faction == Faction::Neutral {
            return None;
        }
        let ids = self.ids_per_map.get(&record.current_map)?;
        for &candidate_id in ids {
            if candidate_id == record.id {
                continue;
            }
            let Some(candidate) = table.get(candidate_id) else {
                continue;
            };
            if !matches!(candidate.kind, ObjectKind::Player | ObjectKind::Creature) {
                continue;
            }
            if candidate.faction == record.faction || candidate.faction == Faction::Neutral {
                continue;
            }
            let distance = record
                .position
                .truncate()
                .distance(candidate.position.truncate());
            if distance > AGGRO_RANGE {
                continue;
            }
            if !has_line_of_sight(
                record.position,
                candidate.position,
                origin,
                MAP_WORLD_SCALE,
                record.speed,
                dt_millis,
                navmap,
            ) {
                continue;
            }
            return Some(candidate_id);
        }
        None
    }
}

impl Default for ObjectUpdater {
    fn default() -> Self {
        Self::new()
    }
}

/// True while `position` lies inside the world rectangle of `map`.
fn inside_map_bounds(position: Vec3, maps: &MapRepository, map: &str) -> bool {
    let meta = maps.meta(map);
    let center = meta.position * MAP_WORLD_SCALE;
    let half = meta.dimensions * MAP_WORLD_SCALE / 2.0;
    (position.x - center.x).abs() <= half.x && (position.y - center.y).abs() <= half.y
}

/// Reassigns `current_map` when the object strictly crossed an edge that has
/// a neighbor. The position itself is never touched, since neighbor maps tile
/// contiguously in world space. Returns whether the map changed.
pub fn check_map_transition(record: &mut ObjectRecord, maps: &MapRepository) -> bool {
    let meta = maps.meta(&record.current_map);
    let center = meta.position * MAP_WORLD_SCALE;
    let half = meta.dimensions * MAP_WORLD_SCALE / 2.0;

    let crossed = if record.position.x > center.x + half.x {
        Some(ConnectionDirection::East)
    } else if record.position.x < center.x - half.x {
        Some(ConnectionDirection::West)
    } else if record.position.y > center.y + half.y {
        Some(ConnectionDirection::North)
    } else if record.position.y < center.y - half.y {
        Some(ConnectionDirection::South)
    } else {
        None
    };

    if let Some(direction) = crossed {
        if let Some(next) = meta.neighbor(direction) {
            if maps.contains(next) {
                record.current_map = next.to_string();
                return true;
            }
            log::warn!(
                "map {} names unloaded neighbor {}; keeping object {} in place",
                record.current_map,
                next,
                record.id
            );
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::test_repository;
    use assert_approx_eq::assert_approx_eq;
    use realm_shared::TILE_SIZE;
    use std::collections::HashMap as StdHashMap;

    const DT: f32 = 25.0;

    struct Harness {
        updater: ObjectUpdater,
        table: ObjectTable,
        maps: MapRepository,
        paths: PathService,
        bus: EventBus,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                updater: ObjectUpdater::with_seed(42),
                table: ObjectTable::new(),
                maps: test_repository(),
                paths: PathService::without_workers(),
                bus: EventBus::new(),
            }
        }

        fn creature_at_tile(&self, id: ObjectId, col: i32, row: i32) -> ObjectRecord {
            let navmap = self.maps.navmap("forest_1");
            let position = navmap.tile_to_world(
                IVec2::new(col, row),
                self.maps.meta("forest_1").position,
                MAP_WORLD_SCALE,
                0.0,
            );
            ObjectRecord::creature(id, position, "forest_1", "Grim".to_string())
        }

        fn update(&mut self, record: &mut ObjectRecord) {
            self.updater.pre_update_setup(&self.table, &mut self.paths);
            self.updater.update(
                record,
                &self.table,
                &self.maps,
                &mut self.paths,
                &mut self.bus,
                DT,
            );
        }
    }

    #[test]
    fn test_attack_integrates_velocity() {
        let mut h = Harness::new();
        let mut attack = ObjectRecord::player(9, Vec3::ZERO, "forest_1");
        attack.kind = ObjectKind::Attack;
        attack.attack_kind = AttackKind::Melee;
        attack.velocity = Vec3::new(0.001, 0.0, 0.0);

        h.update(&mut attack);
        assert_approx_eq!(attack.position.x, 0.001 * DT, 1e-6);
    }

    #[test]
    fn test_projectile_publishes_collision_on_solid() {
        let mut h = Harness::new();
        // A repository whose forest_1 is entirely solid.
        let mut metas = StdHashMap::new();
        metas.insert(
            "forest_1".to_string(),
            crate::maps::MapMeta {
                position: Vec2::ZERO,
                dimensions: Vec2::new(8.0, 8.0),
                connections: [None, None, None, None],
            },
        );
        let mut navmaps = StdHashMap::new();
        navmaps.insert(
            "forest_1".to_string(),
            Arc::new(Navmap::from_fn(|_, _| TileKind::Solid)),
        );
        h.maps = MapRepository::from_parts(metas, navmaps);

        let mut projectile = ObjectRecord::player(9, Vec3::ZERO, "forest_1");
        projectile.kind = ObjectKind::Attack;
        projectile.attack_kind = AttackKind::Projectile;

        h.update(&mut projectile);

        let collisions: Vec<_> = h.bus.drain_collisions().collect();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].lhs, 9);
        assert_eq!(collisions[0].rhs, realm_shared::NO_OBJECT);
    }

    #[test]
    fn test_projectile_crosses_north_edge_without_collision() {
        let mut h = Harness::new();
        let mut projectile = ObjectRecord::player(9, Vec3::new(0.0, 4.0 + 0.01, 0.0), "forest_1");
        projectile.kind = ObjectKind::Attack;
        projectile.attack_kind = AttackKind::Projectile;

        let before = projectile.position;
        h.update(&mut projectile);

        assert_eq!(projectile.current_map, "forest_2");
        assert_eq!(projectile.position, before); // no teleport
        assert_eq!(h.bus.drain_collisions().count(), 0);
    }

    #[test]
    fn test_edge_equality_stays_on_current_map() {
        let h = Harness::new();
        let mut record = ObjectRecord::player(1, Vec3::new(0.0, 4.0, 0.0), "forest_1");
        let mut record_east = ObjectRecord::player(2, Vec3::new(4.0, 0.0, 0.0), "forest_1");

        assert!(!check_map_transition(&mut record, &h.maps));
        assert_eq!(record.current_map, "forest_1");
        assert!(!check_map_transition(&mut record_east, &h.maps));
    }

    #[test]
    fn test_crossing_unconnected_edge_keeps_map() {
        let h = Harness::new();
        let mut record = ObjectRecord::player(1, Vec3::new(4.5, 0.0, 0.0), "forest_1");
        assert!(!check_map_transition(&mut record, &h.maps));
        assert_eq!(record.current_map, "forest_1");
    }

    #[test]
    fn test_idle_creature_with_timer_does_not_move() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 3.0;
        let before = creature.position;

        h.update(&mut creature);

        assert_eq!(creature.velocity, Vec3::ZERO);
        assert_eq!(creature.position, before);
        assert!(!h.paths.has_path(1));
        assert_eq!(h.bus.drain_aggro().count(), 0);
    }

    #[test]
    fn test_expired_timer_rolls_loiter_step() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 0.0; // exactly zero reads as expired

        h.update(&mut creature);

        assert_approx_eq!(creature.action_timer, LOITER_INTERVAL_SECS, 1e-6);
        // Open navmap: every adjacent tile is walkable, so a one-waypoint
        // path must have been installed.
        let path = h.paths.waypoints(1).expect("loiter path installed");
        assert_eq!(path.len(), 1);
        let target_tile = h.maps.navmap("forest_1").world_to_tile(
            path[0],
            h.maps.meta("forest_1").position,
            MAP_WORLD_SCALE,
        );
        let here = IVec2::new(64, 64);
        assert!((target_tile.x - here.x).abs() <= 1);
        assert!((target_tile.y - here.y).abs() <= 1);
        assert_ne!(target_tile, here);
    }

    #[test]
    fn test_creature_acquires_target_in_range() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        let player_pos = creature.position + Vec3::new(TILE_SIZE * 2.0, 0.0, 0.0);
        h.table.insert(ObjectRecord::player(2, player_pos, "forest_1"));

        h.update(&mut creature);

        let aggro: Vec<_> = h.bus.drain_aggro().collect();
        assert_eq!(aggro.len(), 1);
        assert_eq!(aggro[0].attacker, 1);
        assert_eq!(aggro[0].target, 2);
        assert_eq!(creature.facing, FacingDirection::East);

        let link = h.updater.target_link(1).expect("link created");
        assert_eq!(link.target, 2);
        assert_approx_eq!(link.repath_timer_secs, REPATH_INTERVAL_SECS, 1e-6);
        assert_eq!(h.paths.pending_tasks(), 1);
    }

    #[test]
    fn test_target_beyond_aggro_range_is_ignored() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 1.0;
        let far = creature.position + Vec3::new(AGGRO_RANGE * 2.0, 0.0, 0.0);
        h.table.insert(ObjectRecord::player(2, far, "forest_1"));

        h.update(&mut creature);
        assert_eq!(h.bus.drain_aggro().count(), 0);
        assert!(h.updater.target_link(1).is_none());
    }

    #[test]
    fn test_same_faction_and_neutral_are_ignored() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 1.0;

        let mut ally = ObjectRecord::creature(
            2,
            creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0),
            "forest_1",
            "Khol".to_string(),
        );
        ally.faction = Faction::Evil;
        h.table.insert(ally);

        let mut bystander = ObjectRecord::player(
            3,
            creature.position + Vec3::new(0.0, TILE_SIZE, 0.0),
            "forest_1",
        );
        bystander.faction = Faction::Neutral;
        h.table.insert(bystander);

        h.update(&mut creature);
        assert_eq!(h.bus.drain_aggro().count(), 0);
    }

    #[test]
    fn test_neutral_creature_never_aggros() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.faction = Faction::Neutral;
        creature.action_timer = 1.0;
        h.table.insert(ObjectRecord::player(
            2,
            creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0),
            "forest_1",
        ));

        h.update(&mut creature);
        assert_eq!(h.bus.drain_aggro().count(), 0);
    }

    #[test]
    fn test_wall_blocks_target_acquisition() {
        let mut h = Harness::new();
        // Solid column between creature (col 60) and player (col 68).
        let mut metas = StdHashMap::new();
        metas.insert(
            "forest_1".to_string(),
            crate::maps::MapMeta {
                position: Vec2::ZERO,
                dimensions: Vec2::new(8.0, 8.0),
                connections: [None, None, None, None],
            },
        );
        let mut navmaps = StdHashMap::new();
        navmaps.insert(
            "forest_1".to_string(),
            Arc::new(Navmap::from_fn(|col, _| {
                if col == 64 {
                    TileKind::Solid
                } else {
                    TileKind::Walkable
                }
            })),
        );
        h.maps = MapRepository::from_parts(metas, navmaps);

        let mut creature = h.creature_at_tile(1, 62, 64);
        creature.action_timer = 1.0;
        let navmap = h.maps.navmap("forest_1");
        let player_pos = navmap.tile_to_world(IVec2::new(65, 64), Vec2::ZERO, MAP_WORLD_SCALE, 0.0);
        h.table.insert(ObjectRecord::player(2, player_pos, "forest_1"));

        h.update(&mut creature);
        assert_eq!(h.bus.drain_aggro().count(), 0);
    }

    #[test]
    fn test_follow_path_moves_toward_waypoint() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 1.0;
        let target = creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0);
        h.paths.set_single_target(1, target);

        let before = creature.position;
        h.update(&mut creature);

        assert!(creature.position.x > before.x);
        assert!(creature.velocity.length() > 0.0);
        assert_eq!(creature.facing, FacingDirection::East);
        assert_approx_eq!(
            creature.velocity.length(),
            creature.speed * DT,
            1e-6
        );
    }

    #[test]
    fn test_follow_path_snaps_and_finishes() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 1.0;
        let target = creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0);
        h.paths.set_single_target(1, target);

        // One tile at creature speed takes ~17 ticks; run plenty.
        for _ in 0..40 {
            h.update(&mut creature);
            creature.action_timer = 1.0; // hold the loiter roll off
        }

        assert_approx_eq!(creature.position.x, target.x, 1e-5);
        assert_eq!(creature.velocity, Vec3::ZERO);
        assert!(!h.paths.has_path(1));
        assert_eq!(creature.state, ObjectState::Idle);
    }

    #[test]
    fn test_chase_engages_melee_on_overlap() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 0.0;

        // Target overlapping the creature, with a stale path still present.
        let player = ObjectRecord::player(
            2,
            creature.position + Vec3::new(TILE_SIZE * 0.2, 0.0, 0.0),
            "forest_1",
        );
        h.table.insert(player.clone());
        h.updater.target_links.insert(
            1,
            NpcTargetLink {
                target: 2,
                repath_timer_secs: REPATH_INTERVAL_SECS,
            },
        );
        h.paths
            .set_single_target(1, creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0));

        h.update(&mut creature);

        let attacks: Vec<_> = h.bus.drain_npc_attacks().collect();
        assert_eq!(attacks.len(), 1);
        assert_eq!(attacks[0].attacker, 1);
        assert_eq!(attacks[0].attack_kind, AttackKind::Melee);
        assert_eq!(creature.state, ObjectState::MeleeAttack);
        assert_approx_eq!(creature.action_timer, ATTACK_ANIM_SECS, 1e-5);
        assert!(!h.paths.has_path(1));
    }

    #[test]
    fn test_chase_repaths_on_interval() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.action_timer = 5.0; // never swings during this test

        // Distant target, link about to expire.
        let player = ObjectRecord::player(
            2,
            creature.position + Vec3::new(TILE_SIZE * 3.0, 0.0, 0.0),
            "forest_1",
        );
        h.table.insert(player);
        h.updater.target_links.insert(
            1,
            NpcTargetLink {
                target: 2,
                repath_timer_secs: 0.01,
            },
        );
        h.paths
            .set_single_target(1, creature.position + Vec3::new(TILE_SIZE, 0.0, 0.0));

        h.update(&mut creature);

        assert_eq!(h.paths.pending_tasks(), 1);
        let link = h.updater.target_link(1).unwrap();
        assert!(link.repath_timer_secs > 0.0);
    }

    #[test]
    fn test_melee_state_waits_for_animation() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.state = ObjectState::MeleeAttack;
        creature.action_timer = 0.4;

        h.update(&mut creature);
        assert_eq!(creature.state, ObjectState::MeleeAttack);
        assert_eq!(h.bus.drain_npc_attacks().count(), 0);
    }

    #[test]
    fn test_melee_without_link_returns_to_idle() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.state = ObjectState::MeleeAttack;
        creature.action_timer = 0.0;

        h.update(&mut creature);
        assert_eq!(creature.state, ObjectState::Idle);
    }

    #[test]
    fn test_melee_swings_again_while_overlapping() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.state = ObjectState::MeleeAttack;
        creature.action_timer = 0.0;

        let player = ObjectRecord::player(
            2,
            creature.position + Vec3::new(TILE_SIZE * 0.2, 0.0, 0.0),
            "forest_1",
        );
        h.table.insert(player);
        h.updater.target_links.insert(
            1,
            NpcTargetLink {
                target: 2,
                repath_timer_secs: REPATH_INTERVAL_SECS,
            },
        );

        h.update(&mut creature);

        assert_eq!(creature.state, ObjectState::MeleeAttack);
        assert_approx_eq!(creature.action_timer, ATTACK_ANIM_SECS, 1e-5);
        assert_eq!(h.bus.drain_npc_attacks().count(), 1);
    }

    #[test]
    fn test_melee_target_escape_requests_fresh_path() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.state = ObjectState::MeleeAttack;
        creature.action_timer = 0.0;

        let player = ObjectRecord::player(
            2,
            creature.position + Vec3::new(TILE_SIZE * 3.0, 0.0, 0.0),
            "forest_1",
        );
        h.table.insert(player);
        h.updater.target_links.insert(
            1,
            NpcTargetLink {
                target: 2,
                repath_timer_secs: REPATH_INTERVAL_SECS,
            },
        );

        h.update(&mut creature);

        assert_eq!(creature.state, ObjectState::Idle);
        assert_eq!(h.paths.pending_tasks(), 1);
        assert_eq!(h.bus.drain_npc_attacks().count(), 0);
    }

    #[test]
    fn test_running_state_collapses_to_idle() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 64);
        creature.state = ObjectState::Running;
        creature.action_timer = 1.0;

        h.update(&mut creature);
        assert_eq!(creature.state, ObjectState::Idle);
    }

    #[test]
    fn test_map_change_clears_path() {
        let mut h = Harness::new();
        let mut creature = h.creature_at_tile(1, 64, 0);
        creature.action_timer = 1.0;
        // Waypoint past the north edge, one step away from the creature.
        creature.position.y = 4.0 - 0.0001;
        let beyond = Vec3::new(creature.position.x, 4.0 + 0.001, 0.0);
        h.paths.set_single_target(1, beyond);

        for _ in 0..10 {
            h.update(&mut creature);
            creature.action_timer = 1.0;
            if creature.current_map == "forest_2" {
                break;
            }
        }

        assert_eq!(creature.current_map, "forest_2");
        assert!(!h.paths.has_path(1));
    }

    #[test]
    fn test_destroyed_object_drops_links_both_ways() {
        let mut updater = ObjectUpdater::with_seed(1);
        updater.target_links.insert(
            1,
            NpcTargetLink {
                target: 2,
                repath_timer_secs: 0.05,
            },
        );
        updater.target_links.insert(
            3,
            NpcTargetLink {
                target: 1,
                repath_timer_secs: 0.05,
            },
        );

        updater.on_object_destroyed(1);
        assert!(updater.target_link(1).is_none());
        assert!(updater.target_link(3).is_none());
    }
}
