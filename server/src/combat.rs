//! Attack lifecycle: charge, spawn, expire, cancel.
//!
//! Two sidecar tables keyed by object id, both owned by the tick loop. An
//! accepted attack first lives in `pending` while its charge timer counts
//! down; during that window it is invisible to the world and the attacker can
//! still cancel it. Once the charge elapses the record is promoted into the
//! object table and its pre-registered TTL starts counting; expiry removes
//! the object again.

use std::collections::HashMap;

use glam::{Vec2, Vec3};
use log::debug;

use realm_shared::{
    AttackKind, Collider, FacingDirection, ObjectId, ObjectKind, ObjectRecord, ObjectState,
    ProjectileKind, FAST_MELEE_CHARGE_SECS, FAST_MELEE_SLASH_SECS, TILE_SIZE,
};

use crate::objects::ObjectTable;

/// Reply data for a begin-attack request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackAdmission {
    pub allowed: bool,
    pub charge_duration_secs: f32,
}

impl AttackAdmission {
    fn refused() -> Self {
        Self {
            allowed: false,
            charge_duration_secs: 0.0,
        }
    }
}

#[derive(Debug)]
struct PendingAttack {
    record: ObjectRecord,
    charge_remaining_secs: f32,
}

/// Pending-spawn and time-to-live bookkeeping for transient attack objects.
#[derive(Debug, Default)]
pub struct AttackPipeline {
    pending: HashMap<ObjectId, PendingAttack>,
    ttl: HashMap<ObjectId, f32>,
}

/// Spawn offset from the attacker for each facing, in tile sizes.
fn melee_offset(facing: FacingDirection) -> Vec2 {
    match facing {
        FacingDirection::North => Vec2::new(0.0, 0.8),
        FacingDirection::South => Vec2::new(0.0, -0.8),
        FacingDirection::East => Vec2::new(0.5, 0.0),
        FacingDirection::West => Vec2::new(-0.5, 0.0),
        FacingDirection::NorthEast => Vec2::new(0.3, 0.6),
        FacingDirection::NorthWest => Vec2::new(-0.3, 0.6),
        FacingDirection::SouthEast => Vec2::new(0.3, -0.6),
        FacingDirection::SouthWest => Vec2::new(-0.3, -0.6),
    }
}

impl AttackPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits or refuses an attack request on behalf of `attacker`. The
    /// caller supplies the id for the new attack object; on refusal the id
    /// stays unused.
    pub fn begin_attack(
        &mut self,
        attack_id: ObjectId,
        attacker: &ObjectRecord,
        attack_kind: AttackKind,
    ) -> AttackAdmission {
        if attack_kind != AttackKind::Melee {
            return AttackAdmission::refused();
        }

        let offset = melee_offset(attacker.facing) * TILE_SIZE;
        let record = ObjectRecord {
            id: attack_id,
            parent_id: attacker.id,
            kind: ObjectKind::Attack,
            attack_kind: AttackKind::Melee,
            projectile_kind: ProjectileKind::None,
            position: attacker.position + Vec3::new(offset.x, offset.y, 0.0),
            velocity: Vec3::ZERO,
            current_map: attacker.current_map.clone(),
            facing: attacker.facing,
            state: ObjectState::Idle,
            faction: attacker.faction,
            speed: 0.0,
            scale: attacker.scale,
            collider: Collider::rect(TILE_SIZE, TILE_SIZE),
            action_timer: 0.0,
            name: String::new(),
        };

        self.pending.insert(
            attack_id,
            PendingAttack {
                record,
                charge_remaining_secs: FAST_MELEE_CHARGE_SECS,
            },
        );
        // TTL registered now, counted only once the object is live.
        self.ttl.insert(attack_id, FAST_MELEE_SLASH_SECS);

        AttackAdmission {
            allowed: true,
            charge_duration_secs: FAST_MELEE_CHARGE_SECS,
        }
    }

    /// Drops every still-charging attack owned by `attacker`, together with
    /// its TTL entry. Attacks already promoted into the world are not
    /// cancelable.
    pub fn cancel_for(&mut self, attacker: ObjectId) {
        let cancelled: Vec<ObjectId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.record.parent_id == attacker)
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            self.pending.remove(&id);
            self.ttl.remove(&id);
            debug!("cancelled pending attack {} of attacker {}", id, attacker);
        }
    }

    /// Overrides the remaining lifetime of a live object. Used to destroy
    /// projectiles that hit world geometry on the next expiry pass.
    pub fn set_ttl(&mut self, id: ObjectId, secs: f32) {
        self.ttl.insert(id, secs);
    }

    pub fn is_pending(&self, id: ObjectId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Counts down charge timers and returns the records whose charge
    /// elapsed this tick, in id order. Entries whose attacker already left
    /// the world are discarded silently (their TTL entry goes with them).
    pub fn tick_pending(&mut self, dt_millis: f32, table: &ObjectTable) -> Vec<ObjectRecord> {
        let dt_secs = dt_millis / 1000.0;
        let mut ready: Vec<ObjectId> = Vec::new();
        for (id, pending) in self.pending.iter_mut() {
            pending.charge_remaining_secs -= dt_secs;
            if pending.charge_remaining_secs <= 0.0 {
                ready.push(*id);
            }
        }
        ready.sort_unstable();

        let mut promoted = Vec::new();
        for id in ready {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            if table.contains(pending.record.parent_id) {
                promoted.push(pending.record);
            } else {
                self.ttl.remove(&id);
                debug!("discarding orphaned pending attack {}", id);
            }
        }
        promoted
    }

    /// Counts down TTLs of live objects and returns the ids that expired
    /// this tick, in id order. TTL entries for pending attacks do not count
    /// down here; promotion is what arms them.
    pub fn tick_ttl(&mut self, dt_millis: f32, table: &ObjectTable) -> Vec<ObjectId> {
        let dt_secs = dt_millis / 1000.0;
        let mut expired = Vec::new();
        for (id, remaining) in self.ttl.iter_mut() {
            if !table.contains(*id) {
                continue;
            }
            *remaining -= dt_secs;
            if *remaining <= 0.0 {
                expired.push(*id);
            }
        }
        expired.sort_unstable();
        for id in &expired {
            self.ttl.remove(id);
        }
        expired
    }

    /// Releases bookkeeping for an object that left the world through some
    /// other door (disconnect, external removal).
    pub fn on_object_destroyed(&mut self, id: ObjectId) {
        self.ttl.remove(&id);
        self.pending.remove(&id);
    }
}
