//! Object model for every mobile entity in the world.
//!
//! The server owns one [`ObjectRecord`] per live entity: players, creatures,
//! and transient attack objects. Records are plain serializable data: the
//! whole record travels in state snapshots, and clients author updates for
//! their own avatar by sending a modified record back.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Opaque entity identifier. Allocated monotonically by the tick loop.
pub type ObjectId = u64;

/// Reserved id meaning "no object" (e.g. the world-geometry side of a
/// collision).
pub const NO_OBJECT: ObjectId = 0;

/// Coarse classification of a world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Player,
    Creature,
    Attack,
    Static,
}

/// Kind of attack an object represents (or `None` for non-attacks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackKind {
    None,
    Melee,
    Projectile,
}

/// Projectile flavor, relevant only when `attack_kind` is `Projectile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectileKind {
    None,
    Arrow,
    Fireball,
}

/// Team affiliation. Only cross-faction, non-neutral pairs may aggro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Faction {
    Good,
    Evil,
    Neutral,
}

/// Animation/behavior state. Chase progress is represented by path ownership
/// rather than a dedicated running state, so the server collapses `Running`
/// to `Idle` on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    Idle,
    Running,
    MeleeAttack,
}

/// Eight-way facing, in world orientation (north = +y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacingDirection {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl FacingDirection {
    /// All eight directions, in a fixed order usable for uniform random picks.
    pub const ALL: [FacingDirection; 8] = [
        FacingDirection::North,
        FacingDirection::South,
        FacingDirection::East,
        FacingDirection::West,
        FacingDirection::NorthEast,
        FacingDirection::NorthWest,
        FacingDirection::SouthEast,
        FacingDirection::SouthWest,
    ];

    /// Discretizes a world-space direction vector into one of eight facings.
    ///
    /// A zero vector keeps no meaningful direction and maps to `South`.
    pub fn from_vec(v: Vec3) -> Self {
        if v.x == 0.0 && v.y == 0.0 {
            return FacingDirection::South;
        }
        let angle = v.y.atan2(v.x).to_degrees();
        // Eight 45-degree sectors centered on the cardinal/diagonal axes.
        let sector = ((angle + 382.5) / 45.0) as i32 % 8;
        match sector {
            0 => FacingDirection::East,
            1 => FacingDirection::NorthEast,
            2 => FacingDirection::North,
            3 => FacingDirection::NorthWest,
            4 => FacingDirection::West,
            5 => FacingDirection::SouthWest,
            6 => FacingDirection::South,
            _ => FacingDirection::SouthEast,
        }
    }

    /// Unit step in tile coordinates for this facing. Tile rows grow
    /// downward, so north decrements the row.
    pub fn tile_step(self) -> (i32, i32) {
        match self {
            FacingDirection::North => (0, -1),
            FacingDirection::South => (0, 1),
            FacingDirection::East => (1, 0),
            FacingDirection::West => (-1, 0),
            FacingDirection::NorthEast => (1, -1),
            FacingDirection::NorthWest => (-1, -1),
            FacingDirection::SouthEast => (1, 1),
            FacingDirection::SouthWest => (-1, 1),
        }
    }
}

/// Collider silhouette, relative to the object's position and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColliderShape {
    Rect,
    Circle,
}

/// Collision volume of an object. `dimensions` are full extents in world
/// units before the object's `scale` is applied; circles use `dimensions.x`
/// as their diameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub shape: ColliderShape,
    pub dimensions: Vec2,
}

impl Collider {
    pub fn rect(width: f32, height: f32) -> Self {
        Self {
            shape: ColliderShape::Rect,
            dimensions: Vec2::new(width, height),
        }
    }

    pub fn circle(diameter: f32) -> Self {
        Self {
            shape: ColliderShape::Circle,
            dimensions: Vec2::splat(diameter),
        }
    }
}

/// Authoritative per-entity state.
///
/// Positions are world-space; `position.z` is a render plane and never
/// affects simulation. Velocities are in world units per millisecond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    /// Self for players and creatures; the creator for attack objects.
    pub parent_id: ObjectId,
    pub kind: ObjectKind,
    pub attack_kind: AttackKind,
    pub projectile_kind: ProjectileKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub current_map: String,
    pub facing: FacingDirection,
    pub state: ObjectState,
    pub faction: Faction,
    /// Movement speed in world units per millisecond.
    pub speed: f32,
    pub scale: f32,
    pub collider: Collider,
    /// Seconds remaining until the next autonomous decision.
    pub action_timer: f32,
    pub name: String,
}

impl ObjectRecord {
    /// Creates a player avatar record at `position` on `map`.
    pub fn player(id: ObjectId, position: Vec3, map: &str) -> Self {
        Self {
            id,
            parent_id: id,
            kind: ObjectKind::Player,
            attack_kind: AttackKind::None,
            projectile_kind: ProjectileKind::None,
            position,
            velocity: Vec3::ZERO,
            current_map: map.to_string(),
            facing: FacingDirection::South,
            state: ObjectState::Idle,
            faction: Faction::Good,
            speed: crate::PLAYER_SPEED,
            scale: 1.0,
            collider: Collider::rect(crate::TILE_SIZE * 0.75, crate::TILE_SIZE * 0.75),
            action_timer: 0.0,
            name: String::new(),
        }
    }

    /// Creates an autonomous creature record at `position` on `map`.
    pub fn creature(id: ObjectId, position: Vec3, map: &str, name: String) -> Self {
        Self {
            id,
            parent_id: id,
            kind: ObjectKind::Creature,
            attack_kind: AttackKind::None,
            projectile_kind: ProjectileKind::None,
            position,
            velocity: Vec3::ZERO,
            current_map: map.to_string(),
            facing: FacingDirection::South,
            state: ObjectState::Idle,
            faction: Faction::Evil,
            speed: crate::CREATURE_SPEED,
            scale: 1.0,
            collider: Collider::rect(crate::TILE_SIZE * 0.75, crate::TILE_SIZE * 0.75),
            action_timer: 0.0,
            name,
        }
    }
}

/// Narrow-phase collision test between two object records.
///
/// Exact edge contact does not count as an intersection.
pub fn colliders_intersect(a: &ObjectRecord, b: &ObjectRecord) -> bool {
    let pa = a.position.truncate();
    let pb = b.position.truncate();
    match (a.collider.shape, b.collider.shape) {
        (ColliderShape::Rect, ColliderShape::Rect) => {
            let ha = a.collider.dimensions * a.scale / 2.0;
            let hb = b.collider.dimensions * b.scale / 2.0;
            (pa.x - pb.x).abs() < ha.x + hb.x && (pa.y - pb.y).abs() < ha.y + hb.y
        }
        (ColliderShape::Circle, ColliderShape::Circle) => {
            let ra = a.collider.dimensions.x * a.scale / 2.0;
            let rb = b.collider.dimensions.x * b.scale / 2.0;
            pa.distance_squared(pb) < (ra + rb) * (ra + rb)
        }
        (ColliderShape::Rect, ColliderShape::Circle) => rect_circle_intersect(a, b),
        (ColliderShape::Circle, ColliderShape::Rect) => rect_circle_intersect(b, a),
    }
}

fn rect_circle_intersect(rect: &ObjectRecord, circle: &ObjectRecord) -> bool {
    let half = rect.collider.dimensions * rect.scale / 2.0;
    let center = rect.position.truncate();
    let c = circle.position.truncate();
    let radius = circle.collider.dimensions.x * circle.scale / 2.0;
    let closest = Vec2::new(
        c.x.clamp(center.x - half.x, center.x + half.x),
        c.y.clamp(center.y - half.y, center.y + half.y),
    );
    c.distance_squared(closest) < radius * radius
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_from_cardinal_vectors() {
        assert_eq!(FacingDirection::from_vec(Vec3::new(1.0, 0.0, 0.0)), FacingDirection::East);
        assert_eq!(FacingDirection::from_vec(Vec3::new(-1.0, 0.0, 0.0)), FacingDirection::West);
        assert_eq!(FacingDirection::from_vec(Vec3::new(0.0, 1.0, 0.0)), FacingDirection::North);
        assert_eq!(FacingDirection::from_vec(Vec3::new(0.0, -1.0, 0.0)), FacingDirection::South);
    }

    #[test]
    fn test_facing_from_diagonal_vectors() {
        assert_eq!(
            FacingDirection::from_vec(Vec3::new(1.0, 1.0, 0.0)),
            FacingDirection::NorthEast
        );
        assert_eq!(
            FacingDirection::from_vec(Vec3::new(-1.0, 1.0, 0.0)),
            FacingDirection::NorthWest
        );
        assert_eq!(
            FacingDirection::from_vec(Vec3::new(1.0, -1.0, 0.0)),
            FacingDirection::SouthEast
        );
        assert_eq!(
            FacingDirection::from_vec(Vec3::new(-1.0, -1.0, 0.0)),
            FacingDirection::SouthWest
        );
    }

    #[test]
    fn test_facing_zero_vector_defaults_south() {
        assert_eq!(FacingDirection::from_vec(Vec3::ZERO), FacingDirection::South);
    }

    #[test]
    fn test_rect_rect_overlap() {
        let mut a = ObjectRecord::player(1, Vec3::ZERO, "forest_1");
        let mut b = ObjectRecord::player(2, Vec3::ZERO, "forest_1");
        a.collider = Collider::rect(1.0, 1.0);
        b.collider = Collider::rect(1.0, 1.0);

        b.position = Vec3::new(0.9, 0.0, 0.0);
        assert!(colliders_intersect(&a, &b));

        // Exact edge contact is not an intersection.
        b.position = Vec3::new(1.0, 0.0, 0.0);
        assert!(!colliders_intersect(&a, &b));

        b.position = Vec3::new(1.5, 0.0, 0.0);
        assert!(!colliders_intersect(&a, &b));
    }

    #[test]
    fn test_circle_circle_overlap() {
        let mut a = ObjectRecord::player(1, Vec3::ZERO, "forest_1");
        let mut b = ObjectRecord::player(2, Vec3::ZERO, "forest_1");
        a.collider = Collider::circle(1.0);
        b.collider = Collider::circle(1.0);

        b.position = Vec3::new(0.5, 0.5, 0.0);
        assert!(colliders_intersect(&a, &b));

        b.position = Vec3::new(2.0, 0.0, 0.0);
        assert!(!colliders_intersect(&a, &b));
    }

    #[test]
    fn test_rect_circle_overlap() {
        let mut rect = ObjectRecord::player(1, Vec3::ZERO, "forest_1");
        let mut circle = ObjectRecord::player(2, Vec3::ZERO, "forest_1");
        rect.collider = Collider::rect(2.0, 2.0);
        circle.collider = Collider::circle(1.0);

        circle.position = Vec3::new(1.2, 0.0, 0.0);
        assert!(colliders_intersect(&rect, &circle));
        assert!(colliders_intersect(&circle, &rect));

        circle.position = Vec3::new(2.0, 2.0, 0.0);
        assert!(!colliders_intersect(&rect, &circle));
    }

    #[test]
    fn test_scale_affects_collision() {
        let mut a = ObjectRecord::player(1, Vec3::ZERO, "forest_1");
        let mut b = ObjectRecord::player(2, Vec3::new(1.1, 0.0, 0.0), "forest_1");
        a.collider = Collider::rect(1.0, 1.0);
        b.collider = Collider::rect(1.0, 1.0);
        assert!(!colliders_intersect(&a, &b));

        a.scale = 2.0;
        assert!(colliders_intersect(&a, &b));
    }
}
