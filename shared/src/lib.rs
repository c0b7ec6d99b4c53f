//! # Shared Realm Library
//!
//! Data structures, constants and world math shared between the authoritative
//! server and any client of the realm. It covers four concerns:
//!
//! - **World constants**: tile geometry, tick rate, and the gameplay timers
//!   (aggro range, attack charge, loiter cadence) that both sides must agree
//!   on for prediction to line up with authority.
//! - **Object model**: the [`object::ObjectRecord`] every mobile entity is
//!   described by, plus the pure narrow-phase collision test over two records.
//! - **Wire protocol**: the [`protocol::Message`] taxonomy and its versioned
//!   envelope, serialized with `bincode`.
//! - **World math**: the per-map walkability grid ([`navmap::Navmap`]), the
//!   loose [`quadtree::Quadtree`] used for broad-phase queries, and the
//!   pathfinding primitives (A* and sampled line of sight).
//!
//! Everything here is deterministic and free of I/O so the same code can back
//! server simulation and client-side prediction.

pub mod navmap;
pub mod object;
pub mod pathfinding;
pub mod protocol;
pub mod quadtree;

pub use navmap::{Navmap, TileKind};
pub use object::{
    colliders_intersect, AttackKind, Collider, ColliderShape, FacingDirection, Faction,
    ObjectId, ObjectKind, ObjectRecord, ObjectState, ProjectileKind, NO_OBJECT,
};
pub use protocol::{Channel, Envelope, Frame, Message};
pub use quadtree::Quadtree;

/// Wire protocol version stamped on every envelope.
///
/// Messages carrying any other version are logged and dropped at the decode
/// boundary without disturbing the connection.
pub const PROTOCOL_VERSION: u16 = 1;

/// Number of tiles per side of every map's walkability grid.
pub const NAVMAP_SIZE: usize = 128;

/// World-space size of one navmap tile.
///
/// A map therefore spans `NAVMAP_SIZE * TILE_SIZE` = 8.0 world units per side.
pub const TILE_SIZE: f32 = 0.0625;

/// Multiplier from map-space origins and dimensions to world space.
pub const MAP_WORLD_SCALE: f32 = 1.0;

/// Fixed simulation rate of the server tick loop.
pub const TICK_HZ: u32 = 40;

/// Maximum distance at which a creature will acquire a target, in world units.
pub const AGGRO_RANGE: f32 = 4.0 * TILE_SIZE;

/// Seconds between path recalculations while a creature is chasing a target.
pub const REPATH_INTERVAL_SECS: f32 = 0.05;

/// Seconds between autonomous loiter decisions of an idle creature.
pub const LOITER_INTERVAL_SECS: f32 = 5.0;

/// Duration of the melee attack animation, during which the attacker holds
/// its state.
pub const ATTACK_ANIM_SECS: f32 = 0.5;

/// Charge delay between an accepted melee request and the attack object
/// entering the world.
pub const FAST_MELEE_CHARGE_SECS: f32 = 0.3;

/// Lifetime of a spawned melee slash. Counting starts at promotion, not at
/// the request.
pub const FAST_MELEE_SLASH_SECS: f32 = 0.3;

/// Movement speed of player avatars, in world units per millisecond.
pub const PLAYER_SPEED: f32 = 0.0002;

/// Movement speed of creatures, in world units per millisecond.
pub const CREATURE_SPEED: f32 = 0.00015;

/// Map every player spawns on.
pub const STARTING_MAP: &str = "forest_1";

/// Maximum number of concurrently connected peers.
pub const MAX_PEERS: usize = 32;

/// Default UDP port the server listens on.
pub const DEFAULT_PORT: u16 = 7777;
