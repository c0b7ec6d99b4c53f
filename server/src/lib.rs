//! # Realm Server Library
//!
//! The authoritative simulation for a small real-time multiplayer 2D world.
//! Clients steer one avatar each across a grid of interconnected maps; the
//! server owns the ground truth for every mobile object, advances the world
//! on a fixed 40 Hz tick, and streams state snapshots back to every peer.
//!
//! ## Architecture
//!
//! One tick-loop task owns all mutable simulation state: the object table,
//! the attack pipeline, the path store, the per-map quadtrees. The transport
//! hands decoded messages to that task over a channel, and the only other
//! threads are the pathfinding workers, which operate on immutable navmap
//! handles and report back through a queue. Nothing in the simulation is
//! shared mutably across threads.
//!
//! ## Modules
//!
//! - [`maps`]: boot-time map assets: metadata, navmaps, per-map quadtrees
//! - [`objects`]: the authoritative id-to-record table
//! - [`updater`]: per-tick advancement and the creature behavior machine
//! - [`path`]: background A* workers and the per-object path store
//! - [`combat`]: attack charge, promotion, expiry and cancellation
//! - [`events`]: tick-local event queues crossing component boundaries
//! - [`transport`]: UDP socket, peers, reliable/unreliable channels
//! - [`network`]: the server itself: message handlers and the tick loop
//! - [`namegen`]: display names for seeded creatures

pub mod combat;
pub mod events;
pub mod maps;
pub mod namegen;
pub mod network;
pub mod objects;
pub mod path;
pub mod transport;
pub mod updater;
