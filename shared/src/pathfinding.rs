//! Grid pathfinding and line-of-sight tests over a [`Navmap`].
//!
//! A* runs on the 4-connected tile grid with a Manhattan heuristic and unit
//! step cost. Searches are expected to finish within a few milliseconds on a
//! 128x128 grid; one exceeding 10 ms logs a warning but is never aborted.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Instant;

use glam::{IVec2, Vec2, Vec3};
use log::warn;

use crate::navmap::{Navmap, TileKind};

/// Wall-time threshold above which a single search logs a warning.
const SEARCH_WARN_MILLIS: u128 = 10;

const NEIGHBOR_STEPS: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// Computes a path of world-space waypoints from `start` to `target`.
///
/// The result contains the centers of every tile strictly after the start
/// tile up to and including the target tile, preserving `start.z`. It is
/// empty when start and target share a tile or when no path exists; callers
/// treat an empty path as a no-op.
pub fn find_path(
    start: Vec3,
    target: Vec3,
    map_origin: Vec2,
    scale: f32,
    navmap: &Navmap,
) -> VecDeque<Vec3> {
    let start_tile = navmap.world_to_tile(start, map_origin, scale);
    let end_tile = navmap.world_to_tile(target, map_origin, scale);

    let mut path = VecDeque::new();
    if start_tile == end_tile {
        return path;
    }

    let began = Instant::now();

    let start_key = (start_tile.x, start_tile.y);
    let end_key = (end_tile.x, end_tile.y);

    let mut open = BinaryHeap::<(Reverse<i32>, Reverse<i32>, (i32, i32))>::new();
    let mut g_scores = HashMap::<(i32, i32), i32>::new();
    let mut came_from = HashMap::<(i32, i32), (i32, i32)>::new();

    g_scores.insert(start_key, 0);
    open.push((Reverse(manhattan(start_key, end_key)), Reverse(0), start_key));

    while let Some((_f, Reverse(g), tile)) = open.pop() {
        if g > g_scores.get(&tile).copied().unwrap_or(i32::MAX) {
            continue;
        }
        if tile == end_key {
            let mut cursor = end_key;
            while cursor != start_key {
                let world = navmap.tile_to_world(
                    IVec2::new(cursor.0, cursor.1),
                    map_origin,
                    scale,
                    start.z,
                );
                path.push_front(world);
                cursor = came_from[&cursor];
            }
            break;
        }

        for (dx, dy) in NEIGHBOR_STEPS {
            let next = (tile.0 + dx, tile.1 + dy);
            if navmap.tile_at(IVec2::new(next.0, next.1)) != TileKind::Walkable {
                continue;
            }
            let tentative = g + 1;
            if tentative >= g_scores.get(&next).copied().unwrap_or(i32::MAX) {
                continue;
            }
            g_scores.insert(next, tentative);
            came_from.insert(next, tile);
            open.push((
                Reverse(tentative + manhattan(next, end_key)),
                Reverse(tentative),
                next,
            ));
        }
    }

    let elapsed = began.elapsed().as_millis();
    if elapsed > SEARCH_WARN_MILLIS {
        warn!(
            "pathfinding from {:?} to {:?} took {} ms",
            start_tile, end_tile, elapsed
        );
    }

    path
}

/// Tests whether an unobstructed straight line exists between two positions.
///
/// The segment is sampled every `speed * dt_millis / 2.0` world units, half
/// the distance the source can cover in one tick, so even the fastest mover
/// cannot tunnel past a solid tile between two consecutive checks.
pub fn has_line_of_sight(
    source: Vec3,
    target: Vec3,
    map_origin: Vec2,
    scale: f32,
    speed: f32,
    dt_millis: f32,
    navmap: &Navmap,
) -> bool {
    let to_target = target - source;
    let distance = to_target.length();

    // Within one tick of movement of the target: nothing left to cross.
    if distance <= 0.0 || distance < speed * dt_millis {
        return true;
    }

    let direction = to_target / distance;
    let step = speed * dt_millis / 2.0;
    let samples = (distance / step) as i32;

    for i in 0..samples {
        let probe = source + direction * (i as f32) * step;
        if navmap.tile_at(navmap.world_to_tile(probe, map_origin, scale)) == TileKind::Solid {
            return false;
        }
    }

    true
}

fn manhattan(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TILE_SIZE;

    fn origin() -> Vec2 {
        Vec2::ZERO
    }

    fn center_of(navmap: &Navmap, col: i32, row: i32) -> Vec3 {
        navmap.tile_to_world(IVec2::new(col, row), origin(), 1.0, 0.0)
    }

    #[test]
    fn test_open_grid_path_has_manhattan_length() {
        let navmap = Navmap::open();
        let start = center_of(&navmap, 10, 10);
        let target = center_of(&navmap, 14, 13);

        let path = find_path(start, target, origin(), 1.0, &navmap);
        assert_eq!(path.len(), 7); // |14-10| + |13-10|

        // Ends exactly on the target tile center.
        let last = *path.back().unwrap();
        assert_eq!(
            navmap.world_to_tile(last, origin(), 1.0),
            IVec2::new(14, 13)
        );
    }

    #[test]
    fn test_first_waypoint_is_past_the_start_tile() {
        let navmap = Navmap::open();
        let start = center_of(&navmap, 20, 20);
        let target = center_of(&navmap, 23, 20);

        let path = find_path(start, target, origin(), 1.0, &navmap);
        let first = *path.front().unwrap();
        assert_ne!(
            navmap.world_to_tile(first, origin(), 1.0),
            IVec2::new(20, 20)
        );
    }

    #[test]
    fn test_same_tile_returns_empty_path() {
        let navmap = Navmap::open();
        let start = center_of(&navmap, 10, 10);
        // Different position, same tile.
        let target = start + Vec3::new(TILE_SIZE * 0.2, TILE_SIZE * 0.2, 0.0);

        assert!(find_path(start, target, origin(), 1.0, &navmap).is_empty());
    }

    #[test]
    fn test_unreachable_target_returns_empty_path() {
        // A solid ring around the target tile.
        let navmap = Navmap::from_fn(|col, row| {
            let near_target =
                (col as i32 - 40).abs() <= 1 && (row as i32 - 40).abs() <= 1;
            if near_target && !(col == 40 && row == 40) {
                TileKind::Solid
            } else {
                TileKind::Walkable
            }
        });

        let start = center_of(&navmap, 10, 10);
        let target = center_of(&navmap, 40, 40);
        assert!(find_path(start, target, origin(), 1.0, &navmap).is_empty());
    }

    #[test]
    fn test_path_routes_around_walls() {
        // Vertical wall at col 30 with a single gap at row 60.
        let navmap = Navmap::from_fn(|col, row| {
            if col == 30 && row != 60 {
                TileKind::Solid
            } else {
                TileKind::Walkable
            }
        });

        let start = center_of(&navmap, 25, 20);
        let target = center_of(&navmap, 35, 20);
        let path = find_path(start, target, origin(), 1.0, &navmap);

        assert!(!path.is_empty());
        for waypoint in &path {
            let tile = navmap.world_to_tile(*waypoint, origin(), 1.0);
            assert_eq!(navmap.tile_at(tile), TileKind::Walkable);
        }
        // The only way through is the gap, so the path must visit it.
        assert!(path.iter().any(|w| {
            navmap.world_to_tile(*w, origin(), 1.0) == IVec2::new(30, 60)
        }));
    }

    #[test]
    fn test_path_preserves_z() {
        let navmap = Navmap::open();
        let start = center_of(&navmap, 5, 5) + Vec3::new(0.0, 0.0, 17.5);
        let target = center_of(&navmap, 8, 5);

        let path = find_path(start, target, origin(), 1.0, &navmap);
        assert!(path.iter().all(|w| w.z == 17.5));
    }

    #[test]
    fn test_los_clear_on_open_grid() {
        let navmap = Navmap::open();
        let a = center_of(&navmap, 10, 10);
        let b = center_of(&navmap, 30, 30);
        let speed = 0.0002;
        let dt = 25.0;

        assert!(has_line_of_sight(a, b, origin(), 1.0, speed, dt, &navmap));
        assert!(has_line_of_sight(b, a, origin(), 1.0, speed, dt, &navmap));
    }

    #[test]
    fn test_los_blocked_symmetrically_by_wall() {
        // Thick horizontal wall between the endpoints.
        let navmap = Navmap::from_fn(|_, row| {
            if (20..=22).contains(&row) {
                TileKind::Solid
            } else {
                TileKind::Walkable
            }
        });

        let above = center_of(&navmap, 15, 10);
        let below = center_of(&navmap, 15, 40);
        let speed = 0.0002;
        let dt = 25.0;

        assert!(!has_line_of_sight(above, below, origin(), 1.0, speed, dt, &navmap));
        assert!(!has_line_of_sight(below, above, origin(), 1.0, speed, dt, &navmap));
    }

    #[test]
    fn test_los_true_when_already_adjacent() {
        let navmap = Navmap::open();
        let a = center_of(&navmap, 10, 10);
        let b = a + Vec3::new(TILE_SIZE * 0.01, 0.0, 0.0);
        // One tick of movement covers more than the separation.
        assert!(has_line_of_sight(a, b, origin(), 1.0, 0.0002, 25.0, &navmap));
    }
}
