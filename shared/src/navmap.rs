//! Per-map walkability grid and world/tile coordinate conversion.
//!
//! Each map carries a square grid of [`NAVMAP_SIZE`]² tiles classified as
//! walkable or solid. Tile row 0 is the top of the grid: tile-space y grows
//! downward while world-space y grows upward, and the conversion functions
//! here own that inversion so no caller has to think about it.

use glam::{IVec2, Vec2, Vec3};

use crate::{NAVMAP_SIZE, TILE_SIZE};

/// Classification of a single navmap tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Walkable,
    Solid,
}

/// Immutable walkability grid for one map.
#[derive(Debug, Clone)]
pub struct Navmap {
    tiles: Vec<TileKind>,
}

impl Navmap {
    /// Builds a navmap from a row-major tile vector (row 0 first).
    ///
    /// # Panics
    /// Panics when `tiles` is not exactly `NAVMAP_SIZE * NAVMAP_SIZE` long.
    pub fn from_tiles(tiles: Vec<TileKind>) -> Self {
        assert_eq!(
            tiles.len(),
            NAVMAP_SIZE * NAVMAP_SIZE,
            "navmap must be {}x{} tiles",
            NAVMAP_SIZE,
            NAVMAP_SIZE
        );
        Self { tiles }
    }

    /// Builds a navmap by evaluating `f(col, row)` for every tile.
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> TileKind) -> Self {
        let mut tiles = Vec::with_capacity(NAVMAP_SIZE * NAVMAP_SIZE);
        for row in 0..NAVMAP_SIZE {
            for col in 0..NAVMAP_SIZE {
                tiles.push(f(col, row));
            }
        }
        Self { tiles }
    }

    /// A fully walkable navmap, mostly useful in tests.
    pub fn open() -> Self {
        Self {
            tiles: vec![TileKind::Walkable; NAVMAP_SIZE * NAVMAP_SIZE],
        }
    }

    /// Looks up the tile at `(col, row)`. Anything outside the grid reads as
    /// solid, so walking off the navmap is impossible by construction.
    pub fn tile_at(&self, tile: IVec2) -> TileKind {
        if tile.x < 0 || tile.y < 0 || tile.x >= NAVMAP_SIZE as i32 || tile.y >= NAVMAP_SIZE as i32
        {
            return TileKind::Solid;
        }
        self.tiles[tile.y as usize * NAVMAP_SIZE + tile.x as usize]
    }

    /// Returns the `(col, row)` of the tile containing `pos`.
    ///
    /// The result is undefined for positions outside the map's world
    /// rectangle; callers route those through the map-connection logic first.
    pub fn world_to_tile(&self, pos: Vec3, map_origin: Vec2, scale: f32) -> IVec2 {
        let half = NAVMAP_SIZE as f32 * TILE_SIZE / 2.0;
        let local_x = pos.x - (map_origin.x * scale - half);
        // Row 0 sits at the top of the map, which is the maximum world y.
        let local_y = (map_origin.y * scale + half) - pos.y;
        IVec2::new(
            (local_x / TILE_SIZE).floor() as i32,
            (local_y / TILE_SIZE).floor() as i32,
        )
    }

    /// Returns the world-space center of `tile`, carrying `z` through
    /// untouched.
    pub fn tile_to_world(&self, tile: IVec2, map_origin: Vec2, scale: f32, z: f32) -> Vec3 {
        let half = NAVMAP_SIZE as f32 * TILE_SIZE / 2.0;
        Vec3::new(
            map_origin.x * scale - half + (tile.x as f32 + 0.5) * TILE_SIZE,
            map_origin.y * scale + half - (tile.y as f32 + 0.5) * TILE_SIZE,
            z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn checkered() -> Navmap {
        Navmap::from_fn(|col, row| {
            if (col + row) % 2 == 0 {
                TileKind::Walkable
            } else {
                TileKind::Solid
            }
        })
    }

    #[test]
    fn test_tile_lookup_in_bounds() {
        let navmap = checkered();
        assert_eq!(navmap.tile_at(IVec2::new(0, 0)), TileKind::Walkable);
        assert_eq!(navmap.tile_at(IVec2::new(1, 0)), TileKind::Solid);
        assert_eq!(navmap.tile_at(IVec2::new(0, 1)), TileKind::Solid);
    }

    #[test]
    fn test_tile_lookup_out_of_bounds_is_solid() {
        let navmap = Navmap::open();
        assert_eq!(navmap.tile_at(IVec2::new(-1, 0)), TileKind::Solid);
        assert_eq!(navmap.tile_at(IVec2::new(0, -1)), TileKind::Solid);
        assert_eq!(navmap.tile_at(IVec2::new(NAVMAP_SIZE as i32, 0)), TileKind::Solid);
        assert_eq!(navmap.tile_at(IVec2::new(0, NAVMAP_SIZE as i32)), TileKind::Solid);
    }

    #[test]
    fn test_row_zero_is_top_of_map() {
        let navmap = Navmap::open();
        let origin = Vec2::new(0.0, 0.0);
        let top = navmap.tile_to_world(IVec2::new(0, 0), origin, 1.0, 0.0);
        let bottom = navmap.tile_to_world(IVec2::new(0, NAVMAP_SIZE as i32 - 1), origin, 1.0, 0.0);
        assert!(top.y > bottom.y);
    }

    #[test]
    fn test_world_tile_round_trip() {
        let navmap = Navmap::open();
        let origin = Vec2::new(3.0, -2.0);
        let pos = Vec3::new(3.2, -1.7, 5.0);

        let tile = navmap.world_to_tile(pos, origin, 1.0);
        let center = navmap.tile_to_world(tile, origin, 1.0, pos.z);

        // The center must land in the same tile as the original position...
        assert_eq!(navmap.world_to_tile(center, origin, 1.0), tile);
        // ...and be at most half a tile diagonal away from it.
        assert!((center.truncate() - pos.truncate()).length() <= TILE_SIZE);
        assert_approx_eq!(center.z, pos.z, 1e-6);

        // Converting the center again is a fixed point.
        let again = navmap.tile_to_world(navmap.world_to_tile(center, origin, 1.0), origin, 1.0, pos.z);
        assert_approx_eq!(center.x, again.x, 1e-5);
        assert_approx_eq!(center.y, again.y, 1e-5);
    }

    #[test]
    fn test_tile_centers_cover_grid_corners() {
        let navmap = Navmap::open();
        let origin = Vec2::ZERO;
        let half = NAVMAP_SIZE as f32 * TILE_SIZE / 2.0;

        let nw = navmap.tile_to_world(IVec2::new(0, 0), origin, 1.0, 0.0);
        assert_approx_eq!(nw.x, -half + TILE_SIZE / 2.0, 1e-5);
        assert_approx_eq!(nw.y, half - TILE_SIZE / 2.0, 1e-5);

        let last = NAVMAP_SIZE as i32 - 1;
        let se = navmap.tile_to_world(IVec2::new(last, last), origin, 1.0, 0.0);
        assert_approx_eq!(se.x, half - TILE_SIZE / 2.0, 1e-5);
        assert_approx_eq!(se.y, -half + TILE_SIZE / 2.0, 1e-5);
    }
}
