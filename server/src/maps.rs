//! Boot-time map assets: metadata, walkability grids and spatial indexes.
//!
//! The repository loads `map_global_data.json` plus one 128x128 navmap PNG
//! per map, then owns everything the simulation needs to reason about space:
//! per-map world transforms, 4-way neighbor links, navmaps and one quadtree
//! per map. All of it is immutable after load except the quadtrees, which the
//! tick loop clears and repopulates every tick.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use glam::{Vec2, Vec3};
use log::info;
use serde::Deserialize;
use thiserror::Error;

use realm_shared::{Navmap, Quadtree, TileKind, MAP_WORLD_SCALE, NAVMAP_SIZE};

/// Index into [`MapMeta::connections`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

/// Immutable per-map metadata.
#[derive(Debug, Clone)]
pub struct MapMeta {
    /// Map-space origin; multiply by [`MAP_WORLD_SCALE`] for world space.
    pub position: Vec2,
    /// Map-space dimensions; multiply by [`MAP_WORLD_SCALE`] for world space.
    pub dimensions: Vec2,
    /// Neighbor map names in N/E/S/W order; `None` where no neighbor exists.
    pub connections: [Option<String>; 4],
}

impl MapMeta {
    pub fn neighbor(&self, direction: ConnectionDirection) -> Option<&str> {
        self.connections[direction as usize].as_deref()
    }
}

/// Failures while loading map assets. All of them are fatal at boot.
#[derive(Debug, Error)]
pub enum MapLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed map_global_data.json: {0}")]
    MalformedMetadata(#[from] serde_json::Error),
    #[error("failed to decode navmap image {path}: {source}")]
    BadImage {
        path: String,
        source: image::ImageError,
    },
    #[error("navmap {path} is {width}x{height}, expected {expected}x{expected}")]
    WrongNavmapSize {
        path: String,
        width: u32,
        height: u32,
        expected: usize,
    },
    #[error("map {0} has metadata but no navmap")]
    MissingNavmap(String),
}

#[derive(Debug, Deserialize)]
struct GlobalMapData {
    map_transforms: HashMap<String, MapTransform>,
    map_connections: HashMap<String, MapConnections>,
}

#[derive(Debug, Deserialize)]
struct MapTransform {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

#[derive(Debug, Deserialize)]
struct MapConnections {
    top: String,
    right: String,
    bottom: String,
    left: String,
}

/// Owner of every loaded map's metadata, navmap and quadtree.
#[derive(Debug)]
pub struct MapRepository {
    metas: HashMap<String, MapMeta>,
    navmaps: HashMap<String, Arc<Navmap>>,
    quadtrees: HashMap<String, Quadtree>,
}

impl MapRepository {
    /// Loads every map under `assets_dir`. Missing or unreadable assets are
    /// fatal: the caller reports the error and exits non-zero.
    pub fn load(assets_dir: &Path) -> Result<Self, MapLoadError> {
        let metas = load_metadata(assets_dir)?;
        let mut navmaps = HashMap::new();
        for name in metas.keys() {
            let path = assets_dir
                .join("navmaps")
                .join(format!("{}_navmap.png", name));
            if !path.exists() {
                return Err(MapLoadError::MissingNavmap(name.clone()));
            }
            navmaps.insert(name.clone(), Arc::new(load_navmap(&path)?));
        }
        info!(
            "Loaded metadata and navmaps for {} maps",
            metas.len()
        );

        Ok(Self::from_parts(metas, navmaps))
    }

    /// Builds a repository from already-materialized parts. This is the boot
    /// path's second half and the constructor tests use directly.
    pub fn from_parts(
        metas: HashMap<String, MapMeta>,
        navmaps: HashMap<String, Arc<Navmap>>,
    ) -> Self {
        let quadtrees = metas
            .iter()
            .map(|(name, meta)| {
                let tree = Quadtree::new(
                    (meta.position * MAP_WORLD_SCALE).extend(20.0),
                    (meta.dimensions * MAP_WORLD_SCALE / 2.0).extend(1.0),
                );
                (name.clone(), tree)
            })
            .collect();

        Self {
            metas,
            navmaps,
            quadtrees,
        }
    }

    /// Metadata of a loaded map.
    ///
    /// # Panics
    /// Unknown names are a programmer error and panic.
    pub fn meta(&self, map: &str) -> &MapMeta {
        self.metas
            .get(map)
            .unwrap_or_else(|| panic!("unknown map: {}", map))
    }

    /// Navmap of a loaded map.
    ///
    /// # Panics
    /// Unknown names are a programmer error and panic.
    pub fn navmap(&self, map: &str) -> &Arc<Navmap> {
        self.navmaps
            .get(map)
            .unwrap_or_else(|| panic!("unknown map: {}", map))
    }

    /// Quadtree of a loaded map.
    ///
    /// # Panics
    /// Unknown names are a programmer error and panic.
    pub fn quadtree(&self, map: &str) -> &Quadtree {
        self.quadtrees
            .get(map)
            .unwrap_or_else(|| panic!("unknown map: {}", map))
    }

    /// Mutable quadtree access for the per-tick rebuild.
    ///
    /// # Panics
    /// Unknown names are a programmer error and panic.
    pub fn quadtree_mut(&mut self, map: &str) -> &mut Quadtree {
        self.quadtrees
            .get_mut(map)
            .unwrap_or_else(|| panic!("unknown map: {}", map))
    }

    /// Clears every map's quadtree. Called at the top of each tick.
    pub fn clear_quadtrees(&mut self) {
        for tree in self.quadtrees.values_mut() {
            tree.clear();
        }
    }

    pub fn contains(&self, map: &str) -> bool {
        self.metas.contains_key(map)
    }

    pub fn map_names(&self) -> impl Iterator<Item = &str> {
        self.metas.keys().map(String::as_str)
    }

    /// World-space center of a map.
    pub fn world_center(&self, map: &str) -> Vec3 {
        (self.meta(map).position * MAP_WORLD_SCALE).extend(0.0)
    }
}

fn load_metadata(assets_dir: &Path) -> Result<HashMap<String, MapMeta>, MapLoadError> {
    let path = assets_dir.join("map_global_data.json");
    let raw = std::fs::read_to_string(&path).map_err(|source| MapLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let data: GlobalMapData = serde_json::from_str(&raw)?;

    let mut metas = HashMap::new();
    for (file_name, transform) in &data.map_transforms {
        let name = trim_suffix(file_name, ".json");
        let connections = match data.map_connections.get(file_name) {
            Some(c) => [
                connection_name(&c.top),
                connection_name(&c.right),
                connection_name(&c.bottom),
                connection_name(&c.left),
            ],
            None => [None, None, None, None],
        };
        metas.insert(
            name,
            MapMeta {
                position: Vec2::new(transform.x, transform.y),
                dimensions: Vec2::new(transform.width, transform.height),
                connections,
            },
        );
    }
    Ok(metas)
}

fn load_navmap(path: &Path) -> Result<Navmap, MapLoadError> {
    let img = image::open(path)
        .map_err(|source| MapLoadError::BadImage {
            path: path.display().to_string(),
            source,
        })?
        .to_rgba8();

    if img.width() as usize != NAVMAP_SIZE || img.height() as usize != NAVMAP_SIZE {
        return Err(MapLoadError::WrongNavmapSize {
            path: path.display().to_string(),
            width: img.width(),
            height: img.height(),
            expected: NAVMAP_SIZE,
        });
    }

    Ok(Navmap::from_fn(|col, row| {
        let pixel = img.get_pixel(col as u32, row as u32);
        // Fully opaque black marks a solid tile; everything else walks.
        if pixel[0] == 0 && pixel[1] == 0 && pixel[2] == 0 && pixel[3] == 255 {
            TileKind::Solid
        } else {
            TileKind::Walkable
        }
    }))
}

fn trim_suffix(name: &str, suffix: &str) -> String {
    name.strip_suffix(suffix).unwrap_or(name).to_string()
}

fn connection_name(raw: &str) -> Option<String> {
    let trimmed = trim_suffix(raw, ".json");
    if trimmed.is_empty() || trimmed == "None" {
        None
    } else {
        Some(trimmed)
    }
}

/// Two-map in-memory repository (forest_1 with forest_2 to its north) used
/// by unit tests across the crate.
#[cfg(test)]
pub(crate) fn test_repository() -> MapRepository {
    let mut metas = HashMap::new();
    metas.insert(
        "forest_1".to_string(),
        MapMeta {
            position: Vec2::new(0.0, 0.0),
            dimensions: Vec2::new(8.0, 8.0),
            connections: [
                Some("forest_2".to_string()), // north
                None,                         // east
                None,                         // south
                None,                         // west
            ],
        },
    );
    metas.insert(
        "forest_2".to_string(),
        MapMeta {
            position: Vec2::new(0.0, 8.0),
            dimensions: Vec2::new(8.0, 8.0),
            connections: [None, None, Some("forest_1".to_string()), None],
        },
    );

    let mut navmaps = HashMap::new();
    navmaps.insert("forest_1".to_string(), Arc::new(Navmap::open()));
    navmaps.insert("forest_2".to_string(), Arc::new(Navmap::open()));

    MapRepository::from_parts(metas, navmaps)
}
