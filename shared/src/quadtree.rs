//! Loose quadtree used for per-map broad-phase queries.
//!
//! One tree exists per map, rooted on the map's world rectangle. The tick
//! loop clears every tree at the start of a tick and re-inserts each live
//! object after updating it, so the structure never has to support removal.
//! Results are advisory: callers still run the narrow-phase collider test on
//! whatever a query returns.

use glam::{Vec2, Vec3};

use crate::object::ObjectId;

/// Child node bounds are inflated by this factor when deciding whether an
/// entry fits, which lets entries straddling a split line sink below the
/// root instead of piling up in it.
const LOOSENESS: f32 = 2.0;

/// Entries per node before it subdivides.
const SPLIT_THRESHOLD: usize = 8;

/// Maximum subdivision depth.
const MAX_DEPTH: u8 = 5;

#[derive(Debug, Clone)]
struct Entry {
    id: ObjectId,
    center: Vec3,
    /// Half-extents of the entry's axis-aligned rectangle.
    extents: Vec2,
}

#[derive(Debug)]
struct Node {
    center: Vec2,
    half: Vec2,
    depth: u8,
    entries: Vec<Entry>,
    children: Option<Box<[Node; 4]>>,
}

impl Node {
    fn new(center: Vec2, half: Vec2, depth: u8) -> Self {
        Self {
            center,
            half,
            depth,
            entries: Vec::new(),
            children: None,
        }
    }

    fn loose_contains(&self, center: Vec2, extents: Vec2) -> bool {
        let loose = self.half * LOOSENESS;
        (center.x - self.center.x).abs() + extents.x <= loose.x
            && (center.y - self.center.y).abs() + extents.y <= loose.y
    }

    fn loose_intersects(&self, center: Vec2, extents: Vec2) -> bool {
        let loose = self.half * LOOSENESS;
        (center.x - self.center.x).abs() < loose.x + extents.x
            && (center.y - self.center.y).abs() < loose.y + extents.y
    }

    fn insert(&mut self, entry: Entry) {
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.loose_contains(entry.center.truncate(), entry.extents) {
                    child.insert(entry);
                    return;
                }
            }
            self.entries.push(entry);
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > SPLIT_THRESHOLD && self.depth < MAX_DEPTH {
            self.split();
        }
    }

    fn split(&mut self) {
        let center = self.center;
        let depth = self.depth;
        let quarter = self.half / 2.0;
        let offsets = [
            Vec2::new(-quarter.x, -quarter.y),
            Vec2::new(quarter.x, -quarter.y),
            Vec2::new(-quarter.x, quarter.y),
            Vec2::new(quarter.x, quarter.y),
        ];
        self.children = Some(Box::new(
            offsets.map(|offset| Node::new(center + offset, quarter, depth + 1)),
        ));

        // Re-sink entries that now fit a child.
        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            self.insert(entry);
        }
    }

    fn query(&self, center: Vec2, extents: Vec2, out: &mut Vec<ObjectId>) {
        if !self.loose_intersects(center, extents) {
            return;
        }
        for entry in &self.entries {
            let c = entry.center.truncate();
            if (c.x - center.x).abs() < entry.extents.x + extents.x
                && (c.y - center.y).abs() < entry.extents.y + extents.y
            {
                out.push(entry.id);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query(center, extents, out);
            }
        }
    }

    fn collect_rects(&self, out: &mut Vec<(Vec3, Vec3)>) {
        for entry in &self.entries {
            out.push((entry.center, entry.extents.extend(0.0)));
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.collect_rects(out);
            }
        }
    }
}

/// Loose quadtree over one map's world rectangle.
#[derive(Debug)]
pub struct Quadtree {
    root_center: Vec3,
    root_half: Vec3,
    root: Node,
}

impl Quadtree {
    /// Creates an empty tree. `center.z`/`half_extents.z` give the render
    /// plane and its slack; partitioning happens in x/y only.
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            root_center: center,
            root_half: half_extents,
            root: Node::new(center.truncate(), half_extents.truncate(), 0),
        }
    }

    /// Discards all entries. Called once per map per tick.
    pub fn clear(&mut self) {
        self.root = Node::new(
            self.root_center.truncate(),
            self.root_half.truncate(),
            0,
        );
    }

    /// Adds one axis-aligned rectangle. `extents` are half-extents.
    pub fn insert(&mut self, id: ObjectId, center: Vec3, extents: Vec2) {
        self.root.insert(Entry {
            id,
            center,
            extents,
        });
    }

    /// Returns the ids of every entry whose rectangle overlaps the query
    /// region (given as center and half-extents).
    pub fn query_region(&self, center: Vec2, extents: Vec2) -> Vec<ObjectId> {
        let mut out = Vec::new();
        self.root.query(center, extents, &mut out);
        out
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            count += node.entries.len();
            if let Some(children) = node.children.as_ref() {
                stack.extend(children.iter());
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(center, half-extents)` of every stored entry, for debug overlays.
    pub fn debug_rects(&self) -> Vec<(Vec3, Vec3)> {
        let mut out = Vec::new();
        self.root.collect_rects(&mut out);
        out
    }
}
