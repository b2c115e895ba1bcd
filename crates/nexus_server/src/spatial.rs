//! A uniform-grid spatial index over one zone.
//!
//! All writes happen from the owning zone actor, which is what keeps the
//! `positions`/`cells` pair coherent without locks. Point mutations are
//! O(1) average; range queries are O(k) in the entities of the touched
//! cells.

use glam::Vec3;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::guid::Guid;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
struct CellPos {
    x: i32,
    y: i32,
    z: i32,
}

pub struct SpatialGrid {
    cell_size: f32,
    cells: FxHashMap<CellPos, FxHashSet<Guid>>,
    positions: FxHashMap<Guid, Vec3>,
}

impl SpatialGrid {
    /// `cell_size` should sit above the common query radius and below the
    /// zone extent; it is a tuning knob, not part of the wire contract.
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0);
        Self {
            cell_size,
            cells: FxHashMap::default(),
            positions: FxHashMap::default(),
        }
    }

    fn cell_of(&self, pos: Vec3) -> CellPos {
        CellPos {
            x: (pos.x / self.cell_size).floor() as i32,
            y: (pos.y / self.cell_size).floor() as i32,
            z: (pos.z / self.cell_size).floor() as i32,
        }
    }

    pub fn insert(&mut self, guid: Guid, pos: Vec3) {
        debug_assert!(!self.positions.contains_key(&guid));
        self.cells.entry(self.cell_of(pos)).or_default().insert(guid);
        self.positions.insert(guid, pos);
    }

    /// No-op if the entity is absent.
    pub fn remove(&mut self, guid: Guid) {
        let Some(pos) = self.positions.remove(&guid) else {
            return;
        };

        let cell = self.cell_of(pos);
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(&guid);
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    pub fn update(&mut self, guid: Guid, new_pos: Vec3) {
        if let Some(&old) = self.positions.get(&guid) {
            let old_cell = self.cell_of(old);
            let new_cell = self.cell_of(new_pos);
            if old_cell == new_cell {
                self.positions.insert(guid, new_pos);
                return;
            }
        }
        self.remove(guid);
        self.insert(guid, new_pos);
    }

    pub fn position(&self, guid: Guid) -> Option<Vec3> {
        self.positions.get(&guid).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// All entities within `radius` of `center`, inclusive. Scans the AABB
    /// of candidate cells and filters by squared distance; no square roots.
    pub fn entities_in_range(&self, center: Vec3, radius: f32) -> Vec<Guid> {
        let min = self.cell_of(center - Vec3::splat(radius));
        let max = self.cell_of(center + Vec3::splat(radius));
        let radius_sq = radius * radius;

        let mut out = Vec::new();
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    let Some(set) = self.cells.get(&CellPos { x, y, z }) else {
                        continue;
                    };
                    for &guid in set {
                        let pos = self.positions[&guid];
                        if center.distance_squared(pos) <= radius_sq {
                            out.push(guid);
                        }
                    }
                }
            }
        }
        out
    }
}
