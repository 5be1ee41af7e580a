use rstar::{RTree, RTreeObject, AABB};

use crate::cell::CellKey;
use crate::instance::InstanceId;

/// An entry in the R-tree spatial index, referencing a placed instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialEntry {
    pub instance: InstanceId,
    pub position: [f32; 3],
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// Spatial index over instance positions, used to find the objects
/// standing inside a footprint.
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex").field("len", &self.len()).finish()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Build the index from a list of entries.
    pub fn build(entries: Vec<SpatialEntry>) -> Self {
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn insert(&mut self, instance: InstanceId, position: [f32; 3]) {
        self.tree.insert(SpatialEntry { instance, position });
    }

    pub fn remove(&mut self, instance: InstanceId, position: [f32; 3]) -> bool {
        self.tree
            .remove(&SpatialEntry { instance, position })
            .is_some()
    }

    /// All instances whose position falls inside `cell`.
    pub fn query_cell(&self, cell: CellKey) -> Vec<InstanceId> {
        let min = [cell.x as f32, cell.y as f32, cell.z as f32];
        let max = [min[0] + 1.0, min[1] + 1.0, min[2] + 1.0];
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_corners(min, max))
            // The envelope is closed; drop points on the far faces.
            .filter(|e| CellKey::containing(e.position) == cell)
            .map(|e| e.instance)
            .collect()
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
