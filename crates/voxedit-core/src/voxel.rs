use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::TypeId;
use crate::cell::CellKey;
use crate::diff::Diff;
use crate::error::{EditError, Result};

/// What occupies a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub type_id: TypeId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

/// Batch operation applied to every cell of a footprint.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Add(Descriptor),
    Remove,
}

/// Sparse cell → descriptor map. At most one descriptor per cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelStore {
    cells: BTreeMap<CellKey, Descriptor>,
}

impl VoxelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: BTreeMap<CellKey, Descriptor>) -> Self {
        Self { cells }
    }

    pub fn get(&self, cell: &CellKey) -> Option<&Descriptor> {
        self.cells.get(cell)
    }

    /// Write `descriptor` into `cell` unless the cell already holds the
    /// same type. Returns whether anything changed.
    pub fn set(&mut self, cell: CellKey, descriptor: Descriptor) -> bool {
        if self.cells.get(&cell).map(|d| d.type_id) == Some(descriptor.type_id) {
            return false;
        }
        self.cells.insert(cell, descriptor);
        true
    }

    pub fn remove(&mut self, cell: &CellKey) -> bool {
        self.cells.remove(cell).is_some()
    }

    /// Unconditional write used when replaying history.
    pub(crate) fn put(&mut self, cell: CellKey, descriptor: Descriptor) -> Option<Descriptor> {
        self.cells.insert(cell, descriptor)
    }

    pub(crate) fn take(&mut self, cell: &CellKey) -> Option<Descriptor> {
        self.cells.remove(cell)
    }

    /// Apply `op` to every cell and return exactly what changed.
    ///
    /// Cells already holding the target type (for `Add`) or already empty
    /// (for `Remove`) are skipped, so the fragment never carries a no-op
    /// and replaying its inverse restores the prior state.
    pub fn apply_batch(&mut self, cells: &[CellKey], op: &BatchOp) -> Result<Diff> {
        if cells.is_empty() {
            return Err(EditError::EmptyBatch);
        }

        let mut fragment = Diff::default();
        for &cell in cells {
            match op {
                BatchOp::Add(descriptor) => {
                    let previous = self.cells.get(&cell);
                    if previous.map(|d| d.type_id) == Some(descriptor.type_id) {
                        continue;
                    }
                    if let Some(old) = self.cells.insert(cell, descriptor.clone()) {
                        fragment.cells_removed.insert(cell, old);
                    }
                    fragment.cells_added.insert(cell, descriptor.clone());
                }
                BatchOp::Remove => {
                    if let Some(old) = self.cells.remove(&cell) {
                        fragment.cells_removed.insert(cell, old);
                    }
                }
            }
        }

        debug!(
            "Voxel batch over {} cells: {} added, {} removed",
            cells.len(),
            fragment.cells_added.len(),
            fragment.cells_removed.len()
        );
        Ok(fragment)
    }

    /// Every occupied cell in canonical order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &Descriptor)> {
        self.cells.iter()
    }

    pub fn snapshot(&self) -> &BTreeMap<CellKey, Descriptor> {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut store = VoxelStore::new();
        let c = CellKey::new(4, -2, 9);
        assert!(store.get(&c).is_none());
        assert!(store.set(c, Descriptor::new(5)));
        assert_eq!(store.get(&c), Some(&Descriptor::new(5)));
        assert!(store.remove(&c));
        assert!(store.get(&c).is_none());
        assert!(!store.remove(&c));
    }

    #[test]
    fn test_set_same_type_is_noop() {
        let mut store = VoxelStore::new();
        let c = CellKey::new(0, 0, 0);
        assert!(store.set(c, Descriptor::new(5)));
        assert!(!store.set(c, Descriptor::new(5).with_attribute("tint", "red")));
        assert!(store.get(&c).unwrap().attributes.is_empty());
        assert!(store.set(c, Descriptor::new(6)));
        assert_eq!(store.get(&c).unwrap().type_id, 6);
    }

    #[test]
    fn test_batch_idempotent() {
        let mut store = VoxelStore::new();
        let cells = [CellKey::new(1, 1, 1)];
        let op = BatchOp::Add(Descriptor::new(5));
        let first = store.apply_batch(&cells, &op).unwrap();
        assert_eq!(first.cells_added.len(), 1);
        let second = store.apply_batch(&cells, &op).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_batch_replace_records_both_sides() {
        let mut store = VoxelStore::new();
        let c = CellKey::new(0, 0, 0);
        store.set(c, Descriptor::new(3));
        let fragment = store
            .apply_batch(&[c, CellKey::new(1, 0, 0)], &BatchOp::Add(Descriptor::new(4)))
            .unwrap();
        assert_eq!(fragment.cells_removed.get(&c), Some(&Descriptor::new(3)));
        assert_eq!(fragment.cells_added.len(), 2);
    }

    #[test]
    fn test_batch_remove_skips_empty() {
        let mut store = VoxelStore::new();
        store.set(CellKey::new(0, 0, 0), Descriptor::new(2));
        let fragment = store
            .apply_batch(
                &[CellKey::new(0, 0, 0), CellKey::new(5, 5, 5)],
                &BatchOp::Remove,
            )
            .unwrap();
        assert_eq!(fragment.cells_removed.len(), 1);
        assert!(fragment.cells_added.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let mut store = VoxelStore::new();
        assert!(matches!(
            store.apply_batch(&[], &BatchOp::Remove),
            Err(EditError::EmptyBatch)
        ));
    }

    #[test]
    fn test_iteration_is_ordered() {
        let mut store = VoxelStore::new();
        for key in [CellKey::new(2, 0, 0), CellKey::new(-1, 0, 0), CellKey::new(0, 3, 0)] {
            store.set(key, Descriptor::new(1));
        }
        let keys: Vec<CellKey> = store.cells().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![CellKey::new(-1, 0, 0), CellKey::new(0, 3, 0), CellKey::new(2, 0, 0)]
        );
    }
}
