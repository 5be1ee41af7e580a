use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::cell::CellKey;
use crate::instance::{InstanceId, InstancePool, InstanceRecord};
use crate::voxel::{Descriptor, VoxelStore};

/// What one edit gesture changed. A delta, never a snapshot.
///
/// A cell whose descriptor was replaced appears in both maps; an instance
/// that moved appears in both lists under the same id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub cells_added: BTreeMap<CellKey, Descriptor>,
    #[serde(default)]
    pub cells_removed: BTreeMap<CellKey, Descriptor>,
    #[serde(default)]
    pub instances_added: Vec<InstanceRecord>,
    #[serde(default)]
    pub instances_removed: Vec<InstanceRecord>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.cells_added.is_empty()
            && self.cells_removed.is_empty()
            && self.instances_added.is_empty()
            && self.instances_removed.is_empty()
    }

    /// The diff that undoes this one.
    pub fn inverse(&self) -> Diff {
        Diff {
            cells_added: self.cells_removed.clone(),
            cells_removed: self.cells_added.clone(),
            instances_added: self.instances_removed.clone(),
            instances_removed: self.instances_added.clone(),
        }
    }

    /// Replay onto live stores: removals first, then additions.
    pub fn apply_to(&self, voxels: &mut VoxelStore, instances: &mut InstancePool) {
        for cell in self.cells_removed.keys() {
            voxels.take(cell);
        }
        for (cell, descriptor) in &self.cells_added {
            voxels.put(*cell, descriptor.clone());
        }
        for record in &self.instances_removed {
            // An instance that is already gone needs no removal.
            let _ = instances.remove(record.id);
        }
        for record in &self.instances_added {
            instances.place_record(record.clone());
        }
    }

    /// Number of touched cells and instances, for logging.
    pub fn len(&self) -> usize {
        self.cells_added.len()
            + self.cells_removed.len()
            + self.instances_added.len()
            + self.instances_removed.len()
    }
}

/// The state the retained undo log replays on top of. Old diffs are
/// folded into it by consolidation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseState {
    pub cells: BTreeMap<CellKey, Descriptor>,
    pub instances: BTreeMap<InstanceId, InstanceRecord>,
}

impl BaseState {
    pub fn capture(voxels: &VoxelStore, instances: &InstancePool) -> Self {
        Self {
            cells: voxels.snapshot().clone(),
            instances: instances.records().into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    pub fn apply(&mut self, diff: &Diff) {
        for cell in diff.cells_removed.keys() {
            self.cells.remove(cell);
        }
        for (cell, descriptor) in &diff.cells_added {
            self.cells.insert(*cell, descriptor.clone());
        }
        for record in &diff.instances_removed {
            self.instances.remove(&record.id);
        }
        for record in &diff.instances_added {
            self.instances.insert(record.id, record.clone());
        }
    }
}

/// Pre-edit values of everything touched during an open gesture.
///
/// Only the first touch of a key is kept; resolving against live state at
/// gesture end yields the net change, so placing and then removing the same
/// cell within one gesture leaves nothing behind.
#[derive(Debug, Default)]
pub struct EditJournal {
    cells: BTreeMap<CellKey, Option<Descriptor>>,
    instances: HashMap<InstanceId, Option<InstanceRecord>>,
    instance_order: Vec<InstanceId>,
}

impl EditJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.instances.is_empty()
    }

    pub fn record(&mut self, fragment: &Diff) {
        for (cell, old) in &fragment.cells_removed {
            self.cells.entry(*cell).or_insert_with(|| Some(old.clone()));
        }
        for cell in fragment.cells_added.keys() {
            self.cells.entry(*cell).or_insert(None);
        }
        for record in &fragment.instances_removed {
            self.touch_instance(record.id, Some(record));
        }
        for record in &fragment.instances_added {
            self.touch_instance(record.id, None);
        }
    }

    fn touch_instance(&mut self, id: InstanceId, before: Option<&InstanceRecord>) {
        if !self.instances.contains_key(&id) {
            self.instances.insert(id, before.cloned());
            self.instance_order.push(id);
        }
    }

    /// Net change between the recorded pre-edit values and live state.
    pub fn resolve(self, voxels: &VoxelStore, instances: &InstancePool) -> Diff {
        let mut diff = Diff::default();

        for (cell, before) in self.cells {
            let after = voxels.get(&cell);
            if before.as_ref() == after {
                continue;
            }
            if let Some(old) = before {
                diff.cells_removed.insert(cell, old);
            }
            if let Some(new) = after {
                diff.cells_added.insert(cell, new.clone());
            }
        }

        let mut touched = self.instances;
        for id in self.instance_order {
            let before = touched.remove(&id).flatten();
            let after = instances.record(id);
            if before == after {
                continue;
            }
            if let Some(old) = before {
                diff.instances_removed.push(old);
            }
            if let Some(new) = after {
                diff.instances_added.push(new);
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceTransform;
    use crate::voxel::BatchOp;

    const TREE: u32 = 10_001;

    #[test]
    fn test_inverse_swaps_sides() {
        let mut diff = Diff::default();
        diff.cells_added.insert(CellKey::new(0, 0, 0), Descriptor::new(5));
        diff.instances_removed
            .push(InstanceRecord::new(TREE, InstanceTransform::default()));
        let inv = diff.inverse();
        assert_eq!(inv.cells_removed, diff.cells_added);
        assert!(inv.cells_added.is_empty());
        assert_eq!(inv.instances_added, diff.instances_removed);
        assert_eq!(inv.inverse(), diff);
    }

    #[test]
    fn test_apply_then_inverse_restores() {
        let mut voxels = VoxelStore::new();
        let mut instances = InstancePool::new();
        voxels.set(CellKey::new(0, 0, 0), Descriptor::new(1));
        instances.place(TREE, InstanceTransform::at([3.5, 0.0, 3.5]));
        let before_cells = voxels.clone();
        let before_instances = instances.records();

        let mut journal = EditJournal::new();
        let fragment = voxels
            .apply_batch(
                &[CellKey::new(0, 0, 0), CellKey::new(1, 0, 0)],
                &BatchOp::Add(Descriptor::new(2)),
            )
            .unwrap();
        journal.record(&fragment);
        let removed = instances.remove_swap(TREE, 0).unwrap();
        journal.record(&Diff {
            instances_removed: vec![removed],
            ..Default::default()
        });
        let diff = journal.resolve(&voxels, &instances);
        assert_eq!(diff.cells_added.len(), 2);
        assert_eq!(diff.cells_removed.len(), 1);
        assert_eq!(diff.instances_removed.len(), 1);

        diff.inverse().apply_to(&mut voxels, &mut instances);
        assert_eq!(voxels, before_cells);
        assert_eq!(instances.records(), before_instances);
    }

    #[test]
    fn test_journal_nets_out_round_trips() {
        let mut voxels = VoxelStore::new();
        let instances = InstancePool::new();
        let mut journal = EditJournal::new();
        let c = [CellKey::new(2, 0, 2)];
        journal.record(&voxels.apply_batch(&c, &BatchOp::Add(Descriptor::new(9))).unwrap());
        journal.record(&voxels.apply_batch(&c, &BatchOp::Remove).unwrap());
        assert!(!journal.is_empty());
        assert!(journal.resolve(&voxels, &instances).is_empty());
    }

    #[test]
    fn test_journal_keeps_first_value() {
        let mut voxels = VoxelStore::new();
        let instances = InstancePool::new();
        let c = CellKey::new(0, 0, 0);
        voxels.set(c, Descriptor::new(1));
        let mut journal = EditJournal::new();
        journal.record(&voxels.apply_batch(&[c], &BatchOp::Add(Descriptor::new(2))).unwrap());
        journal.record(&voxels.apply_batch(&[c], &BatchOp::Add(Descriptor::new(3))).unwrap());
        let diff = journal.resolve(&voxels, &instances);
        assert_eq!(diff.cells_removed[&c], Descriptor::new(1));
        assert_eq!(diff.cells_added[&c], Descriptor::new(3));
    }

    #[test]
    fn test_base_state_fold() {
        let mut base = BaseState::default();
        let mut first = Diff::default();
        first.cells_added.insert(CellKey::new(0, 0, 0), Descriptor::new(1));
        let mut second = Diff::default();
        second.cells_removed.insert(CellKey::new(0, 0, 0), Descriptor::new(1));
        second.cells_added.insert(CellKey::new(0, 0, 0), Descriptor::new(2));
        base.apply(&first);
        base.apply(&second);
        assert_eq!(base.cells[&CellKey::new(0, 0, 0)], Descriptor::new(2));
    }

    #[test]
    fn test_diff_json_shape() {
        let mut diff = Diff::default();
        diff.cells_added.insert(CellKey::new(1, 2, 3), Descriptor::new(5));
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["cells_added"]["1,2,3"]["type_id"], 5);
        let back: Diff = serde_json::from_value(json).unwrap();
        assert_eq!(back, diff);
    }
}
