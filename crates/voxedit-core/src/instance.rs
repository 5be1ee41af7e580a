use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::TypeId;
use crate::cell::CellKey;
use crate::error::{EditError, Result};
use crate::spatial::SpatialIndex;

/// Stable identity of a placed object. Unlike a slot index it survives
/// swap-removal of other instances.
pub type InstanceId = Uuid;

/// Smallest buffer allocated for a type.
pub const MIN_CAPACITY: usize = 10;

/// Placement transform of one object, laid out for direct upload as
/// per-instance vertex data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceTransform {
    pub position: [f32; 3],
    /// Euler angles in degrees.
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl InstanceTransform {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, rotation: [f32; 3]) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: [f32; 3]) -> Self {
        self.scale = scale;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(&self.rotation)
            .chain(&self.scale)
            .all(|v| v.is_finite())
    }

    /// Position, rotation, scale as nine consecutive floats.
    pub fn to_array(&self) -> [f32; 9] {
        let [px, py, pz] = self.position;
        let [rx, ry, rz] = self.rotation;
        let [sx, sy, sz] = self.scale;
        [px, py, pz, rx, ry, rz, sx, sy, sz]
    }
}

/// A live object together with its type and identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub type_id: TypeId,
    pub transform: InstanceTransform,
}

impl InstanceRecord {
    pub fn new(type_id: TypeId, transform: InstanceTransform) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_id,
            transform,
        }
    }

    pub fn cell(&self) -> CellKey {
        CellKey::containing(self.transform.position)
    }
}

/// Dense transform buffer for one type.
///
/// `transforms.len()` is the capacity; slots `[0, live)` hold live
/// instances and the rest are unused.
#[derive(Debug, Default)]
struct InstanceBuffer {
    transforms: Vec<InstanceTransform>,
    /// Slot to id, one entry per live slot.
    ids: Vec<InstanceId>,
    /// Id to slot.
    slots: HashMap<InstanceId, usize>,
}

impl InstanceBuffer {
    fn live(&self) -> usize {
        self.ids.len()
    }

    fn capacity(&self) -> usize {
        self.transforms.len()
    }

    fn grow(&mut self) -> usize {
        let live = self.live();
        let capacity = MIN_CAPACITY.max(2 * live).max(self.capacity());
        let mut transforms = vec![InstanceTransform::default(); capacity];
        transforms[..live].copy_from_slice(&self.transforms[..live]);
        self.transforms = transforms;
        capacity
    }
}

/// Read-only view of one type's live instances, for instanced drawing.
#[derive(Debug, Clone, Copy)]
pub struct InstanceBatchView<'a> {
    pub type_id: TypeId,
    pub transforms: &'a [InstanceTransform],
    pub capacity: usize,
}

/// Per-type dense instance buffers with O(1) insert and swap-removal.
///
/// Slot indices are only valid until the next `remove_swap` on the same
/// type, which may move the last live instance into the freed slot.
/// Long-lived references must use [`InstanceId`].
#[derive(Debug, Default)]
pub struct InstancePool {
    buffers: BTreeMap<TypeId, InstanceBuffer>,
    owners: HashMap<InstanceId, TypeId>,
    index: SpatialIndex,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = InstanceRecord>) -> Self {
        let mut pool = Self::new();
        for record in records {
            pool.place_record(record);
        }
        pool
    }

    /// Append a new instance and return its slot.
    pub fn place(&mut self, type_id: TypeId, transform: InstanceTransform) -> usize {
        self.place_record(InstanceRecord::new(type_id, transform))
    }

    /// Append an instance keeping the identity it already has. Placing an
    /// id that is already live overwrites its transform in place.
    pub fn place_record(&mut self, record: InstanceRecord) -> usize {
        if let Some(&owner) = self.owners.get(&record.id) {
            if owner == record.type_id {
                let slot = self.buffers[&owner].slots[&record.id];
                self.write_slot(owner, slot, record.transform);
                return slot;
            }
            // Re-typed: drop it from the old buffer first. The id is owned, so
            // removal cannot miss.
            let _ = self.remove(record.id);
        }

        let buffer = self.buffers.entry(record.type_id).or_default();
        let slot = buffer.live();
        if slot >= buffer.capacity() {
            let capacity = buffer.grow();
            debug!(
                "Instance buffer for type {} grew to {} slots",
                record.type_id, capacity
            );
        }
        buffer.transforms[slot] = record.transform;
        buffer.ids.push(record.id);
        buffer.slots.insert(record.id, slot);
        self.owners.insert(record.id, record.type_id);
        self.index.insert(record.id, record.transform.position);
        slot
    }

    /// Reallocate a type's buffer to `max(10, 2 * live)` slots, keeping
    /// live transforms in slot order. Capacity never shrinks.
    pub fn expand(&mut self, type_id: TypeId) -> usize {
        self.buffers.entry(type_id).or_default().grow()
    }

    /// Overwrite a live slot in place, returning the previous record.
    pub fn update(
        &mut self,
        type_id: TypeId,
        slot: usize,
        transform: InstanceTransform,
    ) -> Result<InstanceRecord> {
        let previous = self.record_at(type_id, slot)?;
        self.write_slot(type_id, slot, transform);
        Ok(previous)
    }

    /// Remove the instance in `slot`; the last live instance of the type
    /// moves into the hole. Returns the removed record.
    pub fn remove_swap(&mut self, type_id: TypeId, slot: usize) -> Result<InstanceRecord> {
        let removed = self.record_at(type_id, slot)?;
        let buffer = self
            .buffers
            .get_mut(&type_id)
            .ok_or(EditError::UnknownType(type_id))?;

        let last = buffer.live() - 1;
        if slot != last {
            let moved = buffer.ids[last];
            buffer.transforms[slot] = buffer.transforms[last];
            buffer.ids[slot] = moved;
            buffer.slots.insert(moved, slot);
            debug!("Instance {} of type {} moved from slot {} to {}", moved, type_id, last, slot);
        }
        buffer.transforms[last] = InstanceTransform::default();
        buffer.ids.pop();
        buffer.slots.remove(&removed.id);

        self.owners.remove(&removed.id);
        self.index.remove(removed.id, removed.transform.position);
        Ok(removed)
    }

    /// Remove an instance by identity.
    pub fn remove(&mut self, id: InstanceId) -> Result<InstanceRecord> {
        let (type_id, slot) = self
            .owners
            .get(&id)
            .and_then(|&type_id| Some((type_id, *self.buffers.get(&type_id)?.slots.get(&id)?)))
            .ok_or(EditError::UnknownInstance(id))?;
        self.remove_swap(type_id, slot)
    }

    fn write_slot(&mut self, type_id: TypeId, slot: usize, transform: InstanceTransform) {
        if let Some(buffer) = self.buffers.get_mut(&type_id) {
            let id = buffer.ids[slot];
            let old = std::mem::replace(&mut buffer.transforms[slot], transform);
            self.index.remove(id, old.position);
            self.index.insert(id, transform.position);
        }
    }

    fn record_at(&self, type_id: TypeId, slot: usize) -> Result<InstanceRecord> {
        let buffer = self
            .buffers
            .get(&type_id)
            .ok_or(EditError::UnknownType(type_id))?;
        if slot >= buffer.live() {
            return Err(EditError::SlotOutOfRange {
                type_id,
                slot,
                live: buffer.live(),
            });
        }
        Ok(InstanceRecord {
            id: buffer.ids[slot],
            type_id,
            transform: buffer.transforms[slot],
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, type_id: TypeId, slot: usize) -> Option<&InstanceTransform> {
        let buffer = self.buffers.get(&type_id)?;
        buffer.transforms[..buffer.live()].get(slot)
    }

    pub fn record(&self, id: InstanceId) -> Option<InstanceRecord> {
        let type_id = *self.owners.get(&id)?;
        let slot = self.slot_of(id)?;
        self.record_at(type_id, slot).ok()
    }

    pub fn slot_of(&self, id: InstanceId) -> Option<usize> {
        let type_id = self.owners.get(&id)?;
        self.buffers.get(type_id)?.slots.get(&id).copied()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.owners.contains_key(&id)
    }

    /// Live transforms of one type, in slot order.
    pub fn instances(&self, type_id: TypeId) -> &[InstanceTransform] {
        match self.buffers.get(&type_id) {
            Some(buffer) => &buffer.transforms[..buffer.live()],
            None => &[],
        }
    }

    pub fn live_count(&self, type_id: TypeId) -> usize {
        self.buffers.get(&type_id).map_or(0, |b| b.live())
    }

    pub fn capacity(&self, type_id: TypeId) -> usize {
        self.buffers.get(&type_id).map_or(0, |b| b.capacity())
    }

    pub fn total_live(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn batches(&self) -> impl Iterator<Item = InstanceBatchView<'_>> {
        self.buffers
            .iter()
            .filter(|(_, b)| b.live() > 0)
            .map(|(&type_id, b)| InstanceBatchView {
                type_id,
                transforms: &b.transforms[..b.live()],
                capacity: b.capacity(),
            })
    }

    /// Every live record, ordered by type then slot.
    pub fn records(&self) -> Vec<InstanceRecord> {
        self.buffers
            .iter()
            .flat_map(|(&type_id, b)| {
                b.ids.iter().enumerate().map(move |(slot, &id)| InstanceRecord {
                    id,
                    type_id,
                    transform: b.transforms[slot],
                })
            })
            .collect()
    }

    /// Live records standing in `cell`, ordered by type then slot.
    pub fn instances_in_cell(&self, cell: CellKey) -> Vec<InstanceRecord> {
        let mut found: Vec<(TypeId, usize, InstanceRecord)> = self
            .index
            .query_cell(cell)
            .into_iter()
            .filter_map(|id| {
                let record = self.record(id)?;
                let slot = self.slot_of(id)?;
                Some((record.type_id, slot, record))
            })
            .collect();
        found.sort_by_key(|(type_id, slot, _)| (*type_id, *slot));
        found.into_iter().map(|(_, _, r)| r).collect()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.owners.clear();
        self.index = SpatialIndex::new();
    }
}
