use log::debug;
use serde::{Deserialize, Serialize};

use voxedit_core::instance::InstanceBatchView;
use voxedit_core::{CellKey, EditSession, PersistenceGateway, PlacementPattern, Result, TypeId};

/// One occupied terrain cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderCell {
    pub key: [i32; 3],
    pub type_id: TypeId,
}

/// Instanced draw data for one environment type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceBatch {
    pub type_id: TypeId,
    pub live_count: usize,
    /// Allocated slots; the renderer may size its GPU buffer to this.
    pub capacity: usize,
    /// Nine floats per live instance: position, rotation, scale.
    pub data: Vec<f32>,
}

impl From<InstanceBatchView<'_>> for InstanceBatch {
    fn from(view: InstanceBatchView<'_>) -> Self {
        Self {
            type_id: view.type_id,
            live_count: view.transforms.len(),
            capacity: view.capacity,
            data: view.transforms.iter().flat_map(|t| t.to_array()).collect(),
        }
    }
}

/// Complete render frame data sent from Rust to the frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderFrame {
    pub cells: Vec<RenderCell>,
    pub batches: Vec<InstanceBatch>,
    /// Cells the pending placement would cover.
    pub preview: Vec<[i32; 3]>,
    pub can_undo: bool,
    pub can_redo: bool,
}

impl RenderFrame {
    pub fn empty() -> Self {
        Self {
            cells: Vec::new(),
            batches: Vec::new(),
            preview: Vec::new(),
            can_undo: false,
            can_redo: false,
        }
    }

    /// Snapshot a session. `preview` is the cursor position and pattern of
    /// a placement not yet applied; `None` for the pattern uses the
    /// session default.
    pub fn capture<G: PersistenceGateway>(
        session: &EditSession<G>,
        preview: Option<([f64; 3], Option<PlacementPattern>)>,
    ) -> Result<Self> {
        let preview = match preview {
            Some((position, pattern)) => session.footprint(position, pattern)?,
            None => Vec::new(),
        };
        let frame = Self {
            cells: session
                .cells()
                .map(|(key, descriptor)| RenderCell {
                    key: key_array(key),
                    type_id: descriptor.type_id,
                })
                .collect(),
            batches: session.instance_batches().map(InstanceBatch::from).collect(),
            preview: preview.iter().map(key_array).collect(),
            can_undo: session.can_undo(),
            can_redo: session.can_redo(),
        };
        debug!(
            "Captured frame: {} cells, {} batches, {} preview cells",
            frame.cells.len(),
            frame.batches.len(),
            frame.preview.len()
        );
        Ok(frame)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn key_array(key: &CellKey) -> [i32; 3] {
    [key.x, key.y, key.z]
}
