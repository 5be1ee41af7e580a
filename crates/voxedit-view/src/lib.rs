//! # Voxedit View
//!
//! Read-only render captures of an editing session. A [`RenderFrame`]
//! holds the occupied cells, the dense instance buffers and the preview
//! footprint, serialized as JSON for the frontend renderer.

pub mod render_data;

pub use render_data::{InstanceBatch, RenderCell, RenderFrame};
