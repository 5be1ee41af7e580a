//! # Voxedit Core
//!
//! Spatial placement and edit history for a voxel world editor: a sparse
//! cell store for terrain, dense per-type instance buffers for
//! environment objects, pattern footprints, and a bounded undo/redo
//! history written through an async persistence gateway.

pub mod catalog;
pub mod cell;
pub mod commands;
pub mod diff;
pub mod error;
pub mod history;
pub mod instance;
pub mod pattern;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod spatial;
pub mod voxel;

pub use catalog::{TypeCatalog, TypeCategory, TypeDefinition, TypeId};
pub use cell::CellKey;
pub use commands::{Command, EditCommand, EditLayer, PlacementCommand, RemovalCommand};
pub use diff::{BaseState, Diff};
pub use error::{EditError, ErrorKind, Result};
pub use history::{HistoryManager, HistoryOutcome};
pub use instance::{InstanceId, InstancePool, InstanceRecord, InstanceTransform};
pub use pattern::PlacementPattern;
pub use persistence::{MemoryGateway, PersistenceError, PersistenceGateway};
pub use session::EditSession;
pub use settings::{HistoryConfig, SessionSettings};
pub use voxel::{Descriptor, VoxelStore};
