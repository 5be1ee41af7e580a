use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::{TypeCatalog, TypeCategory, TypeId};
use crate::cell::CellKey;
use crate::diff::Diff;
use crate::error::{EditError, Result};
use crate::instance::{InstancePool, InstanceRecord, InstanceTransform};
use crate::pattern::PlacementPattern;
use crate::voxel::{BatchOp, Descriptor, VoxelStore};

/// Everything a command may read or mutate.
pub struct EditTarget<'a> {
    pub catalog: &'a TypeCatalog,
    pub voxels: &'a mut VoxelStore,
    pub instances: &'a mut InstancePool,
}

/// A placement or removal issued by the UI.
///
/// Commands validate all input before touching a store and return the
/// diff of what actually changed.
pub trait Command: std::fmt::Debug {
    fn execute(&self, target: &mut EditTarget<'_>) -> Result<Diff>;
    /// Human-readable description for logs and history menus.
    fn description(&self) -> &str;
}

fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

/// Stamp a type over a pattern footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementCommand {
    pub type_id: TypeId,
    /// World-space position of the footprint centre.
    pub position: [f64; 3],
    #[serde(default)]
    pub pattern: PlacementPattern,
    /// Euler rotation in degrees, used for environment objects.
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
}

impl PlacementCommand {
    pub fn new(type_id: TypeId, position: [f64; 3]) -> Self {
        Self {
            type_id,
            position,
            pattern: PlacementPattern::Single,
            rotation: [0.0; 3],
            scale: unit_scale(),
        }
    }

    pub fn with_pattern(mut self, pattern: PlacementPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_rotation(mut self, rotation: [f32; 3]) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: [f32; 3]) -> Self {
        self.scale = scale;
        self
    }

    pub fn footprint(&self) -> Result<Vec<CellKey>> {
        self.pattern.footprint(CellKey::try_from_world(self.position)?)
    }

    fn transform_at(&self, cell: CellKey) -> InstanceTransform {
        InstanceTransform::at(cell.anchor())
            .with_rotation(self.rotation)
            .with_scale(self.scale)
    }

    fn place_objects(&self, cells: &[CellKey], instances: &mut InstancePool) -> Diff {
        let mut fragment = Diff::default();
        for &cell in cells {
            let occupied = instances
                .instances_in_cell(cell)
                .iter()
                .any(|r| r.type_id == self.type_id);
            if occupied {
                continue;
            }
            let record = InstanceRecord::new(self.type_id, self.transform_at(cell));
            instances.place_record(record.clone());
            fragment.instances_added.push(record);
        }
        fragment
    }
}

impl Command for PlacementCommand {
    fn execute(&self, target: &mut EditTarget<'_>) -> Result<Diff> {
        let cells = self.footprint()?;
        let definition = target.catalog.require(self.type_id)?;
        let category = TypeCategory::of(self.type_id)
            .ok_or(EditError::WrongCategory(self.type_id, definition.category.name()))?;

        let fragment = match category {
            TypeCategory::Block => {
                let descriptor = Descriptor {
                    type_id: self.type_id,
                    attributes: definition.attributes.clone(),
                };
                target.voxels.apply_batch(&cells, &BatchOp::Add(descriptor))?
            }
            TypeCategory::Environment => {
                if !self.transform_at(cells[0]).is_finite() {
                    return Err(EditError::NonFiniteTransform);
                }
                self.place_objects(&cells, target.instances)
            }
        };
        debug!(
            "{} type {} with {} pattern: {} changes",
            self.description(),
            self.type_id,
            self.pattern,
            fragment.len()
        );
        Ok(fragment)
    }

    fn description(&self) -> &str {
        "Place"
    }
}

/// Which store a removal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditLayer {
    #[default]
    Terrain,
    Environment,
}

/// Clear a pattern footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalCommand {
    pub position: [f64; 3],
    #[serde(default)]
    pub pattern: PlacementPattern,
    #[serde(default)]
    pub layer: EditLayer,
    /// Restrict environment removal to one object type.
    #[serde(default)]
    pub only_type: Option<TypeId>,
}

impl RemovalCommand {
    pub fn new(position: [f64; 3], layer: EditLayer) -> Self {
        Self {
            position,
            pattern: PlacementPattern::Single,
            layer,
            only_type: None,
        }
    }

    pub fn with_pattern(mut self, pattern: PlacementPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn only_type(mut self, type_id: TypeId) -> Self {
        self.only_type = Some(type_id);
        self
    }

    pub fn footprint(&self) -> Result<Vec<CellKey>> {
        self.pattern.footprint(CellKey::try_from_world(self.position)?)
    }
}

impl Command for RemovalCommand {
    fn execute(&self, target: &mut EditTarget<'_>) -> Result<Diff> {
        let cells = self.footprint()?;
        if let Some(type_id) = self.only_type {
            target.catalog.require(type_id)?;
        }

        let fragment = match self.layer {
            EditLayer::Terrain => target.voxels.apply_batch(&cells, &BatchOp::Remove)?,
            EditLayer::Environment => {
                let mut fragment = Diff::default();
                for cell in cells {
                    for record in target.instances.instances_in_cell(cell) {
                        if self.only_type.is_some_and(|t| t != record.type_id) {
                            continue;
                        }
                        if let Ok(removed) = target.instances.remove(record.id) {
                            fragment.instances_removed.push(removed);
                        }
                    }
                }
                fragment
            }
        };
        debug!(
            "{} {:?} with {} pattern: {} changes",
            self.description(),
            self.layer,
            self.pattern,
            fragment.len()
        );
        Ok(fragment)
    }

    fn description(&self) -> &str {
        "Remove"
    }
}

/// Either kind of command, as received over the UI boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EditCommand {
    Place(PlacementCommand),
    Remove(RemovalCommand),
}

impl Command for EditCommand {
    fn execute(&self, target: &mut EditTarget<'_>) -> Result<Diff> {
        match self {
            EditCommand::Place(c) => c.execute(target),
            EditCommand::Remove(c) => c.execute(target),
        }
    }

    fn description(&self) -> &str {
        match self {
            EditCommand::Place(c) => c.description(),
            EditCommand::Remove(c) => c.description(),
        }
    }
}

impl From<PlacementCommand> for EditCommand {
    fn from(command: PlacementCommand) -> Self {
        EditCommand::Place(command)
    }
}

impl From<RemovalCommand> for EditCommand {
    fn from(command: RemovalCommand) -> Self {
        EditCommand::Remove(command)
    }
}
