use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};

/// Numeric identifier of a block or environment object type.
pub type TypeId = u32;

pub const BLOCK_BUILTIN: Range<TypeId> = 0..1_000;
pub const BLOCK_CUSTOM: Range<TypeId> = 1_000..10_000;
pub const ENVIRONMENT_BUILTIN: Range<TypeId> = 10_000..11_000;
pub const ENVIRONMENT_CUSTOM: Range<TypeId> = 11_000..20_000;

/// Which store a type id routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCategory {
    /// Grid blocks, held by the voxel store.
    Block,
    /// Freely placed objects, held by the instance pool.
    Environment,
}

impl TypeCategory {
    pub fn of(type_id: TypeId) -> Option<Self> {
        if type_id < BLOCK_CUSTOM.end {
            Some(TypeCategory::Block)
        } else if type_id >= ENVIRONMENT_BUILTIN.start && type_id < ENVIRONMENT_CUSTOM.end {
            Some(TypeCategory::Environment)
        } else {
            None
        }
    }

    pub fn builtin_range(&self) -> Range<TypeId> {
        match self {
            TypeCategory::Block => BLOCK_BUILTIN,
            TypeCategory::Environment => ENVIRONMENT_BUILTIN,
        }
    }

    pub fn custom_range(&self) -> Range<TypeId> {
        match self {
            TypeCategory::Block => BLOCK_CUSTOM,
            TypeCategory::Environment => ENVIRONMENT_CUSTOM,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeCategory::Block => "block",
            TypeCategory::Environment => "environment",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn is_custom(type_id: TypeId) -> bool {
    BLOCK_CUSTOM.contains(&type_id) || ENVIRONMENT_CUSTOM.contains(&type_id)
}

/// Hands out ids for user-defined types.
///
/// Owned by the session context; ids are minted in increasing order
/// within each custom range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeIdAllocator {
    next_block: TypeId,
    next_environment: TypeId,
}

impl Default for TypeIdAllocator {
    fn default() -> Self {
        Self {
            next_block: BLOCK_CUSTOM.start,
            next_environment: ENVIRONMENT_CUSTOM.start,
        }
    }
}

impl TypeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, category: TypeCategory) -> Result<TypeId> {
        let range = category.custom_range();
        let next = match category {
            TypeCategory::Block => &mut self.next_block,
            TypeCategory::Environment => &mut self.next_environment,
        };
        if *next >= range.end {
            return Err(EditError::IdRangeExhausted(category.name()));
        }
        let id = *next;
        *next += 1;
        Ok(id)
    }

    /// Make sure an id that already exists (e.g. loaded from storage) is
    /// never handed out again.
    pub fn observe(&mut self, type_id: TypeId) {
        if BLOCK_CUSTOM.contains(&type_id) {
            self.next_block = self.next_block.max(type_id + 1);
        } else if ENVIRONMENT_CUSTOM.contains(&type_id) {
            self.next_environment = self.next_environment.max(type_id + 1);
        }
    }

    pub fn peek(&self, category: TypeCategory) -> TypeId {
        match category {
            TypeCategory::Block => self.next_block,
            TypeCategory::Environment => self.next_environment,
        }
    }
}

/// A registered block or environment type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub id: TypeId,
    pub name: String,
    pub category: TypeCategory,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl TypeDefinition {
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

/// All types known to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeCatalog {
    types: BTreeMap<TypeId, TypeDefinition>,
    allocator: TypeIdAllocator,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builtin(
        &mut self,
        category: TypeCategory,
        id: TypeId,
        name: &str,
    ) -> Result<&TypeDefinition> {
        if !category.builtin_range().contains(&id) {
            return Err(EditError::WrongCategory(id, category.name()));
        }
        Ok(self.insert(TypeDefinition {
            id,
            name: name.to_string(),
            category,
            attributes: BTreeMap::new(),
        }))
    }

    pub fn register_custom(&mut self, category: TypeCategory, name: &str) -> Result<&TypeDefinition> {
        let id = self.allocator.allocate(category)?;
        Ok(self.insert(TypeDefinition {
            id,
            name: name.to_string(),
            category,
            attributes: BTreeMap::new(),
        }))
    }

    /// Register a definition produced elsewhere (e.g. read back from the
    /// caller's type namespace).
    pub fn restore(&mut self, definition: TypeDefinition) -> Result<&TypeDefinition> {
        match TypeCategory::of(definition.id) {
            Some(category) if category == definition.category => {}
            _ => return Err(EditError::WrongCategory(definition.id, definition.category.name())),
        }
        self.allocator.observe(definition.id);
        Ok(self.insert(definition))
    }

    fn insert(&mut self, definition: TypeDefinition) -> &TypeDefinition {
        let id = definition.id;
        self.types.insert(id, definition);
        &self.types[&id]
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeDefinition> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.types.contains_key(&id)
    }

    /// Resolve an id for a command, failing if it was never registered.
    pub fn require(&self, id: TypeId) -> Result<&TypeDefinition> {
        self.types.get(&id).ok_or(EditError::UnknownType(id))
    }

    pub fn by_category(&self, category: TypeCategory) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values().filter(move |t| t.category == category)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn allocator(&self) -> &TypeIdAllocator {
        &self.allocator
    }
}
