use thiserror::Error;

use crate::catalog::TypeId;
use crate::instance::InstanceId;
use crate::persistence::PersistenceError;

/// Coarse classification of an [`EditError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any mutation.
    Validation,
    /// Reference to an unknown type id, instance or slot.
    NotFound,
    /// The durable store failed; in-memory state stays authoritative.
    Persistence,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Batch contains no cells")]
    EmptyBatch,

    #[error("Non-finite coordinate in {0:?}")]
    NonFiniteCoordinate([f64; 3]),

    #[error("Instance transform contains a non-finite component")]
    NonFiniteTransform,

    #[error("Coordinate {0:?} is outside the addressable grid")]
    CoordinateOutOfRange([f64; 3]),

    #[error("Unknown placement pattern '{0}'")]
    UnknownPattern(String),

    #[error("Invalid cell key '{0}'")]
    InvalidCellKey(String),

    #[error("Type id {0} does not belong to the {1} range")]
    WrongCategory(TypeId, &'static str),

    #[error("Custom {0} type id range is exhausted")]
    IdRangeExhausted(&'static str),

    #[error("Invalid history configuration: {0}")]
    InvalidConfig(String),

    #[error("An edit is already being recorded")]
    EditInProgress,

    #[error("No edit is being recorded")]
    NoOpenEdit,

    #[error("Unknown type id {0}")]
    UnknownType(TypeId),

    #[error("Slot {slot} is out of range for type {type_id} (live count {live})")]
    SlotOutOfRange {
        type_id: TypeId,
        slot: usize,
        live: usize,
    },

    #[error("Unknown instance {0}")]
    UnknownInstance(InstanceId),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl EditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditError::UnknownType(_)
            | EditError::SlotOutOfRange { .. }
            | EditError::UnknownInstance(_) => ErrorKind::NotFound,
            EditError::Persistence(_) => ErrorKind::Persistence,
            _ => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, EditError>;
