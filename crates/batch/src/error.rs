use gpubatch_arena::ArenaError;
use gpubatch_common::{GeometryId, InstanceSlot};

use crate::compiler::CompilerState;

/// Errors from the geometry store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("{0} was never registered")]
    Unregistered(GeometryId),
    #[error("{0} is staged but not committed yet")]
    NotCommitted(GeometryId),
    #[error("{id} rejected: {reason}")]
    InvalidGeometry { id: GeometryId, reason: String },
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Errors from compiling or submitting a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("nothing compiled to submit (compiler is {0:?})")]
    NothingCompiled(CompilerState),
    #[error("{0} sits past the largest addressable base vertex")]
    BaseVertexOverflow(GeometryId),
}

/// Errors from loading or validating a [`BatchConfig`](crate::BatchConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from frame orchestration in [`BatchRenderer`](crate::BatchRenderer).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("{0} has no bound item")]
    UnknownItem(InstanceSlot),
}

impl GeometryError {
    /// Whether the caller broke a contract, as opposed to running out of memory.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::Arena(e) => e.is_contract_violation(),
            _ => true,
        }
    }
}
