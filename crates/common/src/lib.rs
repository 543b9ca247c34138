//! Shared identifiers for the gpubatch workspace.
//!
//! # Invariants
//! - Ids are plain values. Nothing in this crate owns geometry or material data.
//! - Name-derived ids are stable across runs and platforms.

mod types;

pub use types::{AllocKey, BufferRole, GeometryId, InstanceSlot, MaterialId};

pub fn crate_info() -> &'static str {
    "gpubatch-common v0.1.0"
}
