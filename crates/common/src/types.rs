use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// First 8 bytes of the SHA-256 of `name`, little endian.
fn stable_hash(domain: &[u8], name: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(name.as_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[..8]);
    u64::from_le_bytes(bytes)
}

/// Stable identifier of a geometry registered in the shared vertex/index arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeometryId(pub u64);

impl GeometryId {
    /// Derive an id from a path or asset name.
    pub fn from_name(name: &str) -> Self {
        Self(stable_hash(b"geometry:", name))
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geometry#{:016x}", self.0)
    }
}

/// Stable identifier of a material. Draw units sharing one are batched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

impl MaterialId {
    pub fn from_name(name: &str) -> Self {
        Self(stable_hash(b"material:", name))
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "material#{:016x}", self.0)
    }
}

/// Index into a per-instance record buffer. Freed slots are reused lowest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceSlot(pub u32);

impl InstanceSlot {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Opaque key of a variable-size allocation. Never reused within one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocKey(pub u64);

impl fmt::Display for AllocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc#{}", self.0)
    }
}

/// What a GPU-visible buffer is used for. Backends pick usage flags from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferRole {
    /// Shared vertex arena.
    Vertex,
    /// Shared `u32` index arena.
    Index,
    /// Per-instance transform records.
    Instance,
    /// Indirect draw commands.
    Command,
    /// Per-instance indirection array written by the batch compiler.
    InstanceIndex,
}

impl BufferRole {
    pub fn label(self) -> &'static str {
        match self {
            BufferRole::Vertex => "gpubatch_vertex_arena",
            BufferRole::Index => "gpubatch_index_arena",
            BufferRole::Instance => "gpubatch_instance_data",
            BufferRole::Command => "gpubatch_indirect_commands",
            BufferRole::InstanceIndex => "gpubatch_instance_indices",
        }
    }
}
