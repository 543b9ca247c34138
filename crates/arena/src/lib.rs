//! Arena allocators over resizable memory blocks.
//!
//! Everything here sits on the [`MemoryBlock`] primitive: a resizable byte
//! buffer with bounds-checked reads and writes. Allocators never hold raw
//! pointers into a block; offsets are re-derived from keys after any growth.
//!
//! # Invariants
//! - Enabled variable allocations never overlap, and
//!   `real_size <= apparent_size <= capacity`.
//! - A slot table always hands out the lowest free index.
//! - A dirty-range flush issues one upload per disjoint run of writes.
//! - No internal locking. Every mutation takes `&mut self`; callers
//!   serialize access per frame.

mod dirty;
mod error;
mod fixed;
mod memory;
mod slots;
mod tagged;
mod variable;

pub use dirty::{DirtyRange, DirtyRangeBuffer, FlushStats};
pub use error::ArenaError;
pub use fixed::FixedSlotAllocator;
pub use memory::{HostMemoryBlock, HostUploadTarget, MemoryBlock, UploadCall, UploadTarget};
pub use slots::FreeListSlotTable;
pub use tagged::{Arena, Tagged};
pub use variable::{Allocation, VariableBlockAllocator};

pub fn crate_info() -> &'static str {
    "gpubatch-arena v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("arena"));
    }
}
