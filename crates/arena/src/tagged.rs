use crate::error::ArenaError;

/// An arena entry with a liveness flag.
///
/// Both allocators keep released entries in place, flagged off, until a
/// later pass reuses or reclaims them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tagged<T> {
    pub enabled: bool,
    pub value: T,
}

impl<T> Tagged<T> {
    pub fn live(value: T) -> Self {
        Self {
            enabled: true,
            value,
        }
    }

    pub fn free(value: T) -> Self {
        Self {
            enabled: false,
            value,
        }
    }

    /// Flag the entry off. Returns whether it was live.
    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }
}

/// Common surface of the tagged arenas.
///
/// `Request` is what an allocation needs (a byte size for variable blocks,
/// nothing for fixed slots) and `Handle` is what the caller keeps.
pub trait Arena {
    type Request;
    type Handle: Copy;

    fn alloc(&mut self, request: Self::Request) -> Result<Self::Handle, ArenaError>;

    fn release(&mut self, handle: Self::Handle) -> Result<(), ArenaError>;

    /// Reclaim space held by released entries. Returns whether anything changed.
    fn compact(&mut self) -> Result<bool, ArenaError>;

    fn live_count(&self) -> usize;
}
