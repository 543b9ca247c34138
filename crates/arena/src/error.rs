use gpubatch_common::AllocKey;

/// Errors from memory blocks and the allocators built on them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("access out of bounds: offset {offset_b} + size {size_b} exceeds {capacity_b} bytes")]
    OutOfBounds {
        offset_b: u64,
        size_b: u64,
        capacity_b: u32,
    },
    #[error("resize to {requested_b} bytes failed (limit {limit_b})")]
    ResizeFailed { requested_b: u64, limit_b: u64 },
    #[error("unknown allocation key {0}")]
    UnknownKey(AllocKey),
    #[error("data of {actual_b} bytes does not match allocation of {expected_b} bytes")]
    SizeMismatch { expected_b: u32, actual_b: u64 },
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: u32, len: u32 },
    #[error("slot {0} was never allocated")]
    UnknownSlot(u32),
    #[error("slot {0} is not live")]
    SlotNotLive(u32),
    #[error("memory block of {size_b} bytes is not a multiple of the {elem_b}-byte element")]
    Misaligned { size_b: u32, elem_b: u32 },
}

impl ArenaError {
    /// True for caller contract violations, as opposed to resource exhaustion.
    ///
    /// A contract violation means an offset or index map would have been
    /// corrupted had the call gone through. Callers should not retry.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, ArenaError::ResizeFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_not_a_contract_violation() {
        let err = ArenaError::ResizeFailed {
            requested_b: 64,
            limit_b: 32,
        };
        assert!(!err.is_contract_violation());
        assert!(ArenaError::UnknownKey(AllocKey(3)).is_contract_violation());
    }

    #[test]
    fn messages_name_the_key() {
        let msg = ArenaError::UnknownKey(AllocKey(42)).to_string();
        assert!(msg.contains("alloc#42"));
    }
}
