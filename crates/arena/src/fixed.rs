use std::marker::PhantomData;

use bytemuck::Pod;

use crate::dirty::{DirtyRangeBuffer, FlushStats};
use crate::error::ArenaError;
use crate::memory::{MemoryBlock, UploadTarget};

/// Typed, grow-only array view over a memory block.
///
/// Elements are never freed individually. The block is always exactly
/// `capacity * size_of::<T>()` bytes.
pub struct FixedSlotAllocator<T, M> {
    block: M,
    capacity: u32,
    len: u32,
    _elem: PhantomData<T>,
}

impl<T: Pod, M: MemoryBlock> FixedSlotAllocator<T, M> {
    const ELEM_B: u32 = std::mem::size_of::<T>() as u32;

    /// Wrap a block whose size is a whole number of elements. Starts empty.
    pub fn new(block: M) -> Result<Self, ArenaError> {
        let size_b = block.size();
        if Self::ELEM_B == 0 || size_b % Self::ELEM_B != 0 {
            return Err(ArenaError::Misaligned {
                size_b,
                elem_b: Self::ELEM_B,
            });
        }
        Ok(Self {
            capacity: size_b / Self::ELEM_B,
            block,
            len: 0,
            _elem: PhantomData,
        })
    }

    pub fn reserve(&mut self, capacity: u32) -> Result<(), ArenaError> {
        if self.capacity >= capacity {
            return Ok(());
        }
        self.set_capacity(capacity)
    }

    /// Set the element count, growing the block if needed. New elements read as zero.
    pub fn resize(&mut self, len: u32) -> Result<(), ArenaError> {
        self.reserve(len)?;
        self.len = len;
        Ok(())
    }

    /// Resize the block to exactly `capacity` elements, truncating `len` if needed.
    pub fn set_capacity(&mut self, capacity: u32) -> Result<(), ArenaError> {
        let size_b = capacity as u64 * Self::ELEM_B as u64;
        if size_b > u32::MAX as u64 {
            return Err(ArenaError::ResizeFailed {
                requested_b: size_b,
                limit_b: u32::MAX as u64,
            });
        }
        self.block.resize(size_b as u32)?;
        tracing::trace!(from = self.capacity, to = capacity, "fixed arena capacity");
        self.capacity = capacity;
        self.len = self.len.min(capacity);
        Ok(())
    }

    /// Append, doubling capacity when full.
    pub fn add(&mut self, value: T) -> Result<(), ArenaError> {
        if self.len == self.capacity {
            let doubled = self.capacity.checked_mul(2).ok_or(ArenaError::ResizeFailed {
                requested_b: self.capacity as u64 * 2 * Self::ELEM_B as u64,
                limit_b: u32::MAX as u64,
            })?;
            self.set_capacity(doubled.max(1))?;
        }
        self.block
            .write(self.len * Self::ELEM_B, bytemuck::bytes_of(&value))?;
        self.len += 1;
        Ok(())
    }

    /// Overwrite element `index`. `index == len` appends.
    pub fn set(&mut self, index: u32, value: &T) -> Result<(), ArenaError> {
        if index > self.len {
            return Err(ArenaError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        if index == self.len {
            return self.add(*value);
        }
        self.block
            .write(index * Self::ELEM_B, bytemuck::bytes_of(value))
    }

    pub fn get(&self, index: u32) -> Result<T, ArenaError> {
        if index >= self.len {
            return Err(ArenaError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        let mut value = T::zeroed();
        self.block
            .read(index * Self::ELEM_B, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Replace the contents with `values` in a single contiguous write.
    ///
    /// Capacity grows to at least double so that a slowly rising count does
    /// not resize the block every call.
    pub fn assign(&mut self, values: &[T]) -> Result<(), ArenaError> {
        let len = u32::try_from(values.len()).map_err(|_| ArenaError::ResizeFailed {
            requested_b: values.len() as u64 * Self::ELEM_B as u64,
            limit_b: u32::MAX as u64,
        })?;
        if len > self.capacity {
            self.set_capacity(len.max(self.capacity.saturating_mul(2)))?;
        }
        self.len = len;
        if !values.is_empty() {
            self.block.write(0, bytemuck::cast_slice(values))?;
        }
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Byte stride between elements.
    pub fn stride(&self) -> u32 {
        Self::ELEM_B
    }

    pub fn memory(&self) -> &M {
        &self.block
    }
}

impl<T: Pod, U: UploadTarget> FixedSlotAllocator<T, DirtyRangeBuffer<U>> {
    pub fn flush(&mut self) -> FlushStats {
        self.block.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostMemoryBlock;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, Zeroable)]
    struct Pair {
        a: u32,
        b: f32,
    }

    fn pairs(capacity: u32) -> FixedSlotAllocator<Pair, HostMemoryBlock> {
        FixedSlotAllocator::new(HostMemoryBlock::new(capacity * 8)).unwrap()
    }

    #[test]
    fn misaligned_block_is_rejected() {
        let err = FixedSlotAllocator::<Pair, _>::new(HostMemoryBlock::new(12))
            .err()
            .unwrap();
        assert_eq!(err, ArenaError::Misaligned { size_b: 12, elem_b: 8 });
    }

    #[test]
    fn add_doubles_capacity() {
        let mut v = pairs(2);
        for i in 0..5 {
            v.add(Pair { a: i, b: i as f32 }).unwrap();
        }
        assert_eq!(v.len(), 5);
        assert_eq!(v.capacity(), 8);
        assert_eq!(v.memory().size(), 64);
        assert_eq!(v.get(3).unwrap(), Pair { a: 3, b: 3.0 });
    }

    #[test]
    fn add_from_zero_capacity() {
        let mut v = pairs(0);
        v.add(Pair { a: 1, b: 0.5 }).unwrap();
        assert_eq!(v.capacity(), 1);
        assert_eq!(v.get(0).unwrap().a, 1);
    }

    #[test]
    fn set_appends_at_len_and_rejects_gaps() {
        let mut v = pairs(4);
        v.set(0, &Pair { a: 7, b: 0.0 }).unwrap();
        assert_eq!(v.len(), 1);
        v.set(0, &Pair { a: 8, b: 0.0 }).unwrap();
        assert_eq!(v.get(0).unwrap().a, 8);
        let err = v.set(3, &Pair { a: 1, b: 0.0 }).unwrap_err();
        assert_eq!(err, ArenaError::IndexOutOfRange { index: 3, len: 1 });
    }

    #[test]
    fn get_past_len_is_an_error() {
        let mut v = pairs(4);
        v.resize(2).unwrap();
        assert_eq!(v.get(1).unwrap(), Pair::zeroed());
        assert!(matches!(
            v.get(2),
            Err(ArenaError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn set_capacity_truncates_len() {
        let mut v = pairs(4);
        v.resize(4).unwrap();
        v.set_capacity(2).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.memory().size(), 16);
    }

    #[test]
    fn assign_replaces_contents() {
        let mut v = pairs(1);
        let values: Vec<_> = (0..6).map(|i| Pair { a: i, b: 1.0 }).collect();
        v.assign(&values).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v.get(5).unwrap().a, 5);
        v.assign(&values[..2]).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.capacity(), 6);
        v.assign(&[]).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn growth_failure_propagates() {
        let mut v: FixedSlotAllocator<Pair, _> =
            FixedSlotAllocator::new(HostMemoryBlock::with_limit(8, 8)).unwrap();
        v.add(Pair::zeroed()).unwrap();
        assert!(matches!(
            v.add(Pair::zeroed()),
            Err(ArenaError::ResizeFailed { .. })
        ));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn flush_uploads_assigned_values() {
        use crate::memory::HostUploadTarget;

        let block = DirtyRangeBuffer::new(8, HostUploadTarget::new());
        let mut a: FixedSlotAllocator<u32, _> = FixedSlotAllocator::new(block).unwrap();
        a.add(1).unwrap();
        a.add(2).unwrap();
        assert!(a.flush().full_upload);
        a.set(1, &5).unwrap();
        let stats = a.flush();
        assert!(!stats.full_upload);
        assert_eq!(stats.range_uploads, 1);
        assert_eq!(a.memory().target().as_bytes(), a.memory().as_bytes());
    }
}
