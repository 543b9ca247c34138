use std::collections::BTreeMap;

use gpubatch_common::AllocKey;

use crate::dirty::{DirtyRangeBuffer, FlushStats};
use crate::error::ArenaError;
use crate::memory::{MemoryBlock, UploadTarget};
use crate::tagged::{Arena, Tagged};

/// A byte range owned by one key inside a [`VariableBlockAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub key: AllocKey,
    pub offset_b: u32,
    pub size_b: u32,
}

impl Allocation {
    pub fn end_b(&self) -> u32 {
        self.offset_b + self.size_b
    }
}

/// Variable-size allocator over one memory block.
///
/// Allocations always append at the apparent end. Removal is lazy: a removed
/// allocation leaves a hole until [`compaction`](Self::compaction) slides
/// every live allocation down. Removing the highest allocation shrinks the
/// apparent end right away.
///
/// Entries are kept sorted by offset. Appends go past every existing entry
/// and compaction preserves order.
pub struct VariableBlockAllocator<M> {
    block: M,
    capacity_b: u32,
    apparent_size_b: u32,
    real_size_b: u32,
    next_key: u64,
    key_map: BTreeMap<AllocKey, usize>,
    entries: Vec<Tagged<Allocation>>,
}

impl<M: MemoryBlock> VariableBlockAllocator<M> {
    /// Wrap a block. Its current size becomes the starting capacity.
    pub fn new(block: M) -> Self {
        Self {
            capacity_b: block.size(),
            block,
            apparent_size_b: 0,
            real_size_b: 0,
            next_key: 0,
            key_map: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    /// Allocate `size_b` bytes at the apparent end, doubling the block until it fits.
    pub fn alloc(&mut self, size_b: u32) -> Result<AllocKey, ArenaError> {
        self.grow_to_fit(self.apparent_size_b as u64 + size_b as u64)?;

        let key = AllocKey(self.next_key);
        self.next_key += 1;

        let allocation = Allocation {
            key,
            offset_b: self.apparent_size_b,
            size_b,
        };
        self.key_map.insert(key, self.entries.len());
        self.entries.push(Tagged::live(allocation));

        self.apparent_size_b += size_b;
        self.real_size_b += size_b;

        tracing::trace!(%key, offset_b = allocation.offset_b, size_b, "allocated");
        Ok(key)
    }

    /// Overwrite the whole allocation. `data` must match its size exactly.
    pub fn set(&mut self, key: AllocKey, data: &[u8]) -> Result<(), ArenaError> {
        let allocation = self.info(key)?;
        check_len(&allocation, data.len())?;
        self.block.write(allocation.offset_b, data)
    }

    /// Read the whole allocation into `dst`, which must match its size exactly.
    pub fn get(&self, key: AllocKey, dst: &mut [u8]) -> Result<(), ArenaError> {
        let allocation = self.info(key)?;
        check_len(&allocation, dst.len())?;
        self.block.read(allocation.offset_b, dst)
    }

    /// Current offset and size of a live allocation.
    pub fn info(&self, key: AllocKey) -> Result<Allocation, ArenaError> {
        self.key_map
            .get(&key)
            .map(|&index| self.entries[index].value)
            .ok_or(ArenaError::UnknownKey(key))
    }

    /// Release an allocation.
    pub fn remove(&mut self, key: AllocKey) -> Result<(), ArenaError> {
        let index = self.key_map.remove(&key).ok_or(ArenaError::UnknownKey(key))?;
        let entry = &mut self.entries[index];
        entry.disable();
        self.real_size_b -= entry.value.size_b;

        if index + 1 == self.entries.len() {
            while self.entries.last().is_some_and(|e| !e.enabled) {
                self.entries.pop();
            }
            self.apparent_size_b = self.entries.last().map_or(0, |e| e.value.end_b());
        }
        Ok(())
    }

    /// Slide every live allocation down so that `apparent_size == real_size`.
    ///
    /// Returns `false` without touching memory when there are no holes.
    pub fn compaction(&mut self) -> Result<bool, ArenaError> {
        if self.real_size_b == self.apparent_size_b {
            return Ok(false);
        }
        let _span = tracing::debug_span!("compaction").entered();
        let before_b = self.apparent_size_b;

        self.entries
            .sort_by_key(|e| (!e.enabled, e.value.offset_b));
        let live = self.entries.iter().take_while(|e| e.enabled).count();
        self.entries.truncate(live);

        let largest_b = self
            .entries
            .iter()
            .map(|e| e.value.size_b)
            .max()
            .unwrap_or(0);
        let mut scratch = vec![0u8; largest_b as usize];

        let mut cursor_b = 0u32;
        let mut moved = 0usize;
        for entry in &mut self.entries {
            let allocation = &mut entry.value;
            if allocation.offset_b != cursor_b {
                let buf = &mut scratch[..allocation.size_b as usize];
                self.block.read(allocation.offset_b, buf)?;
                self.block.write(cursor_b, buf)?;
                allocation.offset_b = cursor_b;
                moved += 1;
            }
            cursor_b += allocation.size_b;
        }

        self.apparent_size_b = cursor_b;
        self.real_size_b = cursor_b;
        self.key_map = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, e)| (e.value.key, index))
            .collect();

        tracing::debug!(
            moved,
            live,
            reclaimed_b = before_b - cursor_b,
            "compacted variable arena"
        );
        Ok(true)
    }

    /// Grow the block to at least `capacity_b` bytes in one resize.
    pub fn reserve(&mut self, capacity_b: u32) -> Result<(), ArenaError> {
        if self.capacity_b >= capacity_b {
            return Ok(());
        }
        self.block.resize(capacity_b)?;
        self.capacity_b = capacity_b;
        Ok(())
    }

    /// Make room for `additional_b` more bytes past the apparent end.
    pub fn reserve_additional(&mut self, additional_b: u64) -> Result<(), ArenaError> {
        self.grow_to_fit(self.apparent_size_b as u64 + additional_b)
    }

    fn grow_to_fit(&mut self, required_b: u64) -> Result<(), ArenaError> {
        if required_b <= self.capacity_b as u64 {
            return Ok(());
        }
        if required_b > u32::MAX as u64 {
            return Err(ArenaError::ResizeFailed {
                requested_b: required_b,
                limit_b: u32::MAX as u64,
            });
        }

        let mut capacity_b = (self.capacity_b as u64).max(1);
        while capacity_b < required_b {
            capacity_b *= 2;
        }
        let capacity_b = capacity_b.min(u32::MAX as u64) as u32;

        self.block.resize(capacity_b)?;
        tracing::debug!(
            from_b = self.capacity_b,
            to_b = capacity_b,
            "grew variable arena"
        );
        self.capacity_b = capacity_b;
        Ok(())
    }

    /// Fraction of the apparent size occupied by holes.
    pub fn fragmentation(&self) -> f32 {
        if self.apparent_size_b == 0 {
            return 0.0;
        }
        1.0 - self.real_size_b as f32 / self.apparent_size_b as f32
    }

    /// Live allocations in offset order.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.entries.iter().filter(|e| e.enabled).map(|e| &e.value)
    }

    pub fn apparent_size(&self) -> u32 {
        self.apparent_size_b
    }

    pub fn real_size(&self) -> u32 {
        self.real_size_b
    }

    pub fn capacity(&self) -> u32 {
        self.capacity_b
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.key_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_map.is_empty()
    }

    pub fn memory(&self) -> &M {
        &self.block
    }
}

impl<U: UploadTarget> VariableBlockAllocator<DirtyRangeBuffer<U>> {
    /// Push writes since the last flush to the upload target.
    pub fn flush(&mut self) -> FlushStats {
        self.block.flush()
    }
}

fn check_len(allocation: &Allocation, len: usize) -> Result<(), ArenaError> {
    if len as u64 != allocation.size_b as u64 {
        return Err(ArenaError::SizeMismatch {
            expected_b: allocation.size_b,
            actual_b: len as u64,
        });
    }
    Ok(())
}

impl<M: MemoryBlock> Arena for VariableBlockAllocator<M> {
    type Request = u32;
    type Handle = AllocKey;

    fn alloc(&mut self, size_b: u32) -> Result<AllocKey, ArenaError> {
        VariableBlockAllocator::alloc(self, size_b)
    }

    fn release(&mut self, key: AllocKey) -> Result<(), ArenaError> {
        self.remove(key)
    }

    fn compact(&mut self) -> Result<bool, ArenaError> {
        self.compaction()
    }

    fn live_count(&self) -> usize {
        self.len()
    }
}
