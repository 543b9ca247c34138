use bytemuck::Pod;
use gpubatch_common::InstanceSlot;

use crate::dirty::{DirtyRangeBuffer, FlushStats};
use crate::error::ArenaError;
use crate::fixed::FixedSlotAllocator;
use crate::memory::{MemoryBlock, UploadTarget};
use crate::tagged::{Arena, Tagged};

/// Index-addressed record table with lowest-index reuse.
///
/// Records live in a [`FixedSlotAllocator`] whose length always equals the
/// table capacity. Each slot carries a liveness flag and an optional staged
/// value that is written on [`commit`](Self::commit).
///
/// `next_empty` never points past the lowest free slot, so the live set stays
/// packed near the front and downstream buffers sized to the table stay small.
pub struct FreeListSlotTable<T, M> {
    records: FixedSlotAllocator<T, M>,
    slots: Vec<Tagged<Option<T>>>,
    next_empty: u32,
    live: u32,
}

impl<T: Pod, M: MemoryBlock> FreeListSlotTable<T, M> {
    pub fn new(block: M, initial_capacity: u32) -> Result<Self, ArenaError> {
        let mut records = FixedSlotAllocator::new(block)?;
        records.resize(initial_capacity)?;
        Ok(Self {
            slots: vec![Tagged::free(None); records.len() as usize],
            records,
            next_empty: 0,
            live: 0,
        })
    }

    /// Hand out the lowest free slot, doubling the table when none is left.
    pub fn alloc(&mut self) -> Result<InstanceSlot, ArenaError> {
        loop {
            if self.next_empty == self.records.len() {
                let doubled = self.records.len().saturating_mul(2).max(1);
                self.grow(doubled)?;
            }

            let index = self.next_empty;
            self.next_empty += 1;

            let slot = &mut self.slots[index as usize];
            if !slot.enabled {
                slot.enabled = true;
                self.live += 1;
                return Ok(InstanceSlot(index));
            }
        }
    }

    /// Free a slot for reuse. Releasing a free slot does nothing.
    pub fn release(&mut self, slot: InstanceSlot) -> Result<(), ArenaError> {
        let index = slot.index();
        let entry = self
            .slots
            .get_mut(index as usize)
            .ok_or(ArenaError::UnknownSlot(index))?;
        if !entry.disable() {
            return Ok(());
        }
        entry.value = None;
        self.live -= 1;
        self.next_empty = self.next_empty.min(index);
        Ok(())
    }

    /// Write a record immediately.
    pub fn set(&mut self, slot: InstanceSlot, value: &T) -> Result<(), ArenaError> {
        self.check_live(slot)?;
        self.slots[slot.index() as usize].value = None;
        self.records.set(slot.index(), value)
    }

    /// Stage a record to be written by the next [`commit`](Self::commit).
    /// A later stage for the same slot replaces the earlier one.
    pub fn stage(&mut self, slot: InstanceSlot, value: T) -> Result<(), ArenaError> {
        self.check_live(slot)?;
        self.slots[slot.index() as usize].value = Some(value);
        Ok(())
    }

    /// Write every staged record, in slot order. Returns how many were written.
    pub fn commit(&mut self) -> Result<usize, ArenaError> {
        let mut written = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                self.records.set(index as u32, &value)?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn get(&self, slot: InstanceSlot) -> Result<T, ArenaError> {
        self.check_live(slot)?;
        self.records.get(slot.index())
    }

    pub fn is_live(&self, slot: InstanceSlot) -> bool {
        self.slots
            .get(slot.index() as usize)
            .is_some_and(|s| s.enabled)
    }

    /// Number of live slots.
    pub fn live(&self) -> u32 {
        self.live
    }

    /// Number of slots, live or free. Matches the record buffer length.
    pub fn capacity(&self) -> u32 {
        self.records.len()
    }

    /// Where the next allocation scan starts.
    pub fn next_empty(&self) -> u32 {
        self.next_empty
    }

    pub fn memory(&self) -> &M {
        self.records.memory()
    }

    /// Drop free slots past the highest live one. Live slots never move.
    pub fn shrink_to_live(&mut self) -> Result<bool, ArenaError> {
        let keep = self
            .slots
            .iter()
            .rposition(|s| s.enabled)
            .map_or(0, |highest| highest + 1)
            .max(1);
        if keep >= self.slots.len() {
            return Ok(false);
        }
        self.records.set_capacity(keep as u32)?;
        self.slots.truncate(keep);
        self.next_empty = self.next_empty.min(keep as u32);
        tracing::debug!(capacity = keep, live = self.live, "shrank slot table");
        Ok(true)
    }

    fn grow(&mut self, capacity: u32) -> Result<(), ArenaError> {
        self.records.resize(capacity)?;
        self.slots.resize(capacity as usize, Tagged::free(None));
        tracing::debug!(capacity, live = self.live, "grew slot table");
        Ok(())
    }

    fn check_live(&self, slot: InstanceSlot) -> Result<(), ArenaError> {
        match self.slots.get(slot.index() as usize) {
            None => Err(ArenaError::UnknownSlot(slot.index())),
            Some(s) if !s.enabled => Err(ArenaError::SlotNotLive(slot.index())),
            Some(_) => Ok(()),
        }
    }
}

impl<T: Pod, U: UploadTarget> FreeListSlotTable<T, DirtyRangeBuffer<U>> {
    /// Push record writes since the last flush to the upload target.
    pub fn flush(&mut self) -> FlushStats {
        self.records.flush()
    }
}

impl<T: Pod, M: MemoryBlock> Arena for FreeListSlotTable<T, M> {
    type Request = ();
    type Handle = InstanceSlot;

    fn alloc(&mut self, _: ()) -> Result<InstanceSlot, ArenaError> {
        FreeListSlotTable::alloc(self)
    }

    fn release(&mut self, slot: InstanceSlot) -> Result<(), ArenaError> {
        FreeListSlotTable::release(self, slot)
    }

    fn compact(&mut self) -> Result<bool, ArenaError> {
        self.shrink_to_live()
    }

    fn live_count(&self) -> usize {
        self.live as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostMemoryBlock;

    fn table(capacity: u32) -> FreeListSlotTable<u32, HostMemoryBlock> {
        FreeListSlotTable::new(HostMemoryBlock::new(0), capacity).unwrap()
    }

    #[test]
    fn released_slot_is_reused_first() {
        let mut t = table(8);
        let slots: Vec<_> = (0..5).map(|_| t.alloc().unwrap()).collect();
        assert_eq!(slots, (0..5).map(InstanceSlot).collect::<Vec<_>>());

        t.release(InstanceSlot(2)).unwrap();
        assert_eq!(t.alloc().unwrap(), InstanceSlot(2));
        assert_eq!(t.alloc().unwrap(), InstanceSlot(5));
    }

    #[test]
    fn lowest_of_several_released_wins() {
        let mut t = table(8);
        for _ in 0..6 {
            t.alloc().unwrap();
        }
        t.release(InstanceSlot(4)).unwrap();
        t.release(InstanceSlot(1)).unwrap();
        assert_eq!(t.next_empty(), 1);
        assert_eq!(t.alloc().unwrap(), InstanceSlot(1));
        assert_eq!(t.alloc().unwrap(), InstanceSlot(4));
        assert_eq!(t.alloc().unwrap(), InstanceSlot(6));
    }

    #[test]
    fn exhaustion_doubles_capacity() {
        let mut t = table(2);
        for _ in 0..3 {
            t.alloc().unwrap();
        }
        assert_eq!(t.capacity(), 4);
        assert_eq!(t.memory().size(), 16);
        assert_eq!(t.live(), 3);
    }

    #[test]
    fn zero_initial_capacity_grows() {
        let mut t = table(0);
        assert_eq!(t.alloc().unwrap(), InstanceSlot(0));
        assert_eq!(t.alloc().unwrap(), InstanceSlot(1));
        assert_eq!(t.capacity(), 2);
    }

    #[test]
    fn double_release_is_benign() {
        let mut t = table(4);
        let s = t.alloc().unwrap();
        t.release(s).unwrap();
        t.release(s).unwrap();
        assert_eq!(t.live(), 0);
        assert_eq!(
            t.release(InstanceSlot(99)),
            Err(ArenaError::UnknownSlot(99))
        );
    }

    #[test]
    fn set_and_get_records() {
        let mut t = table(4);
        let s = t.alloc().unwrap();
        t.set(s, &0xdead_beef).unwrap();
        assert_eq!(t.get(s).unwrap(), 0xdead_beef);
        t.release(s).unwrap();
        assert_eq!(t.set(s, &1), Err(ArenaError::SlotNotLive(0)));
        assert!(t.get(s).is_err());
    }

    #[test]
    fn staged_values_land_on_commit() {
        let mut t = table(4);
        let a = t.alloc().unwrap();
        let b = t.alloc().unwrap();
        t.stage(a, 10).unwrap();
        t.stage(b, 20).unwrap();
        t.stage(a, 11).unwrap();
        assert_eq!(t.get(a).unwrap(), 0);

        assert_eq!(t.commit().unwrap(), 2);
        assert_eq!(t.get(a).unwrap(), 11);
        assert_eq!(t.get(b).unwrap(), 20);
        assert_eq!(t.commit().unwrap(), 0);
    }

    #[test]
    fn release_drops_staged_value() {
        let mut t = table(4);
        let a = t.alloc().unwrap();
        t.stage(a, 10).unwrap();
        t.release(a).unwrap();
        assert_eq!(t.commit().unwrap(), 0);
    }

    #[test]
    fn shrink_keeps_live_slots() {
        let mut t = table(2);
        let slots: Vec<_> = (0..6).map(|_| t.alloc().unwrap()).collect();
        t.set(slots[1], &42).unwrap();
        for s in &slots[2..] {
            t.release(*s).unwrap();
        }
        assert_eq!(t.capacity(), 8);
        assert!(t.shrink_to_live().unwrap());
        assert_eq!(t.capacity(), 2);
        assert_eq!(t.get(slots[1]).unwrap(), 42);
        assert!(!t.shrink_to_live().unwrap());
        assert_eq!(t.alloc().unwrap(), InstanceSlot(2));
    }

    #[test]
    fn shrink_after_write_flushes_in_full() {
        use crate::memory::HostUploadTarget;

        let block = DirtyRangeBuffer::new(0, HostUploadTarget::new());
        let mut t: FreeListSlotTable<u32, _> = FreeListSlotTable::new(block, 2).unwrap();
        t.flush();
        for _ in 0..4 {
            t.alloc().unwrap();
        }
        t.set(InstanceSlot(3), &7).unwrap();
        t.release(InstanceSlot(2)).unwrap();
        t.release(InstanceSlot(3)).unwrap();
        assert!(t.shrink_to_live().unwrap());

        let stats = t.flush();
        assert!(stats.full_upload);
        assert_eq!(t.memory().target().as_bytes().len(), 8);
        assert_eq!(t.memory().target().as_bytes(), t.memory().as_bytes());
    }
}
