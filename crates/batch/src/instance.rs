use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpubatch_arena::{ArenaError, DirtyRangeBuffer, FlushStats, FreeListSlotTable, UploadTarget};
use gpubatch_common::InstanceSlot;

/// Per-instance record as the shaders read it: the object transform and its
/// inverse, column-major.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransform {
    pub local_to_world: [[f32; 4]; 4],
    pub world_to_local: [[f32; 4]; 4],
}

impl InstanceTransform {
    pub fn from_matrix(local_to_world: Mat4) -> Self {
        Self {
            local_to_world: local_to_world.to_cols_array_2d(),
            world_to_local: local_to_world.inverse().to_cols_array_2d(),
        }
    }

    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.local_to_world)
    }

    /// True when the transform mirrors geometry, which flips triangle winding.
    pub fn has_odd_negative_scale(&self) -> bool {
        self.local_to_world().determinant() < 0.0
    }
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }
}

/// Instance transforms packed into one buffer, addressed by slot.
pub struct InstanceStore<U> {
    table: FreeListSlotTable<InstanceTransform, DirtyRangeBuffer<U>>,
}

impl<U: UploadTarget> InstanceStore<U> {
    pub const RECORD_B: u32 = std::mem::size_of::<InstanceTransform>() as u32;

    pub fn new(initial_capacity: u32, target: U) -> Result<Self, ArenaError> {
        let table = FreeListSlotTable::new(DirtyRangeBuffer::new(0, target), initial_capacity)?;
        Ok(Self { table })
    }

    pub fn register(&mut self) -> Result<InstanceSlot, ArenaError> {
        self.table.alloc()
    }

    pub fn unregister(&mut self, slot: InstanceSlot) -> Result<(), ArenaError> {
        self.table.release(slot)
    }

    /// Write a transform right away.
    pub fn submit(&mut self, slot: InstanceSlot, transform: &InstanceTransform) -> Result<(), ArenaError> {
        self.table.set(slot, transform)
    }

    /// Queue a transform for the next [`commit`](Self::commit).
    pub fn stage(&mut self, slot: InstanceSlot, transform: InstanceTransform) -> Result<(), ArenaError> {
        self.table.stage(slot, transform)
    }

    pub fn commit(&mut self) -> Result<usize, ArenaError> {
        self.table.commit()
    }

    pub fn get(&self, slot: InstanceSlot) -> Result<InstanceTransform, ArenaError> {
        self.table.get(slot)
    }

    pub fn flush_uploads(&mut self) -> FlushStats {
        self.table.flush()
    }

    pub fn live(&self) -> u32 {
        self.table.live()
    }

    pub fn capacity(&self) -> u32 {
        self.table.capacity()
    }

    pub fn shrink_to_live(&mut self) -> Result<bool, ArenaError> {
        self.table.shrink_to_live()
    }

    pub fn buffer(&self) -> &DirtyRangeBuffer<U> {
        self.table.memory()
    }
}
