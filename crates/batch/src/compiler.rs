use bytemuck::{Pod, Zeroable};
use gpubatch_arena::{ArenaError, DirtyRangeBuffer, FixedSlotAllocator, FlushStats, UploadTarget};
use gpubatch_common::{GeometryId, InstanceSlot, MaterialId};

use crate::config::BatchConfig;
use crate::error::CompileError;
use crate::geometry::GeometryBatchStore;
use crate::instance::InstanceStore;
use crate::sink::{DrawSink, FrameResources, MultiDrawCall};
use crate::state::{CullMode, RenderState};

/// One thing to draw this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawUnit {
    pub geometry: GeometryId,
    pub material: MaterialId,
    pub instance_slot: InstanceSlot,
    pub visible: bool,
    pub odd_negative_scale: bool,
}

impl DrawUnit {
    /// Visible units first, then grouped by material, winding, geometry.
    fn sort_key(&self) -> (bool, MaterialId, bool, GeometryId) {
        (!self.visible, self.material, self.odd_negative_scale, self.geometry)
    }
}

/// An indexed indirect draw record, laid out as the GPU reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectCommand {
    pub element_count: u32,
    pub instance_count: u32,
    pub first_element: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

impl IndirectCommand {
    pub const STRIDE_B: u32 = std::mem::size_of::<Self>() as u32;
}

/// A run of commands drawn with one render state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialBatch {
    pub material: MaterialId,
    pub odd_negative_scale: bool,
    pub command_offset: u32,
    pub command_count: u32,
    pub instance_offset: u32,
    pub instance_count: u32,
}

/// Output of one compile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFrame {
    pub batches: Vec<MaterialBatch>,
    pub commands: Vec<IndirectCommand>,
    /// Instance slot of every drawn unit, in command order.
    pub instance_indices: Vec<u32>,
}

impl CompiledFrame {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn clear(&mut self) {
        self.batches.clear();
        self.commands.clear();
        self.instance_indices.clear();
    }
}

/// Where the compiler is in its per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerState {
    Idle,
    Sorted,
    Grouped,
    Submitted,
}

/// What one submit did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub batches: u32,
    pub commands: u32,
    pub instances: u32,
    pub state_changes: u32,
    pub uploads: FlushStats,
}

/// Turns per-frame draw units into indirect multi-draw batches.
///
/// `compile` sorts the units, groups them into material batches and encodes
/// one command per geometry run. `submit` uploads the command and instance
/// index arrays and issues one multi-draw per batch, applying only the render
/// state that changed since the previous batch, across frames too.
pub struct DrawBatchCompiler<U> {
    state: CompilerState,
    compiled_empty: bool,
    base_cull_mode: CullMode,
    frame: CompiledFrame,
    commands: FixedSlotAllocator<IndirectCommand, DirtyRangeBuffer<U>>,
    instance_indices: FixedSlotAllocator<u32, DirtyRangeBuffer<U>>,
    previous_state: Option<RenderState>,
}

impl<U: UploadTarget> DrawBatchCompiler<U> {
    pub fn new(
        config: &BatchConfig,
        command_target: U,
        instance_index_target: U,
    ) -> Result<Self, ArenaError> {
        let command_b = config
            .initial_command_capacity
            .saturating_mul(IndirectCommand::STRIDE_B);
        let index_b = config.initial_instance_capacity.saturating_mul(4);
        Ok(Self {
            state: CompilerState::Idle,
            compiled_empty: false,
            base_cull_mode: config.base_cull_mode,
            frame: CompiledFrame::default(),
            commands: FixedSlotAllocator::new(DirtyRangeBuffer::new(command_b, command_target))?,
            instance_indices: FixedSlotAllocator::new(DirtyRangeBuffer::new(
                index_b,
                instance_index_target,
            ))?,
            previous_state: None,
        })
    }

    /// Sort `units` in place and encode the visible ones.
    ///
    /// On error the frame is left empty and the compiler returns to `Idle`.
    pub fn compile(
        &mut self,
        units: &mut [DrawUnit],
        geometry: &GeometryBatchStore<U>,
    ) -> Result<&CompiledFrame, CompileError> {
        self.frame.clear();
        self.state = CompilerState::Idle;
        self.compiled_empty = false;

        let _span = tracing::info_span!("compile", units = units.len()).entered();
        units.sort_by_key(DrawUnit::sort_key);
        self.state = CompilerState::Sorted;

        let visible = units.partition_point(|u| u.visible);
        if let Err(e) = self.encode(&units[..visible], geometry) {
            self.frame.clear();
            self.state = CompilerState::Idle;
            return Err(e);
        }

        if self.frame.is_empty() {
            self.state = CompilerState::Idle;
            self.compiled_empty = true;
        } else {
            self.state = CompilerState::Grouped;
        }
        tracing::debug!(
            visible,
            hidden = units.len() - visible,
            batches = self.frame.batches.len(),
            commands = self.frame.commands.len(),
            "compiled frame"
        );
        Ok(&self.frame)
    }

    fn encode(
        &mut self,
        units: &[DrawUnit],
        geometry: &GeometryBatchStore<U>,
    ) -> Result<(), CompileError> {
        let stride_b = geometry.vertex_stride();
        let same_batch = |a: &DrawUnit, b: &DrawUnit| {
            a.material == b.material && a.odd_negative_scale == b.odd_negative_scale
        };

        for batch in units.chunk_by(same_batch) {
            let command_offset = self.frame.commands.len() as u32;
            let instance_offset = self.frame.instance_indices.len() as u32;
            let mut base_instance = 0u32;

            for run in batch.chunk_by(|a, b| a.geometry == b.geometry) {
                let id = run[0].geometry;
                let info = geometry.geometry_info(id)?;
                let base_vertex = i32::try_from(info.first_vertex(stride_b))
                    .map_err(|_| CompileError::BaseVertexOverflow(id))?;
                let instance_count = run.len() as u32;

                self.frame.commands.push(IndirectCommand {
                    element_count: info.element_count(),
                    instance_count,
                    first_element: info.first_element(),
                    base_vertex,
                    base_instance,
                });
                self.frame
                    .instance_indices
                    .extend(run.iter().map(|u| u.instance_slot.index()));
                base_instance += instance_count;
            }

            self.frame.batches.push(MaterialBatch {
                material: batch[0].material,
                odd_negative_scale: batch[0].odd_negative_scale,
                command_offset,
                command_count: self.frame.commands.len() as u32 - command_offset,
                instance_offset,
                instance_count: base_instance,
            });
        }
        Ok(())
    }

    /// Upload the compiled frame and issue it on `sink`.
    ///
    /// A frame that compiled to nothing submits nothing and uploads nothing.
    pub fn submit(
        &mut self,
        geometry: &GeometryBatchStore<U>,
        instances: Option<&InstanceStore<U>>,
        sink: &mut dyn DrawSink<U>,
    ) -> Result<SubmitStats, CompileError> {
        match self.state {
            CompilerState::Grouped => {}
            CompilerState::Idle if self.compiled_empty => {
                self.compiled_empty = false;
                return Ok(SubmitStats::default());
            }
            other => return Err(CompileError::NothingCompiled(other)),
        }
        let _span = tracing::info_span!("submit", batches = self.frame.batches.len()).entered();

        self.commands.assign(&self.frame.commands)?;
        self.instance_indices.assign(&self.frame.instance_indices)?;
        let mut uploads = self.commands.flush();
        uploads.accumulate(self.instance_indices.flush());

        let resources = FrameResources {
            vertices: geometry.vertex_arena().memory().target(),
            indices: geometry.index_arena().memory().target(),
            instances: instances.map(|store| store.buffer().target()),
            commands: self.commands.memory().target(),
            instance_indices: self.instance_indices.memory().target(),
        };
        sink.begin(&resources);

        let mut state_changes = 0;
        for batch in &self.frame.batches {
            let state =
                RenderState::for_batch(batch.material, batch.odd_negative_scale, self.base_cull_mode);
            let change = state.diff(self.previous_state.as_ref());
            if !change.is_empty() {
                sink.apply_state(&change, &state, &resources);
                state_changes += 1;
            }
            self.previous_state = Some(state);

            sink.multi_draw(
                &MultiDrawCall {
                    command_offset_b: batch.command_offset as u64 * IndirectCommand::STRIDE_B as u64,
                    command_count: batch.command_count,
                    stride: IndirectCommand::STRIDE_B,
                    instance_offset: batch.instance_offset,
                },
                &resources,
            );
        }

        self.state = CompilerState::Submitted;
        let stats = SubmitStats {
            batches: self.frame.batches.len() as u32,
            commands: self.frame.commands.len() as u32,
            instances: self.frame.instance_indices.len() as u32,
            state_changes,
            uploads,
        };
        tracing::debug!(
            batches = stats.batches,
            commands = stats.commands,
            state_changes,
            upload_calls = uploads.upload_calls(),
            "submitted frame"
        );
        Ok(stats)
    }

    /// Forget the last applied render state so the next batch applies all of it.
    pub fn invalidate_state(&mut self) {
        self.previous_state = None;
    }

    pub fn state(&self) -> CompilerState {
        self.state
    }

    pub fn frame(&self) -> &CompiledFrame {
        &self.frame
    }

    pub fn command_buffer(&self) -> &DirtyRangeBuffer<U> {
        self.commands.memory()
    }

    pub fn instance_index_buffer(&self) -> &DirtyRangeBuffer<U> {
        self.instance_indices.memory()
    }
}
