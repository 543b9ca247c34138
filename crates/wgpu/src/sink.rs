use gpubatch_batch::{DrawSink, FrameResources, MultiDrawCall, RenderState, StateChange};

use crate::target::WgpuUploadTarget;

/// Issues submitted batches into a render pass with `multi_draw_indexed_indirect`.
///
/// The shared vertex and index buffers are bound once per submit. Render
/// state goes through the `apply_state` callback, which owns pipeline and
/// bind group choice for each material and cull mode. Pipelines must declare
/// a 4-byte vertex push constant at offset 0: it receives the batch's
/// `instance_offset`, to be added to `instance_index` before indexing the
/// instance index buffer.
pub struct WgpuDrawSink<'a, 'pass, F> {
    pass: &'a mut wgpu::RenderPass<'pass>,
    apply_state: F,
    draws: u32,
}

impl<'a, 'pass, F> WgpuDrawSink<'a, 'pass, F>
where
    F: FnMut(
        &mut wgpu::RenderPass<'pass>,
        &StateChange,
        &RenderState,
        &FrameResources<'_, WgpuUploadTarget>,
    ),
{
    pub fn new(pass: &'a mut wgpu::RenderPass<'pass>, apply_state: F) -> Self {
        Self {
            pass,
            apply_state,
            draws: 0,
        }
    }

    /// Multi-draws issued so far.
    pub fn draws(&self) -> u32 {
        self.draws
    }
}

impl<'pass, F> DrawSink<WgpuUploadTarget> for WgpuDrawSink<'_, 'pass, F>
where
    F: FnMut(
        &mut wgpu::RenderPass<'pass>,
        &StateChange,
        &RenderState,
        &FrameResources<'_, WgpuUploadTarget>,
    ),
{
    fn begin(&mut self, resources: &FrameResources<'_, WgpuUploadTarget>) {
        if let Some(vertices) = resources.vertices.buffer() {
            self.pass.set_vertex_buffer(0, vertices.slice(..));
        }
        if let Some(indices) = resources.indices.buffer() {
            self.pass
                .set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        }
    }

    fn apply_state(
        &mut self,
        change: &StateChange,
        state: &RenderState,
        resources: &FrameResources<'_, WgpuUploadTarget>,
    ) {
        (self.apply_state)(&mut *self.pass, change, state, resources);
    }

    fn multi_draw(&mut self, call: &MultiDrawCall, resources: &FrameResources<'_, WgpuUploadTarget>) {
        let Some(commands) = resources.commands.buffer() else {
            tracing::warn!("multi-draw skipped: command buffer never uploaded");
            return;
        };
        self.pass.set_push_constants(
            wgpu::ShaderStages::VERTEX,
            0,
            bytemuck::bytes_of(&call.instance_offset),
        );
        self.pass
            .multi_draw_indexed_indirect(commands, call.command_offset_b, call.command_count);
        self.draws += 1;
    }
}
