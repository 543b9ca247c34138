use std::borrow::Cow;
use std::sync::Arc;

use gpubatch_arena::UploadTarget;
use gpubatch_common::BufferRole;

/// Copy alignment every partial upload is widened to.
pub const COPY_ALIGNMENT_B: u32 = wgpu::COPY_BUFFER_ALIGNMENT as u32;

/// Usage flags for a buffer with the given role. Every role is a copy destination.
pub fn usage_for(role: BufferRole) -> wgpu::BufferUsages {
    let usage = match role {
        BufferRole::Vertex => wgpu::BufferUsages::VERTEX,
        BufferRole::Index => wgpu::BufferUsages::INDEX,
        BufferRole::Instance | BufferRole::InstanceIndex => wgpu::BufferUsages::STORAGE,
        BufferRole::Command => wgpu::BufferUsages::INDIRECT,
    };
    usage | wgpu::BufferUsages::COPY_DST
}

/// `data` zero-padded to a multiple of the copy alignment.
fn padded(data: &[u8]) -> Cow<'_, [u8]> {
    let len = data.len().div_ceil(COPY_ALIGNMENT_B as usize) * COPY_ALIGNMENT_B as usize;
    if len == data.len() {
        return Cow::Borrowed(data);
    }
    let mut owned = Vec::with_capacity(len);
    owned.extend_from_slice(data);
    owned.resize(len, 0);
    Cow::Owned(owned)
}

/// A GPU buffer fed from a CPU mirror.
///
/// A full upload recreates the buffer at the new size, so a `wgpu::Buffer`
/// obtained from [`buffer`](Self::buffer) is only current until the next flush.
pub struct WgpuUploadTarget {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    role: BufferRole,
    buffer: Option<wgpu::Buffer>,
    size_b: u32,
    reallocations: u32,
}

impl WgpuUploadTarget {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, role: BufferRole) -> Self {
        Self {
            device,
            queue,
            role,
            buffer: None,
            size_b: 0,
            reallocations: 0,
        }
    }

    /// The current buffer, or `None` before the first upload.
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// How many times the buffer has been recreated.
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }
}

impl UploadTarget for WgpuUploadTarget {
    fn size(&self) -> u32 {
        self.size_b
    }

    fn upload_full(&mut self, data: &[u8]) {
        let bytes = padded(data);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.role.label()),
            size: (bytes.len() as u64).max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: usage_for(self.role),
            mapped_at_creation: false,
        });
        if !bytes.is_empty() {
            self.queue.write_buffer(&buffer, 0, &bytes);
        }
        self.buffer = Some(buffer);
        self.size_b = data.len() as u32;
        self.reallocations += 1;
        tracing::debug!(role = self.role.label(), size_b = self.size_b, "recreated gpu buffer");
    }

    fn upload_range(&mut self, offset_b: u32, data: &[u8]) {
        let Some(buffer) = &self.buffer else {
            tracing::warn!(role = self.role.label(), offset_b, "range upload before any full upload");
            return;
        };
        self.queue
            .write_buffer(buffer, offset_b as u64, &padded(data));
    }

    fn copy_alignment(&self) -> u32 {
        COPY_ALIGNMENT_B
    }
}
