use std::sync::Arc;

use gpubatch_common::BufferRole;

use crate::target::WgpuUploadTarget;

/// Features [`WgpuDrawSink`](crate::WgpuDrawSink) needs to issue batches.
pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::MULTI_DRAW_INDIRECT
    .union(wgpu::Features::INDIRECT_FIRST_INSTANCE)
    .union(wgpu::Features::PUSH_CONSTANTS);

/// Errors from device setup.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// A device and queue without a surface.
///
/// Uploads always work. Drawing through the multi-draw sink also needs
/// [`REQUIRED_FEATURES`]; check [`can_draw`](Self::can_draw).
pub struct HeadlessGpu {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter: wgpu::AdapterInfo,
    features: wgpu::Features,
}

impl HeadlessGpu {
    /// Block on an adapter and device request, enabling whichever required features the adapter has.
    pub fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let features = adapter.features() & REQUIRED_FEATURES;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gpubatch_device"),
                required_features: features,
                required_limits: adapter.limits(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            can_draw = features.contains(REQUIRED_FEATURES),
            "headless device ready"
        );
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter: info,
            features,
        })
    }

    /// A fresh upload target for `role` on this device.
    pub fn target(&self, role: BufferRole) -> WgpuUploadTarget {
        WgpuUploadTarget::new(self.device.clone(), self.queue.clone(), role)
    }

    pub fn can_draw(&self) -> bool {
        self.features.contains(REQUIRED_FEATURES)
    }

    pub fn adapter(&self) -> &wgpu::AdapterInfo {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Submit queued buffer writes and wait for the GPU to finish them.
    pub fn wait_idle(&self) {
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_features_cover_indirect_batches() {
        assert!(REQUIRED_FEATURES.contains(wgpu::Features::MULTI_DRAW_INDIRECT));
        assert!(REQUIRED_FEATURES.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE));
        assert!(REQUIRED_FEATURES.contains(wgpu::Features::PUSH_CONSTANTS));
    }
}
