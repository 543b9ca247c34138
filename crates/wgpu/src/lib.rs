//! wgpu backend for the gpubatch arenas and draw-batch compiler.
//!
//! Provides a [`WgpuUploadTarget`] for each buffer role, a [`WgpuDrawSink`]
//! that turns submitted batches into `multi_draw_indexed_indirect` calls, and
//! a surface-less [`HeadlessGpu`] for tools and tests.
//!
//! # Invariants
//! - Partial uploads are 4-byte aligned and padded; buffers are sized to a
//!   multiple of 4.
//! - A full upload recreates the buffer. Bind buffers after flushing, never before.

mod device;
mod sink;
mod target;

pub use device::{GpuError, HeadlessGpu, REQUIRED_FEATURES};
pub use sink::WgpuDrawSink;
pub use target::{COPY_ALIGNMENT_B, WgpuUploadTarget, usage_for};

pub fn crate_info() -> &'static str {
    "gpubatch-wgpu v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("wgpu"));
    }
}
