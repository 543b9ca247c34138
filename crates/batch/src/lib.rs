//! Geometry and instance stores plus the indirect draw-batch compiler.
//!
//! Geometry blobs are packed into one shared vertex buffer and one shared
//! index buffer; per-instance transforms live in a slot table. Every frame
//! the compiler sorts the bound draw units, run-length-encodes them into
//! indirect commands and issues one multi-draw per material batch.
//!
//! # Invariants
//! - Draw units hold plain ids; geometry offsets are looked up at compile
//!   time, after any growth or compaction.
//! - Command order is a pure function of the input: the sort is stable and
//!   bound items iterate in slot order.
//! - `base_instance` in a command counts instances earlier in the same
//!   material batch; the batch's `instance_offset` locates the batch itself.
//! - Only render state that changed since the previous batch is applied.

mod compiler;
mod config;
mod error;
mod geometry;
mod instance;
mod renderer;
mod sink;
mod state;

pub use compiler::{
    CompiledFrame, CompilerState, DrawBatchCompiler, DrawUnit, IndirectCommand, MaterialBatch,
    SubmitStats,
};
pub use config::BatchConfig;
pub use error::{BatchError, CompileError, ConfigError, GeometryError};
pub use geometry::{CommitStats, GeometryBatchStore, GeometryInfo, GeometrySource, INDEX_B, MeshData};
pub use instance::{InstanceStore, InstanceTransform};
pub use renderer::{BatchRenderer, BoundItem, FrameStats};
pub use sink::{DrawSink, FrameResources, MultiDrawCall, RecordingSink, SinkEvent};
pub use state::{CullMode, RenderState, StateChange};

pub fn crate_info() -> &'static str {
    "gpubatch-batch v0.1.0"
}
