use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::CullMode;

/// Sizing and tuning for a [`BatchRenderer`](crate::BatchRenderer).
///
/// Missing fields in a config file take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Bytes per vertex in the shared vertex buffer.
    pub vertex_stride_b: u32,
    pub initial_vertex_capacity_b: u32,
    pub initial_index_capacity_b: u32,
    /// Instance slots allocated up front.
    pub initial_instance_capacity: u32,
    /// Indirect commands the command buffer starts with room for.
    pub initial_command_capacity: u32,
    /// Geometry arenas compact once this fraction of their apparent size is holes.
    pub compaction_threshold: f32,
    /// Cull mode for batches whose transforms keep winding order.
    pub base_cull_mode: CullMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            vertex_stride_b: 24,
            initial_vertex_capacity_b: 1 << 20,
            initial_index_capacity_b: 256 << 10,
            initial_instance_capacity: 256,
            initial_command_capacity: 64,
            compaction_threshold: 0.5,
            base_cull_mode: CullMode::Back,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertex_stride_b == 0 {
            return Err(ConfigError::Invalid("vertex_stride_b must be non-zero".into()));
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "compaction_threshold must be in (0, 1], got {}",
                self.compaction_threshold
            )));
        }
        Ok(())
    }

    /// Load and validate a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
