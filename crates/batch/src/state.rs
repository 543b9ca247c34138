use std::fmt;
use std::str::FromStr;

use gpubatch_common::MaterialId;
use serde::{Deserialize, Serialize};

/// Which triangle faces are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    All,
}

impl CullMode {
    /// The mode to use when the transform mirrors geometry, which reverses winding.
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
            other => other,
        }
    }
}

impl fmt::Display for CullMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Front => "front",
            Self::Back => "back",
            Self::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for CullMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            "all" | "front_and_back" => Ok(Self::All),
            other => Err(format!("unknown cull mode: {other}")),
        }
    }
}

/// Pipeline state a material batch draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub material: MaterialId,
    pub cull_mode: CullMode,
}

impl RenderState {
    pub fn for_batch(material: MaterialId, odd_negative_scale: bool, base_cull_mode: CullMode) -> Self {
        let cull_mode = if odd_negative_scale {
            base_cull_mode.flipped()
        } else {
            base_cull_mode
        };
        Self { material, cull_mode }
    }

    /// The parts of `self` that differ from `previous`. Everything differs
    /// from `None`.
    pub fn diff(&self, previous: Option<&RenderState>) -> StateChange {
        match previous {
            None => StateChange {
                material: Some(self.material),
                cull_mode: Some(self.cull_mode),
            },
            Some(prev) => StateChange {
                material: (prev.material != self.material).then_some(self.material),
                cull_mode: (prev.cull_mode != self.cull_mode).then_some(self.cull_mode),
            },
        }
    }
}

/// State a sink has to apply before the next draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateChange {
    pub material: Option<MaterialId>,
    pub cull_mode: Option<CullMode>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        self.material.is_none() && self.cull_mode.is_none()
    }
}
