use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_ENGINE_CONFIG: &str = include_str!("data/engine_config.json");

/// Global configuration parameters for the map engine.
///
/// Point values and AP costs are consumed here, never computed: balancing
/// lives with the collaborators that author the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Side length of the square grid.
    pub grid_size: u32,
    /// Worker thread count; `None` means logical cores minus one (min 1).
    pub worker_threads: Option<usize>,
    /// Capacity of the per-faction atomic counter arrays.
    pub max_factions: usize,
    /// Largest cluster that still receives instant core promotion.
    pub instant_core_threshold: usize,
    /// Continuous-adjacency wait before a pending cell promotes.
    pub core_pending_wait_ms: u64,
    /// Hard cap on live cores per faction.
    pub max_core_tiles: usize,
    /// Grace period a captured core keeps its flag.
    pub captured_core_lifetime_ms: u64,
    /// Overpaint ceiling per cell.
    pub max_overpaint: u8,
    /// AP cost of painting a cell at overpaint level 0.
    pub base_paint_cost: u32,
    /// Additional AP per existing overpaint level.
    pub overpaint_cost_step: u32,
    /// Cost multiplier for attacking inside a hostile zone of control.
    pub zoc_cost_multiplier: f64,
    /// Point value of one owned tile.
    pub points_per_tile: u64,
    /// Point value of one live core.
    pub points_per_core: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_size: 500,
            worker_threads: None,
            max_factions: 4096,
            instant_core_threshold: 400,
            core_pending_wait_ms: 3_600_000,
            max_core_tiles: 2_500,
            captured_core_lifetime_ms: 86_400_000,
            max_overpaint: 4,
            base_paint_cost: 1,
            overpaint_cost_step: 1,
            zoc_cost_multiplier: 2.0,
            points_per_tile: 1,
            points_per_core: 10,
        }
    }
}

impl EngineConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_ENGINE_CONFIG).expect("builtin engine config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| EngineConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        Ok(config)
    }

    /// Total cell count for the configured grid.
    pub fn cell_count(&self) -> usize {
        (self.grid_size as usize) * (self.grid_size as usize)
    }
}

#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read engine config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
