//! FILENAME: cube-engine/src/config.rs
//! Execution settings for the cube engine.
//!
//! All fields have defaults so a partial JSON/TOML document deserializes
//! into a complete configuration.

use serde::{Deserialize, Serialize};
use crate::error::{CubeError, Result};

/// Tuning knobs for `CubeEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// Allow partitioned execution when the facts are given as a slice.
    pub parallel: bool,

    /// Minimum number of facts before a slice scan is partitioned.
    pub parallel_threshold: usize,

    /// Facts per partition in a parallel scan.
    pub morsel_size: usize,

    /// Upper bound on pre-allocated cells for a single query.
    pub max_cells_per_query: usize,
}

impl Default for CubeConfig {
    fn default() -> Self {
        CubeConfig {
            parallel: true,
            parallel_threshold: 10_000,
            morsel_size: 4_096,
            max_cells_per_query: 1 << 24,
        }
    }
}

impl CubeConfig {
    /// Configuration that never partitions the scan.
    pub fn sequential() -> Self {
        CubeConfig {
            parallel: false,
            ..CubeConfig::default()
        }
    }

    /// Checks the values a scan cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.morsel_size == 0 {
            return Err(CubeError::InvalidInput("morsel_size must be positive".to_string()));
        }
        if self.max_cells_per_query == 0 {
            return Err(CubeError::InvalidInput(
                "max_cells_per_query must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
