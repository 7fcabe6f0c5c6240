use std::path::Path;

use serde::{Deserialize, Serialize};

use super::debug::ViewMode;
use super::error::Result;

/// Hardware class the landscape geometry is built for.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum FeatureTier {
    /// Constrained devices: vertices are shared across LODs and no tessellation.
    Mobile,
    #[default]
    Sm5,
}

/// Runtime knobs for landscape rendering.
///
/// Every field has a default, so a config file only needs the values it changes:
///
/// ```
/// use meshi_landscape::LandscapeConfig;
///
/// let config = LandscapeConfig::from_json_str(r#"{ "force_lod": 2 }"#).unwrap();
/// assert_eq!(config.force_lod, 2);
/// assert!(config.threaded_lod);
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LandscapeConfig {
    /// Global LOD override. Negative values disable it.
    pub force_lod: i32,
    /// Multiplier for each tile's LOD1+ distribution setting.
    pub lod_distribution_scale: f32,
    /// Multiplier for each tile's LOD0 distribution setting.
    pub lod0_distribution_scale: f32,
    /// Multiplier applied to every view's LOD distance factor.
    pub static_mesh_lod_distance_scale: f32,
    /// Added to each tile's own LOD bias when computing its valid LOD range.
    pub mesh_lod_bias: i32,
    /// Run per-view LOD work and the heightmap bias fetch on the rayon pool.
    pub threaded_lod: bool,
    pub feature_tier: FeatureTier,
    /// Reorder mobile index buffers for vertex cache reuse.
    pub optimize_mobile_indices: bool,
    pub vertex_cache_size: u32,
    pub view_mode: ViewMode,
    pub log_level: String,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            force_lod: -1,
            lod_distribution_scale: 1.0,
            lod0_distribution_scale: 1.0,
            static_mesh_lod_distance_scale: 1.0,
            mesh_lod_bias: 0,
            threaded_lod: true,
            feature_tier: FeatureTier::Sm5,
            optimize_mobile_indices: true,
            vertex_cache_size: 32,
            view_mode: ViewMode::Normal,
            log_level: "info".to_string(),
        }
    }
}

impl LandscapeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json_data = std::fs::read_to_string(path)?;
        Self::from_json_str(&json_data)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
