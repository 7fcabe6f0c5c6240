//! Screen-size driven LOD selection.
//!
//! Every tile precomputes a table of squared screen-size thresholds, one per
//! LOD, where each entry is the previous one shrunk by a distribution divider.
//! At runtime the squared screen radius of the tile's bounds is compared
//! against that table to get a continuous LOD value. The integer part selects
//! the index buffer and the fraction drives geomorphing on the GPU.

use bytemuck::{Pod, Zeroable};

use super::config::LandscapeConfig;
use super::streaming::HeightmapTexture;
use super::system::view::{ShowFlags, ViewInfo};
use crate::utils::math::ceil_log2;

/// Per-cell LOD thresholds, laid out for upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LodSettings {
    pub lod0_screen_size_squared: f32,
    pub lod1_screen_size_squared: f32,
    pub lod_one_plus_distribution_scalar_squared: f32,
    pub last_lod_screen_size_squared: f32,
    pub last_lod_index: i32,
    pub forced_lod: i32,
    pub draw_collision_pawn_lod: i32,
    pub draw_collision_visibility_lod: i32,
}

/// Maps a squared screen size to a LOD.
///
/// Returns the integer LOD together with its fractional counterpart. Sizes
/// above the LOD1 threshold blend linearly between LOD0 and LOD1; below it the
/// LOD grows with the log of the size in the distribution scalar's base.
pub fn get_lod_from_screen_size(
    settings: &LodSettings,
    screen_size_squared: f32,
    view_lod_scale_squared: f32,
) -> (i32, f32) {
    let screen_size = screen_size_squared / view_lod_scale_squared;

    if screen_size <= settings.last_lod_screen_size_squared {
        (settings.last_lod_index, settings.last_lod_index as f32)
    } else if screen_size > settings.lod1_screen_size_squared {
        let lod0 = settings.lod0_screen_size_squared;
        let fractional =
            (lod0 - lod0.min(screen_size)) / (lod0 - settings.lod1_screen_size_squared);
        (0, fractional)
    } else {
        let fractional = 1.0
            + (settings.lod1_screen_size_squared / screen_size).ln()
                / settings.lod_one_plus_distribution_scalar_squared.ln();
        (fractional as i32, fractional)
    }
}

/// LOD override requested by debug collision views, or -1.
#[inline]
pub fn draw_collision_lod_override(
    show_collision_pawn: bool,
    show_collision_visibility: bool,
    pawn_lod: i32,
    visibility_lod: i32,
) -> i32 {
    if show_collision_pawn {
        pawn_lod.max(visibility_lod)
    } else if show_collision_visibility {
        visibility_lod
    } else {
        -1
    }
}

/// LOD override coming from the view and the global config, or -1.
/// Views with LOD disabled always render LOD 0.
pub fn view_lod_override(view: &ViewInfo, config: &LandscapeConfig) -> i32 {
    let mut lod_override = config.force_lod;
    if view.editor_forced_lod >= 0 {
        lod_override = view.editor_forced_lod;
    }
    if !view.show_flags.contains(ShowFlags::LOD) {
        lod_override = 0;
    }
    lod_override
}

/// Resolves the forced LOD for one tile under the given view, or -1 when the
/// tile is free to pick its own.
pub fn resolve_forced_lod(settings: &LodSettings, view: &ViewInfo, config: &LandscapeConfig) -> i32 {
    let mut forced = settings.forced_lod;

    let view_override = view_lod_override(view, config);
    if view_override >= 0 {
        forced = view_override;
    }

    let collision_override = draw_collision_lod_override(
        view.show_flags.contains(ShowFlags::COLLISION_PAWN),
        view.show_flags.contains(ShowFlags::COLLISION_VISIBILITY),
        settings.draw_collision_pawn_lod,
        settings.draw_collision_visibility_lod,
    );
    if collision_override >= 0 {
        forced = collision_override;
    }

    forced.min(settings.last_lod_index)
}

/// Artist-facing LOD distribution for one tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLodInfo {
    /// Screen size at which LOD0 stops being used.
    pub lod0_screen_size: f32,
    /// Divider between the LOD0 and LOD1 thresholds.
    pub lod0_distribution_setting: f32,
    /// Divider between consecutive thresholds past LOD1.
    pub lod_distribution_setting: f32,
    pub forced_lod: i32,
    pub lod_bias: i32,
    /// Caps the coarsest LOD. Negative disables the cap.
    pub max_lod_level: i32,
}

impl Default for TileLodInfo {
    fn default() -> Self {
        Self {
            lod0_screen_size: 0.5,
            lod0_distribution_setting: 1.75,
            lod_distribution_setting: 2.0,
            forced_lod: -1,
            lod_bias: 0,
            max_lod_level: -1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollisionInfo {
    pub collision_mip_level: i32,
    pub simple_collision_mip_level: i32,
    pub ignores_pawn: bool,
    pub ignores_visibility: bool,
}

/// Tessellation parameters of the landscape a tile belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TessellationInfo {
    pub component_screen_size: f32,
    pub component_screen_size_falloff: f32,
    pub use_component_screen_size_falloff: bool,
}

impl Default for TessellationInfo {
    fn default() -> Self {
        Self {
            component_screen_size: 0.8,
            component_screen_size_falloff: 0.75,
            use_component_screen_size_falloff: true,
        }
    }
}

/// Tessellation settings every tile of one render system must agree on.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TessellationFalloffSettings {
    pub use_component_screen_size_falloff: bool,
    pub component_squared_screen_size: f32,
    pub component_screen_size_falloff: f32,
}

impl From<&TessellationInfo> for TessellationFalloffSettings {
    fn from(info: &TessellationInfo) -> Self {
        Self {
            use_component_screen_size_falloff: info.use_component_screen_size_falloff,
            component_squared_screen_size: info.component_screen_size * info.component_screen_size,
            component_screen_size_falloff: info.component_screen_size_falloff,
        }
    }
}

/// Static LOD state computed once per tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileLodState {
    pub max_lod: i32,
    pub first_lod: i32,
    pub last_lod: i32,
    pub forced_lod: i32,
    pub lod_bias: i32,
    pub min_valid_lod: i32,
    pub max_valid_lod: i32,
    /// Squared screen size at which each LOD starts, strictly decreasing.
    pub screen_ratio_squared: Vec<f32>,
    pub settings: LodSettings,
}

impl TileLodState {
    pub fn new(
        subsection_size_quads: u32,
        info: &TileLodInfo,
        collision: &CollisionInfo,
        heightmap: Option<&HeightmapTexture>,
        config: &LandscapeConfig,
    ) -> Self {
        let subsection_size_verts = subsection_size_quads + 1;
        let mut max_lod = ceil_log2(subsection_size_verts) as i32 - 1;
        let mut settings = LodSettings::default();

        let mut divider =
            (info.lod0_distribution_setting * config.lod0_distribution_scale).max(1.01);
        // Landscapes cancel out the global static mesh distance scale.
        let mut ratio = info.lod0_screen_size / config.static_mesh_lod_distance_scale;

        let mut screen_ratio_squared = vec![0.0; max_lod as usize + 1];
        screen_ratio_squared[0] = ratio * ratio;
        settings.lod0_screen_size_squared = ratio * ratio;
        ratio /= divider;
        settings.lod1_screen_size_squared = ratio * ratio;

        divider = (info.lod_distribution_setting * config.lod_distribution_scale).max(1.01);
        settings.lod_one_plus_distribution_scalar_squared = divider * divider;

        // Always built from the component size, regardless of max_lod_level.
        for entry in screen_ratio_squared.iter_mut().skip(1) {
            *entry = ratio * ratio;
            ratio /= divider;
        }

        let mut first_lod = 0;
        let min_streamed_lod = heightmap
            .map(|texture| {
                (texture.missing_mips() as i32).min(ceil_log2(subsection_size_verts) as i32 - 1)
            })
            .unwrap_or(0);
        let mut last_lod = min_streamed_lod.max(max_lod);

        if info.max_lod_level >= 0 {
            max_lod = max_lod.min(info.max_lod_level);
            last_lod = last_lod.min(info.max_lod_level);
        }

        let forced_lod = if info.forced_lod >= 0 {
            info.forced_lod.clamp(first_lod, last_lod)
        } else {
            info.forced_lod
        };
        if forced_lod >= 0 {
            first_lod = forced_lod;
            last_lod = forced_lod;
        }

        settings.last_lod_index = last_lod;
        settings.last_lod_screen_size_squared = screen_ratio_squared[last_lod as usize];
        settings.forced_lod = forced_lod;

        let lod_bias = info.lod_bias.clamp(-max_lod, max_lod);
        let local_bias = lod_bias + config.mesh_lod_bias;
        let min_valid_lod = local_bias.clamp(-max_lod, max_lod);
        let max_valid_lod = max_lod.min(max_lod + local_bias);

        settings.draw_collision_pawn_lod = if collision.ignores_pawn {
            -1
        } else {
            collision.simple_collision_mip_level
        };
        settings.draw_collision_visibility_lod = if collision.ignores_visibility {
            -1
        } else {
            collision.collision_mip_level
        };

        Self {
            max_lod,
            first_lod,
            last_lod,
            forced_lod,
            lod_bias,
            min_valid_lod,
            max_valid_lod,
            screen_ratio_squared,
            settings,
        }
    }

    /// Threshold used by the static batch of `lod`.
    #[inline]
    pub fn screen_size_for_lod(&self, lod: i32) -> f32 {
        if lod == self.first_lod {
            f32::MAX
        } else {
            self.screen_ratio_squared[lod as usize].sqrt() * 2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(quads: u32, info: TileLodInfo) -> TileLodState {
        TileLodState::new(
            quads,
            &info,
            &CollisionInfo::default(),
            None,
            &LandscapeConfig::default(),
        )
    }

    #[test]
    fn table_is_strictly_decreasing() {
        let lod = state(63, TileLodInfo::default());
        assert_eq!(lod.max_lod, 5);
        assert_eq!(lod.screen_ratio_squared.len(), 6);
        assert!((lod.screen_ratio_squared[0] - 0.25).abs() < 1e-6);
        for pair in lod.screen_ratio_squared.windows(2) {
            assert!(pair[0] > pair[1]);
        }
        assert_eq!(lod.settings.last_lod_index, 5);
        assert_eq!(lod.settings.forced_lod, -1);
    }

    #[test]
    fn forced_lod_collapses_range() {
        let lod = state(
            63,
            TileLodInfo {
                forced_lod: 9,
                ..Default::default()
            },
        );
        assert_eq!(lod.forced_lod, 5);
        assert_eq!(lod.first_lod, 5);
        assert_eq!(lod.last_lod, 5);
    }

    #[test]
    fn max_lod_level_caps_last_lod() {
        let lod = state(
            63,
            TileLodInfo {
                max_lod_level: 3,
                ..Default::default()
            },
        );
        assert_eq!(lod.max_lod, 3);
        assert_eq!(lod.last_lod, 3);
        assert_eq!(lod.settings.last_lod_screen_size_squared, lod.screen_ratio_squared[3]);
    }

    #[test]
    fn bias_is_clamped_to_lod_count() {
        let lod = state(
            15,
            TileLodInfo {
                lod_bias: 10,
                ..Default::default()
            },
        );
        assert_eq!(lod.max_lod, 3);
        assert_eq!(lod.lod_bias, 3);
        assert_eq!(lod.min_valid_lod, 3);
        assert_eq!(lod.max_valid_lod, 3);

        let lod = state(
            15,
            TileLodInfo {
                lod_bias: -2,
                ..Default::default()
            },
        );
        assert_eq!(lod.min_valid_lod, -2);
        assert_eq!(lod.max_valid_lod, 1);
    }

    #[test]
    fn collision_lods_follow_responses() {
        let lod = TileLodState::new(
            63,
            &TileLodInfo::default(),
            &CollisionInfo {
                collision_mip_level: 2,
                simple_collision_mip_level: 1,
                ignores_pawn: true,
                ignores_visibility: false,
            },
            None,
            &LandscapeConfig::default(),
        );
        assert_eq!(lod.settings.draw_collision_pawn_lod, -1);
        assert_eq!(lod.settings.draw_collision_visibility_lod, 2);
    }

    #[test]
    fn collision_override_precedence() {
        assert_eq!(draw_collision_lod_override(true, true, 1, 3), 3);
        assert_eq!(draw_collision_lod_override(false, true, 1, 3), 3);
        assert_eq!(draw_collision_lod_override(false, false, 1, 3), -1);
    }

    #[test]
    fn last_lod_branch_is_exact() {
        let lod = state(63, TileLodInfo::default());
        let (index, fractional) = get_lod_from_screen_size(&lod.settings, 0.0, 1.0);
        assert_eq!(index, 5);
        assert_eq!(fractional, 5.0);
    }
}
