use std::fmt::Write;

use glam::{IVec2, Vec4};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::system::view::ShowFlags;
use super::system::RenderSystem;

/// Editor visualization applied on top of the regular landscape batches.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ViewMode {
    #[default]
    Normal = 0,
    DebugLayer = 2,
    LayerDensity = 3,
    LayerUsage = 4,
    Lod = 5,
    WireframeOnTop = 6,
    LayerContribution = 7,
    CollisionLod = 8,
}

pub const LOD_COLORATION_COLORS: [Vec4; 8] = [
    Vec4::new(1.0, 1.0, 1.0, 1.0),
    Vec4::new(1.0, 0.0, 0.0, 1.0),
    Vec4::new(0.0, 1.0, 0.0, 1.0),
    Vec4::new(0.0, 0.0, 1.0, 1.0),
    Vec4::new(1.0, 1.0, 0.0, 1.0),
    Vec4::new(1.0, 0.0, 1.0, 1.0),
    Vec4::new(0.0, 1.0, 1.0, 1.0),
    Vec4::new(0.5, 0.0, 0.5, 1.0),
];

/// Cheap to expensive, indexed by the number of weightmap layers in use.
pub const SHADER_COMPLEXITY_COLORS: [Vec4; 5] = [
    Vec4::new(0.0, 1.0, 0.127, 1.0),
    Vec4::new(0.0, 1.0, 0.0, 1.0),
    Vec4::new(0.046, 0.52, 0.0, 1.0),
    Vec4::new(0.215, 0.0, 0.0, 1.0),
    Vec4::new(1.0, 0.0, 0.5, 1.0),
];

const GRAY: Vec4 = Vec4::new(0.5, 0.5, 0.5, 1.0);
const WIREFRAME_ON_TOP_COLOR: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);
const COLLISION_COLOR: Vec4 = Vec4::new(0.0, 0.7, 1.0, 1.0);

pub fn color_for_lod_in(palette: &[Vec4], current_lod: i32, forced_lod: i32, combined: bool) -> Vec4 {
    let color = if palette.is_empty() {
        GRAY
    } else {
        palette[current_lod.clamp(0, palette.len() as i32 - 1) as usize]
    };

    if forced_lod >= 0 {
        color
    } else if combined {
        color * 0.2
    } else {
        color * 0.1
    }
}

/// LOD coloration color. Forced LODs draw at full intensity, free ones dimmed.
#[inline]
pub fn color_for_lod(current_lod: i32, forced_lod: i32, combined: bool) -> Vec4 {
    color_for_lod_in(&LOD_COLORATION_COLORS, current_lod, forced_lod, combined)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DebugMaterial {
    /// Weightmap channels routed to R, G and B. Negative channels are masked out.
    LayerDebugColor { channels: [i32; 3] },
    Colored(Vec4),
    LayerUsage { rotation: f32 },
    LayerContributionMask,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugBatch {
    pub material: DebugMaterial,
    pub lod_index: i32,
    pub wireframe: bool,
}

/// Per-tile inputs to the debug strategies.
#[derive(Clone, Copy, Debug)]
pub struct DebugContext {
    pub lod_index: i32,
    pub forced_lod: i32,
    pub section_base: IVec2,
    pub component_size_quads: i32,
    pub num_weightmap_layer_allocations: usize,
    pub debug_channels: [i32; 3],
    pub show_flags: ShowFlags,
    pub draw_collision_pawn_lod: i32,
    pub draw_collision_visibility_lod: i32,
}

pub type DebugStrategy = fn(&DebugContext) -> Option<DebugBatch>;

static DEBUG_STRATEGIES: [(ViewMode, DebugStrategy); 8] = [
    (ViewMode::Normal, collision_batch),
    (ViewMode::DebugLayer, debug_layer_batch),
    (ViewMode::LayerDensity, layer_density_batch),
    (ViewMode::LayerUsage, layer_usage_batch),
    (ViewMode::Lod, lod_batch),
    (ViewMode::WireframeOnTop, wireframe_on_top_batch),
    (ViewMode::LayerContribution, layer_contribution_batch),
    (ViewMode::CollisionLod, collision_lod_batch),
];

pub fn strategy_for(mode: ViewMode) -> DebugStrategy {
    DEBUG_STRATEGIES
        .iter()
        .find(|(entry, _)| *entry == mode)
        .map(|(_, strategy)| *strategy)
        .unwrap_or(collision_batch)
}

/// Extra batch drawn for a tile in the given view mode, if any.
pub fn debug_batch(mode: ViewMode, ctx: &DebugContext) -> Option<DebugBatch> {
    strategy_for(mode)(ctx)
}

fn batch(ctx: &DebugContext, material: DebugMaterial) -> DebugBatch {
    DebugBatch {
        material,
        lod_index: ctx.lod_index,
        wireframe: ctx.show_flags.contains(ShowFlags::WIREFRAME),
    }
}

fn collision_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    let simple = ctx.show_flags.contains(ShowFlags::COLLISION_PAWN) && ctx.draw_collision_pawn_lod >= 0;
    let complex = ctx.show_flags.contains(ShowFlags::COLLISION_VISIBILITY)
        && ctx.draw_collision_visibility_lod >= 0;
    (simple || complex).then(|| batch(ctx, DebugMaterial::Colored(COLLISION_COLOR)))
}

fn debug_layer_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    Some(batch(
        ctx,
        DebugMaterial::LayerDebugColor {
            channels: ctx.debug_channels,
        },
    ))
}

fn layer_density_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    let index = ctx
        .num_weightmap_layer_allocations
        .min(SHADER_COMPLEXITY_COLORS.len());
    let color = if index == 0 {
        Vec4::new(0.0, 0.0, 0.0, 1.0)
    } else {
        SHADER_COMPLEXITY_COLORS[index - 1]
    };
    Some(batch(ctx, DebugMaterial::Colored(color)))
}

fn layer_usage_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    let quads = ctx.component_size_quads.max(1);
    let checker = ((ctx.section_base.x / quads) ^ (ctx.section_base.y / quads)) & 1 != 0;
    let rotation = if checker {
        0.0
    } else {
        2.0 * std::f32::consts::PI
    };
    Some(batch(ctx, DebugMaterial::LayerUsage { rotation }))
}

fn lod_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    let color = color_for_lod(ctx.lod_index, ctx.forced_lod, true);
    Some(batch(ctx, DebugMaterial::Colored(color)))
}

fn wireframe_on_top_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    Some(DebugBatch {
        material: DebugMaterial::Colored(WIREFRAME_ON_TOP_COLOR),
        lod_index: ctx.lod_index,
        wireframe: true,
    })
}

fn layer_contribution_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    Some(batch(ctx, DebugMaterial::LayerContributionMask))
}

fn collision_lod_batch(ctx: &DebugContext) -> Option<DebugBatch> {
    let collision_lod = ctx
        .draw_collision_pawn_lod
        .max(ctx.draw_collision_visibility_lod);
    (collision_lod >= 0).then(|| DebugBatch {
        material: DebugMaterial::Colored(color_for_lod(collision_lod, collision_lod, false)),
        lod_index: collision_lod,
        wireframe: ctx.show_flags.contains(ShowFlags::WIREFRAME),
    })
}

/// Text grid of the active per-cell LOD values, one row per grid line.
pub fn dump_lods(system: &RenderSystem) -> String {
    let min = system.min();
    let size = system.size();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Landscape LODs: min ({}, {}) size {}x{}",
        min.x, min.y, size.x, size.y
    );

    let values = system.section_lod_values();
    for y in 0..size.y {
        let row: Vec<String> = (0..size.x)
            .map(|x| {
                let index = (y * size.x + x) as usize;
                match system.tile_at_linear(index) {
                    Some(_) => format!("{:5.2}", values[index]),
                    None => "    -".to_string(),
                }
            })
            .collect();
        let _ = writeln!(out, "{}", row.join(" "));
    }

    info!("{}", out);
    out
}
