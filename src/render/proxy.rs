//! The renderable unit of a landscape: one tile, its LOD state and the draw
//! batches built from the shared geometry of its shape.

use std::sync::Arc;

use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Mat4, Vec3, Vec4};

use super::arena::TileId;
use super::backend::BufferHandle;
use super::config::{FeatureTier, LandscapeConfig};
use super::debug::DebugContext;
use super::geometry::{SharedBuffers, SharedBuffersInfo};
use super::lod::{
    get_lod_from_screen_size, resolve_forced_lod, CollisionInfo, TessellationFalloffSettings,
    TessellationInfo, TileLodInfo, TileLodState,
};
use super::neighbors::{HasNeighborInfo, LandscapeKey, NeighborInfo};
use super::streaming::{HeightmapTexture, TileStreamingState};
use super::system::view::ViewInfo;
use super::system::SectionEntity;
use crate::utils::math::{ceil_log2, compute_bounds_screen_radius_squared};

pub const MAX_SUBSECTIONS: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TileBounds {
    pub origin: Vec3,
    pub box_extent: Vec3,
    pub sphere_radius: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileMaterial {
    pub name: String,
    pub tessellation_enabled: bool,
    /// Variant of this material with tessellation turned off.
    pub disabled_tessellation_index: Option<usize>,
}

/// Everything needed to create a tile.
#[derive(Clone, Debug)]
pub struct TileDesc {
    pub landscape: LandscapeKey,
    /// Position of the tile in landscape quads.
    pub section_base: IVec2,
    pub subsection_size_quads: u32,
    pub num_subsections: u32,
    pub local_to_world: Mat4,
    pub bounds: TileBounds,
    pub heightmap: Option<Arc<HeightmapTexture>>,
    pub heightmap_scale_bias: Vec4,
    pub weightmap_scale_bias: Vec4,
    pub weightmap_subsection_offset: f32,
    pub has_xy_offset: bool,
    pub materials: Vec<TileMaterial>,
    pub lod_index_to_material_index: Vec<usize>,
    pub lod: TileLodInfo,
    pub tessellation: TessellationInfo,
    pub collision: CollisionInfo,
    /// Editor tool material drawn over the tile, if any.
    pub tool_material: Option<usize>,
    pub num_weightmap_layer_allocations: usize,
    /// Weightmap channels shown by the debug layer view. Negative disables.
    pub debug_channels: [i32; 3],
    pub level_visible: bool,
    pub num_occluder_vertices: u32,
}

impl Default for TileDesc {
    fn default() -> Self {
        Self {
            landscape: LandscapeKey::default(),
            section_base: IVec2::ZERO,
            subsection_size_quads: 63,
            num_subsections: 1,
            local_to_world: Mat4::IDENTITY,
            bounds: TileBounds::default(),
            heightmap: None,
            heightmap_scale_bias: Vec4::new(1.0, 1.0, 0.0, 0.0),
            weightmap_scale_bias: Vec4::new(1.0, 1.0, 0.0, 0.0),
            weightmap_subsection_offset: 0.0,
            has_xy_offset: false,
            materials: vec![TileMaterial {
                name: "LandscapeMaterial".to_string(),
                ..Default::default()
            }],
            lod_index_to_material_index: Vec::new(),
            lod: TileLodInfo::default(),
            tessellation: TessellationInfo::default(),
            collision: CollisionInfo::default(),
            tool_material: None,
            num_weightmap_layer_allocations: 0,
            debug_channels: [-1; 3],
            level_visible: true,
            num_occluder_vertices: 0,
        }
    }
}

impl TileDesc {
    #[inline]
    pub fn component_size_quads(&self) -> i32 {
        (self.subsection_size_quads * self.num_subsections) as i32
    }

    pub fn shared_buffers_info(&self, config: &LandscapeConfig) -> SharedBuffersInfo {
        SharedBuffersInfo {
            subsection_size_quads: self.subsection_size_quads,
            num_subsections: self.num_subsections,
            feature_tier: config.feature_tier,
            has_xy_offset: self.has_xy_offset,
            num_occluder_vertices: self.num_occluder_vertices,
            optimize_indices: config.optimize_mobile_indices,
            vertex_cache_size: config.vertex_cache_size,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    TriangleList,
    /// Twelve control points per patch, read from the adjacency buffers.
    PatchList12,
    PointList,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBatch {
    pub lod_index: i32,
    pub material_index: usize,
    pub primitive: PrimitiveType,
    pub index_buffer: BufferHandle,
    pub first_index: u32,
    pub num_primitives: u32,
    pub min_vertex_index: u32,
    pub max_vertex_index: u32,
    pub cast_shadow: bool,
    pub screen_size: f32,
    pub uses_adjacency: bool,
    pub is_tool: bool,
}

/// Per-draw shader parameters of one tile.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LandscapeUniformParams {
    pub local_to_world: Mat4,
    pub heightmap_uv_scale_bias: Vec4,
    pub weightmap_uv_scale_bias: Vec4,
    /// Subsection size in verts, its reciprocal in quads, then the section base.
    pub subsection_size_verts_layer_uv_pan: Vec4,
    /// Heightmap U and V offsets between subsections, the weightmap offset and
    /// the subsection size in quads.
    pub subsection_offset_params: Vec4,
    pub component_base: IVec2,
    pub subsection_size_verts: i32,
    pub num_subsections: i32,
    pub last_lod: i32,
    pub _padding: [i32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialChoice {
    pub material_index: usize,
    pub uses_adjacency: bool,
}

pub struct TileProxy {
    id: TileId,
    neighbor_info: NeighborInfo,
    section_base: IVec2,
    component_size_quads: i32,
    local_to_world: Mat4,
    bounds: TileBounds,
    feature_tier: FeatureTier,
    materials: Vec<TileMaterial>,
    lod_index_to_material_index: Vec<usize>,
    tool_material: Option<usize>,
    num_weightmap_layer_allocations: usize,
    debug_channels: [i32; 3],
    level_visible: bool,
    lod: TileLodState,
    tessellation: TessellationFalloffSettings,
    streaming: Arc<TileStreamingState>,
    shared: Arc<SharedBuffers>,
    uniform_params: LandscapeUniformParams,
    fixed_grid_params: Vec<Vec4>,
    subsection_testing_positions: ArrayVec<Vec3, MAX_SUBSECTIONS>,
}

impl TileProxy {
    pub fn new(id: TileId, desc: &TileDesc, shared: Arc<SharedBuffers>, config: &LandscapeConfig) -> Self {
        let mobile = config.feature_tier == FeatureTier::Mobile;
        let component_size_quads = desc.component_size_quads().max(1);
        let component_base = desc.section_base / component_size_quads;

        // Mobile ignores streaming residency when building the LOD range.
        let heightmap = desc.heightmap.as_deref().filter(|_| !mobile);
        let lod = TileLodState::new(
            desc.subsection_size_quads,
            &desc.lod,
            &desc.collision,
            heightmap,
            config,
        );

        let subsection_size_verts = desc.subsection_size_quads + 1;
        let fixed_grid_params = (0..ceil_log2(subsection_size_verts))
            .map(|mip| {
                let quads = ((subsection_size_verts >> mip) - 1) as f32;
                Vec4::new(mip as f32, 0.0, quads, 1.0 / quads)
            })
            .collect();

        let (heightmap_offset_u, heightmap_offset_v) = match desc.heightmap.as_deref() {
            Some(texture) if !mobile => (
                subsection_size_verts as f32 / texture.size_x.max(1) as f32,
                subsection_size_verts as f32 / texture.size_y.max(1) as f32,
            ),
            _ => (0.0, 0.0),
        };

        let uniform_params = LandscapeUniformParams {
            local_to_world: desc.local_to_world,
            heightmap_uv_scale_bias: desc.heightmap_scale_bias,
            weightmap_uv_scale_bias: desc.weightmap_scale_bias,
            subsection_size_verts_layer_uv_pan: Vec4::new(
                subsection_size_verts as f32,
                1.0 / desc.subsection_size_quads as f32,
                desc.section_base.x as f32,
                desc.section_base.y as f32,
            ),
            subsection_offset_params: Vec4::new(
                heightmap_offset_u,
                heightmap_offset_v,
                desc.weightmap_subsection_offset,
                desc.subsection_size_quads as f32,
            ),
            component_base,
            subsection_size_verts: subsection_size_verts as i32,
            num_subsections: desc.num_subsections as i32,
            last_lod: lod.last_lod,
            _padding: [0; 3],
        };

        Self {
            id,
            neighbor_info: NeighborInfo::new(desc.landscape, component_base),
            section_base: desc.section_base,
            component_size_quads,
            local_to_world: desc.local_to_world,
            bounds: desc.bounds,
            feature_tier: config.feature_tier,
            materials: desc.materials.clone(),
            lod_index_to_material_index: desc.lod_index_to_material_index.clone(),
            tool_material: desc.tool_material,
            num_weightmap_layer_allocations: desc.num_weightmap_layer_allocations,
            debug_channels: desc.debug_channels,
            level_visible: desc.level_visible,
            lod,
            tessellation: TessellationFalloffSettings::from(&desc.tessellation),
            streaming: Arc::new(TileStreamingState::new(desc.heightmap.clone())),
            shared,
            uniform_params,
            fixed_grid_params,
            subsection_testing_positions: subsection_testing_positions(desc),
        }
    }

    #[inline]
    pub fn id(&self) -> TileId {
        self.id
    }

    #[inline]
    pub fn landscape(&self) -> LandscapeKey {
        self.neighbor_info.landscape
    }

    #[inline]
    pub fn component_base(&self) -> IVec2 {
        self.neighbor_info.component_base
    }

    pub fn section_base(&self) -> IVec2 {
        self.section_base
    }

    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    pub fn lod(&self) -> &TileLodState {
        &self.lod
    }

    pub fn tessellation(&self) -> &TessellationFalloffSettings {
        &self.tessellation
    }

    pub fn streaming(&self) -> &Arc<TileStreamingState> {
        &self.streaming
    }

    pub fn shared_buffers(&self) -> &Arc<SharedBuffers> {
        &self.shared
    }

    pub fn uniform_params(&self) -> &LandscapeUniformParams {
        &self.uniform_params
    }

    pub fn fixed_grid_params(&self) -> &[Vec4] {
        &self.fixed_grid_params
    }

    pub fn subsection_testing_positions(&self) -> &[Vec3] {
        &self.subsection_testing_positions
    }

    pub fn level_visible(&self) -> bool {
        self.level_visible
    }

    pub fn set_level_visible(&mut self, visible: bool) {
        self.level_visible = visible;
    }

    pub fn materials(&self) -> &[TileMaterial] {
        &self.materials
    }

    /// True when any material this tile draws with can tessellate.
    pub fn requires_adjacency(&self) -> bool {
        self.feature_tier >= FeatureTier::Sm5
            && self
                .materials
                .iter()
                .any(|material| material.tessellation_enabled)
    }

    /// Cell record handed to the landscape's render system.
    pub fn section_entity(&self) -> SectionEntity {
        SectionEntity {
            tile: self.id,
            component_base: self.component_base(),
            lod_settings: self.lod.settings,
            origin_and_radius: self.bounds.origin.extend(self.bounds.sphere_radius),
            tessellation: self.tessellation,
            has_tessellation: self.requires_adjacency(),
            streaming: self.streaming.clone(),
        }
    }

    fn base_material_index(&self, lod: i32) -> usize {
        self.lod_index_to_material_index
            .get(lod.max(0) as usize)
            .or(self.lod_index_to_material_index.last())
            .copied()
            .unwrap_or(0)
    }

    /// Picks the material for `lod`, falling back to the non-tessellated
    /// variant once the LOD is too small on screen to benefit.
    pub fn material_for_lod(&self, lod: i32, tool_mesh: bool) -> MaterialChoice {
        let material_index = self.base_material_index(lod);
        let Some(material) = self.materials.get(material_index) else {
            return MaterialChoice {
                material_index,
                uses_adjacency: false,
            };
        };

        let tessellated = self.feature_tier >= FeatureTier::Sm5 && material.tessellation_enabled;
        let disabled = material.disabled_tessellation_index;
        match disabled {
            Some(disabled) if tessellated => {
                let threshold = if lod == 0 {
                    f32::MAX
                } else {
                    self.lod.screen_ratio_squared[lod as usize]
                };
                if threshold < self.tessellation.component_squared_screen_size || tool_mesh {
                    MaterialChoice {
                        material_index: disabled,
                        uses_adjacency: false,
                    }
                } else {
                    MaterialChoice {
                        material_index,
                        uses_adjacency: true,
                    }
                }
            }
            _ => MaterialChoice {
                material_index,
                uses_adjacency: tessellated,
            },
        }
    }

    fn num_primitives_for_lod(&self, lod: i32) -> u32 {
        let quads = (self.shared.subsection_size_verts() >> lod).saturating_sub(1);
        quads * quads * self.shared.num_subsections().pow(2) * 2
    }

    /// One batch for `lod`, or `None` when the shared set has no buffer for it.
    pub fn mesh_batch(&self, lod: i32, tool_mesh: bool) -> Option<MeshBatch> {
        let index_buffer = self.shared.index_buffer(lod as usize)?;
        let range = self.shared.index_range(lod as usize)?;
        let choice = self.material_for_lod(lod, tool_mesh);

        // Without adjacency buffers the tessellated material draws untessellated.
        let adjacency = self
            .shared
            .adjacency()
            .filter(|_| choice.uses_adjacency)
            .and_then(|adjacency| adjacency.buffers.get(lod as usize).copied());
        let (primitive, index_buffer, uses_adjacency) = match adjacency {
            Some(buffer) => (PrimitiveType::PatchList12, buffer, true),
            None => (PrimitiveType::TriangleList, index_buffer, false),
        };

        Some(MeshBatch {
            lod_index: lod,
            material_index: choice.material_index,
            primitive,
            index_buffer,
            first_index: 0,
            num_primitives: self.num_primitives_for_lod(lod),
            min_vertex_index: range.min_index_full,
            max_vertex_index: range.max_index_full,
            cast_shadow: !tool_mesh,
            screen_size: self.lod.screen_size_for_lod(lod),
            uses_adjacency,
            is_tool: tool_mesh,
        })
    }

    /// Cached batches, one per LOD the tile can draw.
    pub fn static_batches(&self) -> Vec<MeshBatch> {
        (self.lod.first_lod..=self.lod.last_lod)
            .filter_map(|lod| self.mesh_batch(lod, false))
            .collect()
    }

    /// Point-list batches over the grass index buffer, one per mip.
    pub fn grass_batches(&self) -> Vec<MeshBatch> {
        let material_index = self.base_material_index(0);
        let num_subsections = self.shared.num_subsections();
        let verts = self.shared.subsection_size_verts();

        self.shared
            .grass_mip_offsets()
            .iter()
            .enumerate()
            .map(|(mip, &offset)| {
                let mip_verts = verts >> mip;
                MeshBatch {
                    lod_index: mip as i32,
                    material_index,
                    primitive: PrimitiveType::PointList,
                    index_buffer: self.shared.grass_index_buffer(),
                    first_index: offset,
                    num_primitives: num_subsections.pow(2) * mip_verts * mip_verts,
                    min_vertex_index: 0,
                    max_vertex_index: self.shared.num_vertices().saturating_sub(1),
                    cast_shadow: false,
                    screen_size: 0.0,
                    uses_adjacency: false,
                    is_tool: false,
                }
            })
            .collect()
    }

    /// LOD this tile draws with in `view`.
    pub fn lod_to_render(&self, view: &ViewInfo, config: &LandscapeConfig) -> i32 {
        let settings = &self.lod.settings;
        let forced = resolve_forced_lod(settings, view, config);
        let lod = if forced >= 0 {
            forced
        } else {
            let screen_size_squared = compute_bounds_screen_radius_squared(
                self.bounds.origin,
                self.bounds.sphere_radius,
                view.origin,
                &view.projection,
            );
            let scale = view.lod_distance_factor * config.static_mesh_lod_distance_scale;
            get_lod_from_screen_size(settings, screen_size_squared, scale * scale).0
        };

        // Never finer than what streaming has made resident.
        lod.max(self.lod.min_valid_lod.max(0))
            .min(self.lod.max_valid_lod.max(0))
            .max(self.streaming.current_first_lod())
    }

    /// Batches drawn for `view`: the base batch, the tool overlay when the tile
    /// carries one.
    pub fn dynamic_batches(&self, view: &ViewInfo, config: &LandscapeConfig) -> Vec<MeshBatch> {
        let lod = self.lod_to_render(view, config);
        let mut batches: Vec<MeshBatch> = self.mesh_batch(lod, false).into_iter().collect();
        if let Some(tool_material) = self.tool_material {
            if let Some(mut tool) = self.mesh_batch(lod, true) {
                tool.material_index = tool_material;
                batches.push(tool);
            }
        }
        batches
    }

    pub fn debug_context(&self, lod_index: i32, view: &ViewInfo) -> DebugContext {
        DebugContext {
            lod_index,
            forced_lod: self.lod.forced_lod,
            section_base: self.section_base,
            component_size_quads: self.component_size_quads,
            num_weightmap_layer_allocations: self.num_weightmap_layer_allocations,
            debug_channels: self.debug_channels,
            show_flags: view.show_flags,
            draw_collision_pawn_lod: self.lod.settings.draw_collision_pawn_lod,
            draw_collision_visibility_lod: self.lod.settings.draw_collision_visibility_lod,
        }
    }

    /// Shifts the tile after a world origin rebase.
    pub fn apply_world_offset(&mut self, offset: Vec3) {
        self.bounds.origin += offset;
        self.local_to_world = Mat4::from_translation(offset) * self.local_to_world;
        self.uniform_params.local_to_world = self.local_to_world;
        for position in self.subsection_testing_positions.iter_mut() {
            *position += offset;
        }
    }
}

impl HasNeighborInfo for TileProxy {
    fn neighbor_info(&self) -> &NeighborInfo {
        &self.neighbor_info
    }

    fn neighbor_info_mut(&mut self) -> &mut NeighborInfo {
        &mut self.neighbor_info
    }
}

fn subsection_testing_positions(desc: &TileDesc) -> ArrayVec<Vec3, MAX_SUBSECTIONS> {
    let mut positions = ArrayVec::new();
    if desc.num_subsections <= 1 {
        return positions;
    }

    let (scale, rotation, _) = desc.local_to_world.to_scale_rotation_translation();
    let max_extend = desc.subsection_size_quads as f32 * scale.x.max(scale.y);
    let half = max_extend / 2.0;
    let top_left = desc.bounds.origin - rotation * Vec3::new(half, half, 0.0);

    for sub_y in 0..desc.num_subsections {
        for sub_x in 0..desc.num_subsections {
            let offset = Vec3::new(max_extend * sub_x as f32, max_extend * sub_y as f32, 0.0);
            if positions.try_push(top_left + rotation * offset).is_err() {
                return positions;
            }
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::arena::TilePool;
    use crate::render::backend::HeadlessBackend;

    fn proxy(desc: &TileDesc, config: &LandscapeConfig) -> TileProxy {
        let mut backend = HeadlessBackend::new();
        let shared = Arc::new(SharedBuffers::new(desc.shared_buffers_info(config), &mut backend).unwrap());
        let mut pool = TilePool::new();
        let id = pool.insert(());
        TileProxy::new(id, desc, shared, config)
    }

    #[test]
    fn uniform_params_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<LandscapeUniformParams>(), 160);
    }

    #[test]
    fn component_base_divides_section_base() {
        let desc = TileDesc {
            section_base: IVec2::new(126, -63),
            ..Default::default()
        };
        let tile = proxy(&desc, &LandscapeConfig::default());
        assert_eq!(tile.component_base(), IVec2::new(2, -1));
        assert_eq!(tile.uniform_params().component_base, IVec2::new(2, -1));
    }

    #[test]
    fn single_subsection_has_no_testing_positions() {
        let tile = proxy(&TileDesc::default(), &LandscapeConfig::default());
        assert!(tile.subsection_testing_positions().is_empty());
    }

    #[test]
    fn missing_material_table_falls_back_to_first_material() {
        let desc = TileDesc {
            materials: Vec::new(),
            ..Default::default()
        };
        let tile = proxy(&desc, &LandscapeConfig::default());
        let choice = tile.material_for_lod(3, false);
        assert_eq!(choice.material_index, 0);
        assert!(!choice.uses_adjacency);
    }
}
