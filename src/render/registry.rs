use std::collections::HashMap;
use std::sync::Arc;

use glam::{IVec2, Vec3};
use tracing::{debug, info, warn};

use super::arena::{TileId, TilePool};
use super::backend::{BufferHandle, BufferInfo, BufferUsage, GpuBackend};
use super::config::LandscapeConfig;
use super::debug::{debug_batch, dump_lods, DebugBatch};
use super::error::{LandscapeError, Result};
use super::geometry::cache::SharedBuffersCache;
use super::geometry::SharedBuffers;
use super::neighbors::{
    HasNeighborInfo, LandscapeKey, NeighborRegistry, Registration, Unregistration,
};
use super::proxy::{MeshBatch, TileDesc, TileProxy};
use super::system::view::{SectionLodUniforms, ViewInfo};
use super::system::RenderSystem;

/// Buffers bound by tiles that are not part of any render system, such as
/// tiles in a hidden level.
struct NullSectionLodResources {
    buffers: [BufferHandle; 4],
    uniform: BufferHandle,
}

impl NullSectionLodResources {
    fn new(backend: &mut impl GpuBackend) -> Self {
        let zero = [0.0f32];
        let names = [
            "NullLandscapeSectionLOD",
            "NullLandscapeSectionLODBias",
            "NullLandscapeSectionTessellationFalloffC",
            "NullLandscapeSectionTessellationFalloffK",
        ];
        let buffers = names.map(|debug_name| {
            backend.create_buffer(&BufferInfo {
                debug_name,
                usage: BufferUsage::STRUCTURED,
                stride: 4,
                initial_data: bytemuck::cast_slice(&zero),
            })
        });

        let uniforms = [Self::uniforms_for(&buffers)];
        let uniform = backend.create_buffer(&BufferInfo {
            debug_name: "NullLandscapeSectionLODUniforms",
            usage: BufferUsage::UNIFORM,
            stride: std::mem::size_of::<SectionLodUniforms>() as u32,
            initial_data: bytemuck::cast_slice(&uniforms),
        });

        Self { buffers, uniform }
    }

    fn uniforms_for(buffers: &[BufferHandle; 4]) -> SectionLodUniforms {
        SectionLodUniforms {
            min: IVec2::ZERO,
            size: IVec2::ZERO,
            section_lod: buffers[0].0,
            section_lod_bias: buffers[1].0,
            section_tessellation_falloff_c: buffers[2].0,
            section_tessellation_falloff_k: buffers[3].0,
        }
    }

    fn uniforms(&self) -> SectionLodUniforms {
        Self::uniforms_for(&self.buffers)
    }

    fn release(&self, backend: &mut impl GpuBackend) {
        for handle in self.buffers {
            backend.release_buffer(handle);
        }
        backend.release_buffer(self.uniform);
    }
}

/// Owns every landscape render object of a scene: the tiles, the per
/// landscape render systems, the shared geometry and the GPU backend.
pub struct RenderSystemRegistry<B: GpuBackend> {
    config: LandscapeConfig,
    backend: B,
    tiles: TilePool<TileProxy>,
    neighbors: NeighborRegistry,
    systems: HashMap<LandscapeKey, RenderSystem>,
    shared_buffers: SharedBuffersCache,
    null_resources: Option<NullSectionLodResources>,
}

impl<B: GpuBackend> RenderSystemRegistry<B> {
    pub fn new(config: LandscapeConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            tiles: TilePool::new(),
            neighbors: NeighborRegistry::new(),
            systems: HashMap::new(),
            shared_buffers: SharedBuffersCache::new(),
            null_resources: None,
        }
    }

    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn shared_buffers(&self) -> &SharedBuffersCache {
        &self.shared_buffers
    }

    pub fn tile(&self, id: TileId) -> Option<&TileProxy> {
        self.tiles.get_ref(id)
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn render_system(&self, landscape: &LandscapeKey) -> Option<&RenderSystem> {
        self.systems.get(landscape)
    }

    pub fn num_render_systems(&self) -> usize {
        self.systems.len()
    }

    /// Builds a tile, acquiring the shared geometry of its shape, and links it
    /// into its landscape when its level is visible.
    pub fn create_tile(&mut self, desc: &TileDesc) -> Result<TileId> {
        let info = desc.shared_buffers_info(&self.config);
        let shared = self.shared_buffers.acquire(&info, &mut self.backend)?;

        let config = &self.config;
        let id = self
            .tiles
            .insert_with(|id| TileProxy::new(id, desc, shared.clone(), config));

        if self.tiles.get_ref(id).is_some_and(TileProxy::requires_adjacency) {
            shared.ensure_adjacency(&mut self.backend);
        }

        if desc.level_visible {
            self.register_neighbors(id)?;
        }

        debug!(
            "Created landscape tile {:?} at {}, {}",
            id, desc.section_base.x, desc.section_base.y
        );
        Ok(id)
    }

    /// Unlinks the tile and drops its reference on the shared geometry.
    pub fn destroy_tile(&mut self, id: TileId) -> Result<()> {
        self.unregister_neighbors(id)?;
        let tile = self.tiles.release(id).ok_or(LandscapeError::UnknownTile(id))?;
        self.shared_buffers
            .release(tile.shared_buffers().key(), &mut self.backend);
        Ok(())
    }

    /// Adds the tile to the neighbor map and its landscape's render system,
    /// creating the system for the landscape's first tile.
    pub fn register_neighbors(&mut self, id: TileId) -> Result<()> {
        if !self.tiles.contains(id) {
            return Err(LandscapeError::UnknownTile(id));
        }

        match self.neighbors.register(&mut self.tiles, id) {
            Registration::Registered { .. } => {
                let Some(tile) = self.tiles.get_ref(id) else {
                    return Err(LandscapeError::UnknownTile(id));
                };
                let landscape = tile.landscape();
                let entity = tile.section_entity();

                let system = self.systems.entry(landscape).or_insert_with(|| {
                    info!(
                        "Created landscape render system for world {} landscape {:#x}",
                        landscape.world, landscape.guid
                    );
                    RenderSystem::new(self.config.clone())
                });
                system.register_entity(&entity, &mut self.backend);
            }
            Registration::AlreadyRegistered | Registration::Duplicate => {}
        }
        Ok(())
    }

    /// Reverses [`Self::register_neighbors`]. The render system is destroyed
    /// together with its landscape's last tile.
    pub fn unregister_neighbors(&mut self, id: TileId) -> Result<()> {
        let Some(tile) = self.tiles.get_ref(id) else {
            return Err(LandscapeError::UnknownTile(id));
        };
        let landscape = tile.landscape();
        let entity = tile.section_entity();

        match self.neighbors.unregister(&mut self.tiles, id) {
            Unregistration::Unregistered { landscape_empty } => {
                if let Some(system) = self.systems.get_mut(&landscape) {
                    system.unregister_entity(&entity);
                }
                if landscape_empty {
                    if let Some(mut system) = self.systems.remove(&landscape) {
                        system.release_resources(&mut self.backend);
                        info!(
                            "Destroyed landscape render system for world {} landscape {:#x}",
                            landscape.world, landscape.guid
                        );
                    }
                }
            }
            Unregistration::NotRegistered => {}
        }
        Ok(())
    }

    /// Links every tile of a level that just became visible.
    pub fn on_level_added_to_world(&mut self, tiles: &[TileId]) -> Result<()> {
        for &id in tiles {
            match self.tiles.get_mut_ref(id) {
                Some(tile) => tile.set_level_visible(true),
                None => {
                    warn!("Level added with unknown landscape tile {:?}", id);
                    continue;
                }
            }
            self.register_neighbors(id)?;
        }
        Ok(())
    }

    /// Unlinks every tile of a level that is being hidden.
    pub fn on_level_removed_from_world(&mut self, tiles: &[TileId]) -> Result<()> {
        for &id in tiles {
            self.unregister_neighbors(id)?;
            if let Some(tile) = self.tiles.get_mut_ref(id) {
                tile.set_level_visible(false);
            }
        }
        Ok(())
    }

    pub fn begin_frame(&mut self) {
        for system in self.systems.values_mut() {
            system.begin_frame();
        }
    }

    pub fn prepare_view(&mut self, view: &ViewInfo) {
        for system in self.systems.values_mut() {
            system.prepare_view(view);
        }
    }

    pub fn begin_render_view(&mut self, view: &ViewInfo) {
        for system in self.systems.values_mut() {
            system.begin_render_view(view, &mut self.backend);
        }
    }

    pub fn end_frame(&mut self) {
        for system in self.systems.values_mut() {
            system.end_frame();
        }
    }

    /// Section LOD uniforms the tile binds. Tiles outside any render system
    /// get the null resources.
    pub fn section_lod_uniforms(&mut self, id: TileId) -> Result<SectionLodUniforms> {
        let tile = self.tiles.get_ref(id).ok_or(LandscapeError::UnknownTile(id))?;
        let registered = tile.neighbor_info().registered;
        let landscape = tile.landscape();

        if registered {
            if let Some(system) = self.systems.get(&landscape) {
                return Ok(system.uniforms());
            }
        }

        let backend = &mut self.backend;
        let null = self
            .null_resources
            .get_or_insert_with(|| NullSectionLodResources::new(backend));
        Ok(null.uniforms())
    }

    pub fn static_batches(&self, id: TileId) -> Result<Vec<MeshBatch>> {
        self.tiles
            .get_ref(id)
            .map(TileProxy::static_batches)
            .ok_or(LandscapeError::UnknownTile(id))
    }

    pub fn grass_batches(&self, id: TileId) -> Result<Vec<MeshBatch>> {
        self.tiles
            .get_ref(id)
            .map(TileProxy::grass_batches)
            .ok_or(LandscapeError::UnknownTile(id))
    }

    /// Batches drawn for the tile in `view`, plus the debug batch of the
    /// configured view mode.
    pub fn mesh_batches_for_view(
        &self,
        id: TileId,
        view: &ViewInfo,
    ) -> Result<(Vec<MeshBatch>, Option<DebugBatch>)> {
        let tile = self.tiles.get_ref(id).ok_or(LandscapeError::UnknownTile(id))?;
        let batches = tile.dynamic_batches(view, &self.config);
        let lod = tile.lod_to_render(view, &self.config);
        let debug = debug_batch(self.config.view_mode, &tile.debug_context(lod, view));
        Ok((batches, debug))
    }

    pub fn lod_to_render(&self, id: TileId, view: &ViewInfo) -> Result<i32> {
        self.tiles
            .get_ref(id)
            .map(|tile| tile.lod_to_render(view, &self.config))
            .ok_or(LandscapeError::UnknownTile(id))
    }

    /// Moves every tile and its render system cell after a world origin rebase.
    pub fn apply_world_offset(&mut self, offset: Vec3) {
        let mut moved = Vec::with_capacity(self.tiles.len());
        self.tiles.for_each_occupied(|id, _| moved.push(id));

        for id in moved {
            let Some(tile) = self.tiles.get_mut_ref(id) else {
                continue;
            };
            tile.apply_world_offset(offset);
            if !tile.neighbor_info().registered {
                continue;
            }
            let entity = tile.section_entity();
            if let Some(system) = self.systems.get_mut(&tile.landscape()) {
                system.set_section_origin_and_radius(entity.component_base, entity.origin_and_radius);
            }
        }
    }

    /// Text dump of a landscape's active LOD grid.
    pub fn dump_lods(&self, landscape: &LandscapeKey) -> Option<String> {
        self.systems.get(landscape).map(dump_lods)
    }

    pub fn shared_buffers_for(&self, id: TileId) -> Option<&Arc<SharedBuffers>> {
        self.tiles.get_ref(id).map(TileProxy::shared_buffers)
    }

    /// Tears down everything, returning the backend.
    pub fn shutdown(mut self) -> B {
        let mut ids = Vec::with_capacity(self.tiles.len());
        self.tiles.for_each_occupied(|id, _| ids.push(id));
        for id in ids {
            if let Err(err) = self.destroy_tile(id) {
                warn!("Failed to destroy landscape tile during shutdown: {}", err);
            }
        }
        if let Some(null) = self.null_resources.take() {
            null.release(&mut self.backend);
        }
        self.backend
    }
}
