//! Per-landscape LOD state.
//!
//! A [`RenderSystem`] keeps a dense grid over the component coordinates of
//! every registered tile. Each frame it computes one continuous LOD value per
//! cell and view, uploads the values to GPU buffers and hands tiles a small
//! uniform block ([`SectionLodUniforms`]) so the vertex shader can morph
//! between neighbouring cells without cracks.

pub mod view;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytemuck::Pod;
use glam::{IVec2, Vec4};
use tracing::{debug, error, trace, warn};

use super::arena::TileId;
use super::backend::{BufferHandle, BufferInfo, BufferUsage, GpuBackend};
use super::config::LandscapeConfig;
use super::lod::{get_lod_from_screen_size, resolve_forced_lod, LodSettings, TessellationFalloffSettings};
use super::streaming::TileStreamingState;
use super::task::TaskHandle;
use crate::utils::math::{compute_bounds_draw_distance, compute_bounds_screen_radius_squared};

pub use view::{PerViewResults, SectionLodUniforms, ShowFlags, ViewId, ViewInfo};

/// What a tile hands to its render system on registration.
#[derive(Clone, Debug)]
pub struct SectionEntity {
    pub tile: TileId,
    pub component_base: IVec2,
    pub lod_settings: LodSettings,
    /// Bounds sphere: xyz origin, w radius.
    pub origin_and_radius: Vec4,
    pub tessellation: TessellationFalloffSettings,
    /// Any of the tile's materials is tessellated.
    pub has_tessellation: bool,
    pub streaming: Arc<TileStreamingState>,
}

#[derive(Clone, Copy, Debug, Default)]
struct SectionBuffers {
    lod: Option<BufferHandle>,
    lod_bias: Option<BufferHandle>,
    tessellation_falloff_c: Option<BufferHandle>,
    tessellation_falloff_k: Option<BufferHandle>,
    uniform: Option<BufferHandle>,
}

/// Immutable inputs of one per-view LOD pass.
struct SectionSnapshot {
    lod_settings: Arc<Vec<LodSettings>>,
    origin_and_radius: Arc<Vec<Vec4>>,
    current_first_lod: Vec<f32>,
    /// Present when tessellation falloff has to be computed.
    tessellation: Option<TessellationFalloffSettings>,
}

type ViewCache = Arc<Mutex<HashMap<ViewId, PerViewResults>>>;

fn compute_section_lods(
    snapshot: &SectionSnapshot,
    view: &ViewInfo,
    config: &LandscapeConfig,
) -> PerViewResults {
    let count = snapshot.lod_settings.len();
    let mut results = PerViewResults {
        lod_values: vec![0.0; count],
        tessellation_falloff_c: vec![1.0; count],
        tessellation_falloff_k: vec![0.0; count],
    };

    let lod_scale = view.lod_distance_factor * config.static_mesh_lod_distance_scale;
    let lod_scale_squared = lod_scale * lod_scale;

    for index in 0..count {
        let settings = &snapshot.lod_settings[index];
        let origin_and_radius = snapshot.origin_and_radius[index];
        let radius = origin_and_radius.w;

        let screen_size_squared = compute_bounds_screen_radius_squared(
            origin_and_radius.truncate(),
            radius,
            view.origin,
            &view.projection,
        );
        let (_, fractional) = get_lod_from_screen_size(settings, screen_size_squared, lod_scale_squared);
        let forced = resolve_forced_lod(settings, view, config);

        let lod = if forced >= 0 { forced as f32 } else { fractional };
        results.lod_values[index] = lod.max(snapshot.current_first_lod[index]);

        // Empty cells have no radius and keep the neutral falloff.
        if let Some(tessellation) = snapshot.tessellation.filter(|_| radius > 0.0) {
            let half_radius = radius / 2.0;
            let max_distance = compute_bounds_draw_distance(
                tessellation.component_squared_screen_size.sqrt(),
                half_radius,
                &view.projection,
            );
            let falloff_squared = tessellation.component_screen_size_falloff.powi(2);
            let start_distance = (compute_bounds_draw_distance(
                falloff_squared.min(tessellation.component_squared_screen_size).sqrt(),
                half_radius,
                &view.projection,
            ) - max_distance)
                .min(max_distance);

            // The shader evaluates a = C - K * d.
            results.tessellation_falloff_c[index] = max_distance / (max_distance - start_distance);
            results.tessellation_falloff_k[index] = -(1.0 / (start_distance - max_distance));
        }
    }

    results
}

fn compute_heightmap_lod_biases(
    streaming: &[Option<Arc<TileStreamingState>>],
    current: &[f32],
) -> Vec<f32> {
    streaming
        .iter()
        .zip(current)
        .map(|(state, &bias)| {
            match state.as_ref().and_then(|state| state.heightmap.as_ref()) {
                Some(heightmap) => heightmap.missing_mips() as f32,
                None => bias,
            }
        })
        .collect()
}

fn upload<T: Pod>(
    backend: &mut impl GpuBackend,
    slot: &mut Option<BufferHandle>,
    debug_name: &str,
    usage: BufferUsage,
    data: &[T],
) {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    match slot {
        Some(handle) => backend.update_buffer(*handle, bytes),
        None => {
            *slot = Some(backend.create_buffer(&BufferInfo {
                debug_name,
                usage,
                stride: std::mem::size_of::<T>() as u32,
                initial_data: bytes,
            }));
        }
    }
}

pub struct RenderSystem {
    config: LandscapeConfig,
    min: IVec2,
    size: IVec2,
    num_registered_entities: u32,
    num_entities_with_tessellation: u32,
    tessellation_falloff_settings: TessellationFalloffSettings,

    section_lod_settings: Arc<Vec<LodSettings>>,
    section_origin_and_radius: Arc<Vec<Vec4>>,
    section_streaming: Arc<Vec<Option<Arc<TileStreamingState>>>>,
    section_tiles: Vec<Option<TileId>>,

    section_lod_values: Vec<f32>,
    section_lod_biases: Vec<f32>,
    section_tessellation_falloff_c: Vec<f32>,
    section_tessellation_falloff_k: Vec<f32>,

    cached_views: ViewCache,
    view_tasks: HashMap<ViewId, TaskHandle<()>>,
    bias_task: Option<TaskHandle<Vec<f32>>>,
    cached_view: Option<ViewId>,
    buffers: SectionBuffers,
}

impl RenderSystem {
    pub fn new(config: LandscapeConfig) -> Self {
        Self {
            config,
            min: IVec2::new(i32::MAX, i32::MAX),
            size: IVec2::ZERO,
            num_registered_entities: 0,
            num_entities_with_tessellation: 0,
            tessellation_falloff_settings: TessellationFalloffSettings::default(),
            section_lod_settings: Arc::new(Vec::new()),
            section_origin_and_radius: Arc::new(Vec::new()),
            section_streaming: Arc::new(Vec::new()),
            section_tiles: Vec::new(),
            section_lod_values: Vec::new(),
            section_lod_biases: Vec::new(),
            section_tessellation_falloff_c: Vec::new(),
            section_tessellation_falloff_k: Vec::new(),
            cached_views: Arc::new(Mutex::new(HashMap::new())),
            view_tasks: HashMap::new(),
            bias_task: None,
            cached_view: None,
            buffers: SectionBuffers::default(),
        }
    }

    #[inline]
    pub fn min(&self) -> IVec2 {
        self.min
    }

    #[inline]
    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn num_registered_entities(&self) -> u32 {
        self.num_registered_entities
    }

    pub fn num_entities_with_tessellation(&self) -> u32 {
        self.num_entities_with_tessellation
    }

    pub fn tessellation_falloff_settings(&self) -> &TessellationFalloffSettings {
        &self.tessellation_falloff_settings
    }

    fn cell_count(&self) -> usize {
        (self.size.x * self.size.y) as usize
    }

    fn tessellation_active(&self) -> bool {
        self.tessellation_falloff_settings.use_component_screen_size_falloff
            && self.num_entities_with_tessellation > 0
    }

    /// Grid slot of a component coordinate, if it lies inside the grid.
    pub fn linear_index(&self, component_base: IVec2) -> Option<usize> {
        let local = component_base - self.min;
        if local.x < 0 || local.y < 0 || local.x >= self.size.x || local.y >= self.size.y {
            return None;
        }
        Some((local.y * self.size.x + local.x) as usize)
    }

    pub fn section_lod_value(&self, component_base: IVec2) -> Option<f32> {
        self.linear_index(component_base)
            .map(|index| self.section_lod_values[index])
    }

    pub fn section_lod_bias(&self, component_base: IVec2) -> Option<f32> {
        self.linear_index(component_base)
            .map(|index| self.section_lod_biases[index])
    }

    pub fn section_lod_settings(&self, component_base: IVec2) -> Option<LodSettings> {
        self.linear_index(component_base)
            .map(|index| self.section_lod_settings[index])
    }

    pub fn section_origin_and_radius(&self, component_base: IVec2) -> Option<Vec4> {
        self.linear_index(component_base)
            .map(|index| self.section_origin_and_radius[index])
    }

    pub fn section_tessellation_falloff(&self, component_base: IVec2) -> Option<(f32, f32)> {
        self.linear_index(component_base).map(|index| {
            (
                self.section_tessellation_falloff_c[index],
                self.section_tessellation_falloff_k[index],
            )
        })
    }

    pub fn section_tile(&self, component_base: IVec2) -> Option<TileId> {
        self.linear_index(component_base)
            .and_then(|index| self.section_tiles[index])
    }

    pub fn tile_at_linear(&self, index: usize) -> Option<TileId> {
        self.section_tiles.get(index).copied().flatten()
    }

    /// Active LOD values in grid order.
    pub fn section_lod_values(&self) -> &[f32] {
        &self.section_lod_values
    }

    pub fn section_lod_biases(&self) -> &[f32] {
        &self.section_lod_biases
    }

    pub fn uniforms(&self) -> SectionLodUniforms {
        let handle = |slot: Option<BufferHandle>| slot.unwrap_or_default().0;
        SectionLodUniforms {
            min: self.min,
            size: self.size,
            section_lod: handle(self.buffers.lod),
            section_lod_bias: handle(self.buffers.lod_bias),
            section_tessellation_falloff_c: handle(self.buffers.tessellation_falloff_c),
            section_tessellation_falloff_k: handle(self.buffers.tessellation_falloff_k),
        }
    }

    pub fn uniform_buffer(&self) -> Option<BufferHandle> {
        self.buffers.uniform
    }

    pub fn register_entity(&mut self, entity: &SectionEntity, backend: &mut impl GpuBackend) {
        let base = entity.component_base;

        if self.num_registered_entities > 0 {
            let original_max = self.min + self.size - IVec2::ONE;
            let new_min = self.min.min(base);
            let new_max = original_max.max(base);
            let size_required = new_max - new_min + IVec2::ONE;

            if new_min != self.min || size_required != self.size {
                self.resize_and_move_to(new_min, size_required, backend);
                self.recreate_buffers(None, backend);
            }

            if self.tessellation_falloff_settings != entity.tessellation {
                error!(
                    "Tile at {}, {} disagrees with its landscape's tessellation falloff settings",
                    base.x, base.y
                );
                debug_assert!(
                    false,
                    "mismatched tessellation falloff settings for tile at {base}"
                );
            }
        } else {
            self.tessellation_falloff_settings = entity.tessellation;
            self.resize_and_move_to(base, IVec2::ONE, backend);
            self.recreate_buffers(None, backend);
        }

        if entity.has_tessellation {
            self.num_entities_with_tessellation += 1;
        }
        self.num_registered_entities += 1;

        let Some(index) = self.linear_index(base) else {
            error!("Tile at {}, {} fell outside its render system grid", base.x, base.y);
            return;
        };
        Arc::make_mut(&mut self.section_lod_settings)[index] = entity.lod_settings;
        Arc::make_mut(&mut self.section_origin_and_radius)[index] = entity.origin_and_radius;
        Arc::make_mut(&mut self.section_streaming)[index] = Some(entity.streaming.clone());
        self.section_tiles[index] = Some(entity.tile);
    }

    pub fn set_section_origin_and_radius(&mut self, component_base: IVec2, origin_and_radius: Vec4) {
        if let Some(index) = self.linear_index(component_base) {
            Arc::make_mut(&mut self.section_origin_and_radius)[index] = origin_and_radius;
        }
    }

    /// Clears the tile's cell. The grid keeps its size.
    pub fn unregister_entity(&mut self, entity: &SectionEntity) {
        if let Some(index) = self.linear_index(entity.component_base) {
            Arc::make_mut(&mut self.section_lod_settings)[index] = LodSettings::default();
            Arc::make_mut(&mut self.section_origin_and_radius)[index] = Vec4::ZERO;
            Arc::make_mut(&mut self.section_streaming)[index] = None;
            self.section_tiles[index] = None;
        }

        if entity.has_tessellation {
            self.num_entities_with_tessellation = self.num_entities_with_tessellation.saturating_sub(1);
        }
        self.num_registered_entities = self.num_registered_entities.saturating_sub(1);
    }

    /// Re-homes the grid at `new_min` with `new_size`, keeping every cell
    /// that still fits. The frame's bias fetch lands before the move; per-view
    /// work targets the old layout and is dropped.
    pub fn resize_and_move_to(&mut self, new_min: IVec2, new_size: IVec2, backend: &mut impl GpuBackend) {
        for slot in [
            &mut self.buffers.lod,
            &mut self.buffers.lod_bias,
            &mut self.buffers.tessellation_falloff_c,
            &mut self.buffers.tessellation_falloff_k,
        ] {
            if let Some(handle) = slot.take() {
                backend.release_buffer(handle);
            }
        }

        self.discard_tasks();

        let count = (new_size.x * new_size.y).max(0) as usize;
        let mut lod_values = vec![0.0; count];
        let mut lod_biases = vec![0.0; count];
        let mut falloff_c = vec![1.0; count];
        let mut falloff_k = vec![0.0; count];
        let mut lod_settings = vec![LodSettings::default(); count];
        let mut origin_and_radius = vec![Vec4::ZERO; count];
        let mut streaming = vec![None; count];
        let mut tiles = vec![None; count];

        let keep_falloff = self.tessellation_active();
        for y in 0..self.size.y {
            for x in 0..self.size.x {
                let index = (y * self.size.x + x) as usize;
                let new_x = x + (self.min.x - new_min.x);
                let new_y = y + (self.min.y - new_min.y);
                if new_x < 0 || new_y < 0 || new_x >= new_size.x || new_y >= new_size.y {
                    continue;
                }
                let new_index = (new_y * new_size.x + new_x) as usize;

                lod_values[new_index] = self.section_lod_values[index];
                lod_biases[new_index] = self.section_lod_biases[index];
                if keep_falloff {
                    falloff_c[new_index] = self.section_tessellation_falloff_c[index];
                    falloff_k[new_index] = self.section_tessellation_falloff_k[index];
                }
                lod_settings[new_index] = self.section_lod_settings[index];
                origin_and_radius[new_index] = self.section_origin_and_radius[index];
                streaming[new_index] = self.section_streaming[index].clone();
                tiles[new_index] = self.section_tiles[index];
            }
        }

        debug!(
            "Landscape grid moved from ({}, {}) {}x{} to ({}, {}) {}x{}",
            self.min.x, self.min.y, self.size.x, self.size.y, new_min.x, new_min.y, new_size.x, new_size.y
        );

        self.min = new_min;
        self.size = new_size;
        self.section_lod_values = lod_values;
        self.section_lod_biases = lod_biases;
        self.section_tessellation_falloff_c = falloff_c;
        self.section_tessellation_falloff_k = falloff_k;
        self.section_lod_settings = Arc::new(lod_settings);
        self.section_origin_and_radius = Arc::new(origin_and_radius);
        self.section_streaming = Arc::new(streaming);
        self.section_tiles = tiles;
    }

    fn discard_tasks(&mut self) {
        self.join_bias_task();
        for (_, task) in self.view_tasks.drain() {
            let _ = task.join();
        }
        self.lock_cache().clear();
        self.cached_view = None;
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<ViewId, PerViewResults>> {
        self.cached_views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> SectionSnapshot {
        let current_first_lod = self
            .section_streaming
            .iter()
            .map(|state| {
                state
                    .as_ref()
                    .map_or(0.0, |state| state.current_first_lod() as f32)
            })
            .collect();

        SectionSnapshot {
            lod_settings: self.section_lod_settings.clone(),
            origin_and_radius: self.section_origin_and_radius.clone(),
            current_first_lod,
            tessellation: self
                .tessellation_active()
                .then_some(self.tessellation_falloff_settings),
        }
    }

    /// Computes LOD values and tessellation falloff of every cell for `view`.
    pub fn compute_section_per_view_parameters(&self, view: &ViewInfo) -> PerViewResults {
        compute_section_lods(&self.snapshot(), view, &self.config)
    }

    /// Starts the LOD pass for `view`. Results are picked up by
    /// [`RenderSystem::begin_render_view`].
    pub fn prepare_view(&mut self, view: &ViewInfo) {
        if self.cell_count() == 0 || self.view_tasks.contains_key(&view.id) {
            return;
        }

        let snapshot = self.snapshot();
        let cache = self.cached_views.clone();
        let config = self.config.clone();
        let view = *view;
        trace!("Dispatching landscape LOD pass for view {:?}", view.id);

        let task = TaskHandle::dispatch(self.config.threaded_lod, move || {
            let results = compute_section_lods(&snapshot, &view, &config);
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(view.id, results);
        });
        self.view_tasks.insert(view.id, task);
    }

    /// Waits for `view`'s LOD pass, makes its values active and uploads them.
    pub fn begin_render_view(&mut self, view: &ViewInfo, backend: &mut impl GpuBackend) -> SectionLodUniforms {
        self.join_bias_task();

        if let Some(task) = self.view_tasks.remove(&view.id) {
            if task.join().is_none() {
                error!("Landscape LOD pass for view {:?} did not finish", view.id);
            }
        }

        if self.cell_count() > 0 {
            let cached = self.lock_cache().get(&view.id).cloned();
            let results = match cached {
                Some(results) if results.lod_values.len() == self.cell_count() => results,
                _ => self.compute_section_per_view_parameters(view),
            };

            self.section_lod_values = results.lod_values;
            if self.tessellation_active() {
                self.section_tessellation_falloff_c = results.tessellation_falloff_c;
                self.section_tessellation_falloff_k = results.tessellation_falloff_k;
            }
        }

        self.recreate_buffers(Some(view.id), backend);
        self.uniforms()
    }

    /// Refreshes per-cell LOD biases from heightmap residency.
    pub fn fetch_heightmap_lod_biases(&mut self) {
        self.section_lod_biases =
            compute_heightmap_lod_biases(&self.section_streaming, &self.section_lod_biases);
    }

    fn join_bias_task(&mut self) {
        let Some(task) = self.bias_task.take() else {
            return;
        };
        match task.join() {
            Some(biases) if biases.len() == self.section_lod_biases.len() => {
                self.section_lod_biases = biases;
            }
            Some(_) => {
                warn!("Landscape LOD bias fetch ran on a stale grid, fetching inline");
                self.fetch_heightmap_lod_biases();
            }
            None => {
                error!("Landscape LOD bias fetch did not finish, fetching inline");
                self.fetch_heightmap_lod_biases();
            }
        }
    }

    pub fn begin_frame(&mut self) {
        self.join_bias_task();
        self.cached_view = None;
        self.lock_cache().clear();

        let streaming = self.section_streaming.clone();
        let current = self.section_lod_biases.clone();
        self.bias_task = Some(TaskHandle::dispatch(self.config.threaded_lod, move || {
            compute_heightmap_lod_biases(&streaming, &current)
        }));
    }

    pub fn end_frame(&mut self) {
        self.join_bias_task();
        for (view, task) in self.view_tasks.drain() {
            if task.join().is_none() {
                error!("Landscape LOD pass for view {:?} did not finish", view);
            }
        }
    }

    /// Uploads the active arrays. Skipped when `view` was the last view
    /// uploaded this frame.
    pub fn recreate_buffers(&mut self, view: Option<ViewId>, backend: &mut impl GpuBackend) {
        if view.is_some() && view == self.cached_view {
            return;
        }

        if self.size != IVec2::ZERO {
            let usage = BufferUsage::STRUCTURED | BufferUsage::DYNAMIC;
            upload(backend, &mut self.buffers.lod, "LandscapeSectionLOD", usage, &self.section_lod_values);
            upload(
                backend,
                &mut self.buffers.lod_bias,
                "LandscapeSectionLODBias",
                usage,
                &self.section_lod_biases,
            );

            // Without falloff the buffers keep the neutral values they were created with.
            let tessellation_active = self.tessellation_active();
            if tessellation_active || self.buffers.tessellation_falloff_c.is_none() {
                upload(
                    backend,
                    &mut self.buffers.tessellation_falloff_c,
                    "LandscapeSectionTessellationFalloffC",
                    usage,
                    &self.section_tessellation_falloff_c,
                );
            }
            if tessellation_active || self.buffers.tessellation_falloff_k.is_none() {
                upload(
                    backend,
                    &mut self.buffers.tessellation_falloff_k,
                    "LandscapeSectionTessellationFalloffK",
                    usage,
                    &self.section_tessellation_falloff_k,
                );
            }

            let uniforms = [self.uniforms()];
            upload(
                backend,
                &mut self.buffers.uniform,
                "LandscapeSectionLODUniforms",
                BufferUsage::UNIFORM | BufferUsage::DYNAMIC,
                &uniforms,
            );
        }

        self.cached_view = view;
    }

    /// Joins outstanding work and frees every GPU buffer.
    pub fn release_resources(&mut self, backend: &mut impl GpuBackend) {
        self.discard_tasks();
        for slot in [
            &mut self.buffers.lod,
            &mut self.buffers.lod_bias,
            &mut self.buffers.tessellation_falloff_c,
            &mut self.buffers.tessellation_falloff_k,
            &mut self.buffers.uniform,
        ] {
            if let Some(handle) = slot.take() {
                backend.release_buffer(handle);
            }
        }
    }
}
