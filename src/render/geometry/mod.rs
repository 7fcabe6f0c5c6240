//! Vertex and index buffers shared by every tile of the same shape.
//!
//! All tiles with the same subsection size, subsection count, feature tier and
//! XY-offset flag draw from one [`SharedBuffers`] set. Tile specific data
//! (heights, weights) lives in textures, so the vertex buffer only has to hold
//! grid coordinates.

pub mod adjacency;
pub mod cache;
pub mod forsyth;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use super::backend::{BufferHandle, BufferInfo, BufferUsage, GpuBackend};
use super::config::FeatureTier;
use super::error::{LandscapeError, Result};
use crate::utils::math::{ceil_log2, is_power_of_two};

pub use adjacency::AdjacencyIndexBuffers;
pub use cache::SharedBuffersCache;

/// Grid coordinate of one vertex inside its subsection.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct LandscapeVertex {
    pub x: u8,
    pub y: u8,
    pub sub_x: u8,
    pub sub_y: u8,
}

/// Index list stored at the narrowest width that can address the vertices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn from_u32(indices: Vec<u32>, use_32bit: bool) -> Self {
        if use_32bit {
            IndexData::U32(indices)
        } else {
            IndexData::U16(indices.into_iter().map(|index| index as u16).collect())
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(indices) => indices.len(),
            IndexData::U32(indices) => indices.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, position: usize) -> u32 {
        match self {
            IndexData::U16(indices) => indices[position] as u32,
            IndexData::U32(indices) => indices[position],
        }
    }

    pub fn is_32bit(&self) -> bool {
        matches!(self, IndexData::U32(_))
    }

    pub fn stride(&self) -> u32 {
        if self.is_32bit() {
            4
        } else {
            2
        }
    }

    pub fn to_u32_vec(&self) -> Vec<u32> {
        match self {
            IndexData::U16(indices) => indices.iter().map(|&index| index as u32).collect(),
            IndexData::U32(indices) => indices.clone(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(indices) => bytemuck::cast_slice(indices),
            IndexData::U32(indices) => bytemuck::cast_slice(indices),
        }
    }
}

/// Lowest and highest vertex referenced by one LOD's index buffer, per
/// subsection (`[sub_x][sub_y]`) and for the whole tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexRange {
    pub min_index: [[u32; 2]; 2],
    pub max_index: [[u32; 2]; 2],
    pub min_index_full: u32,
    pub max_index_full: u32,
}

impl IndexRange {
    fn begin_full(&mut self) {
        self.min_index_full = u32::MAX;
        self.max_index_full = 0;
    }

    fn begin_subsection(&mut self, sub_x: usize, sub_y: usize) {
        self.min_index[sub_x][sub_y] = u32::MAX;
        self.max_index[sub_x][sub_y] = 0;
    }

    fn include(&mut self, sub_x: usize, sub_y: usize, index: u32) {
        self.min_index[sub_x][sub_y] = self.min_index[sub_x][sub_y].min(index);
        self.max_index[sub_x][sub_y] = self.max_index[sub_x][sub_y].max(index);
    }

    fn end_subsection(&mut self, sub_x: usize, sub_y: usize) {
        self.min_index_full = self.min_index_full.min(self.min_index[sub_x][sub_y]);
        self.max_index_full = self.max_index_full.max(self.max_index[sub_x][sub_y]);
    }
}

/// Packed identity of a buffer set's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedBuffersKey(pub u32);

impl SharedBuffersKey {
    pub fn new(
        subsection_size_quads: u32,
        num_subsections: u32,
        feature_tier: FeatureTier,
        has_xy_offset: bool,
        num_occluder_vertices: u32,
    ) -> Self {
        let mut key = (ceil_log2(subsection_size_quads + 1) & 0xf)
            | ((num_subsections & 0xf) << 4)
            | ((num_occluder_vertices & 0x1_ffff) << 8);
        if feature_tier > FeatureTier::Mobile {
            key |= 1 << 30;
        }
        if has_xy_offset {
            key |= 1 << 31;
        }
        Self(key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFactoryKind {
    Standard,
    /// Reads an extra XY offset map to displace vertices horizontally.
    XyOffset,
}

/// Shape of a shared buffer set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedBuffersInfo {
    pub subsection_size_quads: u32,
    pub num_subsections: u32,
    pub feature_tier: FeatureTier,
    pub has_xy_offset: bool,
    /// Vertex count of the occluder grid. Zero skips the occluder indices.
    pub num_occluder_vertices: u32,
    pub optimize_indices: bool,
    pub vertex_cache_size: u32,
}

impl Default for SharedBuffersInfo {
    fn default() -> Self {
        Self {
            subsection_size_quads: 63,
            num_subsections: 1,
            feature_tier: FeatureTier::Sm5,
            has_xy_offset: false,
            num_occluder_vertices: 0,
            optimize_indices: true,
            vertex_cache_size: 32,
        }
    }
}

impl SharedBuffersInfo {
    pub fn key(&self) -> SharedBuffersKey {
        SharedBuffersKey::new(
            self.subsection_size_quads,
            self.num_subsections,
            self.feature_tier,
            self.has_xy_offset,
            self.num_occluder_vertices,
        )
    }

    pub fn validate(&self) -> Result<()> {
        let verts = self.subsection_size_quads + 1;
        if !is_power_of_two(verts) || !(2..=256).contains(&verts) {
            return Err(LandscapeError::InvalidSubsectionSize {
                quads: self.subsection_size_quads,
            });
        }
        if !(1..=2).contains(&self.num_subsections) {
            return Err(LandscapeError::InvalidSubsectionCount {
                count: self.num_subsections,
            });
        }
        Ok(())
    }
}

struct BuiltGeometry {
    vertices: Vec<LandscapeVertex>,
    lod_indices: Vec<IndexData>,
    index_ranges: Vec<IndexRange>,
}

fn build_grid_vertices(subsection_size_verts: u32, num_subsections: u32) -> Vec<LandscapeVertex> {
    let mut vertices =
        Vec::with_capacity((subsection_size_verts.pow(2) * num_subsections.pow(2)) as usize);
    for sub_y in 0..num_subsections {
        for sub_x in 0..num_subsections {
            for y in 0..subsection_size_verts {
                for x in 0..subsection_size_verts {
                    vertices.push(LandscapeVertex {
                        x: x as u8,
                        y: y as u8,
                        sub_x: sub_x as u8,
                        sub_y: sub_y as u8,
                    });
                }
            }
        }
    }
    vertices
}

fn build_grid_geometry(info: &SharedBuffersInfo, num_index_buffers: u32, use_32bit: bool) -> BuiltGeometry {
    let verts = info.subsection_size_quads + 1;
    let num_sub = info.num_subsections;
    let mut lod_indices = Vec::with_capacity(num_index_buffers as usize);
    let mut index_ranges = vec![IndexRange::default(); num_index_buffers as usize];

    for mip in 0..num_index_buffers {
        let lod_quads = (verts >> mip) - 1;
        let range = &mut index_ranges[mip as usize];
        range.begin_full();

        let mut indices = Vec::with_capacity((num_sub.pow(2) * lod_quads.pow(2) * 6) as usize);
        let mut sub_offset = 0;
        for sub_y in 0..num_sub as usize {
            for sub_x in 0..num_sub as usize {
                range.begin_subsection(sub_x, sub_y);
                for y in 0..lod_quads {
                    for x in 0..lod_quads {
                        let i00 = x + y * verts + sub_offset;
                        let i10 = (x + 1) + y * verts + sub_offset;
                        let i11 = (x + 1) + (y + 1) * verts + sub_offset;
                        let i01 = x + (y + 1) * verts + sub_offset;

                        indices.extend_from_slice(&[i00, i11, i10, i00, i01, i11]);
                        for index in [i00, i10, i11, i01] {
                            range.include(sub_x, sub_y, index);
                        }
                    }
                }
                range.end_subsection(sub_x, sub_y);
                sub_offset += verts * verts;
            }
        }

        debug_assert_eq!(indices.len(), (num_sub.pow(2) * lod_quads.pow(2) * 6) as usize);
        lod_indices.push(IndexData::from_u32(indices, use_32bit));
    }

    BuiltGeometry {
        vertices: build_grid_vertices(verts, num_sub),
        lod_indices,
        index_ranges,
    }
}

/// Mobile layout: every LOD reuses the vertices of LOD0, so coarse quads are
/// snapped onto the fine grid. Vertices are stored in first-use order,
/// starting from the coarsest LOD, which keeps low LODs in a compact prefix.
fn build_shared_vertex_geometry(
    info: &SharedBuffersInfo,
    num_index_buffers: u32,
    use_32bit: bool,
) -> BuiltGeometry {
    let verts = info.subsection_size_quads + 1;
    let num_sub = info.num_subsections;
    let quads = info.subsection_size_quads;
    let total = (verts.pow(2) * num_sub.pow(2)) as usize;

    let mut vertex_to_index = vec![u32::MAX; total];
    let mut vertices = Vec::with_capacity(total);
    let mut lod_indices = vec![IndexData::U16(Vec::new()); num_index_buffers as usize];
    let mut index_ranges = vec![IndexRange::default(); num_index_buffers as usize];

    for mip in (0..num_index_buffers).rev() {
        let lod_quads = (verts >> mip) - 1;
        let mip_ratio = quads as f32 / lod_quads as f32;
        let range = &mut index_ranges[mip as usize];
        range.begin_full();

        let mut indices = Vec::with_capacity((num_sub.pow(2) * lod_quads.pow(2) * 6) as usize);
        for sub_y in 0..num_sub {
            for sub_x in 0..num_sub {
                let (sx, sy) = (sub_x as usize, sub_y as usize);
                range.begin_subsection(sx, sy);

                let mut sub_indices = Vec::with_capacity((lod_quads.pow(2) * 6) as usize);
                for y in 0..lod_quads {
                    for x in 0..lod_quads {
                        let mut quad = [0u32; 4];
                        for (corner, slot) in quad.iter_mut().enumerate() {
                            let corner = corner as u32;
                            let corner_x = ((x + (corner & 1)) as f32 * mip_ratio).round() as u32;
                            let corner_y = ((y + (corner >> 1)) as f32 * mip_ratio).round() as u32;

                            let vertex =
                                ((sub_y * num_sub + sub_x) * verts * verts + corner_y * verts + corner_x)
                                    as usize;
                            if vertex_to_index[vertex] == u32::MAX {
                                vertex_to_index[vertex] = vertices.len() as u32;
                                vertices.push(LandscapeVertex {
                                    x: corner_x as u8,
                                    y: corner_y as u8,
                                    sub_x: sub_x as u8,
                                    sub_y: sub_y as u8,
                                });
                            }
                            *slot = vertex_to_index[vertex];
                            range.include(sx, sy, *slot);
                        }

                        sub_indices.extend_from_slice(&[
                            quad[0], quad[3], quad[1], quad[0], quad[2], quad[3],
                        ]);
                    }
                }
                range.end_subsection(sx, sy);

                if info.optimize_indices {
                    let optimized = forsyth::optimize_faces(&sub_indices, info.vertex_cache_size);
                    trace!(
                        "Mip {} subsection ({}, {}): cache misses {} -> {}",
                        mip,
                        sub_x,
                        sub_y,
                        forsyth::count_cache_misses(&sub_indices, info.vertex_cache_size as usize),
                        forsyth::count_cache_misses(&optimized, info.vertex_cache_size as usize)
                    );
                    indices.extend(optimized);
                } else {
                    indices.extend(sub_indices);
                }
            }
        }

        lod_indices[mip as usize] = IndexData::from_u32(indices, use_32bit);
    }

    BuiltGeometry {
        vertices,
        lod_indices,
        index_ranges,
    }
}

fn build_grass_indices(info: &SharedBuffersInfo, use_32bit: bool) -> (IndexData, Vec<u32>) {
    let verts = info.subsection_size_quads + 1;
    let num_sub = info.num_subsections;
    let num_mips = ceil_log2(verts);
    // Mips add a third, and the chain stops at 2x2.
    let expected = (num_sub.pow(2) * (verts.pow(2) * 4 / 3 - 1)) as usize;

    let mut indices = Vec::with_capacity(expected);
    let mut mip_offsets = Vec::with_capacity(num_mips as usize);
    for mip in 0..num_mips {
        mip_offsets.push(indices.len() as u32);
        let mip_verts = verts >> mip;
        let mut sub_offset = 0;
        for _sub_y in 0..num_sub {
            for _sub_x in 0..num_sub {
                for y in 0..mip_verts {
                    for x in 0..mip_verts {
                        // Addresses the full resolution vertex buffer.
                        indices.push(x + y * verts + sub_offset);
                    }
                }
                sub_offset += verts * verts;
            }
        }
    }

    debug_assert_eq!(indices.len(), expected);
    (IndexData::from_u32(indices, use_32bit), mip_offsets)
}

/// Two triangles per quad over a square grid of `num_vertices` vertices.
/// Returns `None` unless the count is a perfect square that fits 16 bits.
pub fn build_occluder_indices(num_vertices: u32) -> Option<Vec<u16>> {
    if num_vertices == 0 || num_vertices > u16::MAX as u32 {
        return None;
    }
    let line_vertices = (num_vertices as f32).sqrt() as u16;
    if (line_vertices as u32).pow(2) != num_vertices || line_vertices < 2 {
        return None;
    }

    let line_quads = line_vertices - 1;
    let quad_triangles = [[0, line_vertices, line_vertices + 1], [0, line_vertices + 1, 1]];
    let mut indices = Vec::with_capacity(line_quads as usize * line_quads as usize * 6);
    let mut quad_offset: u16 = 0;
    for _y in 0..line_quads {
        for _x in 0..line_quads {
            for triangle in &quad_triangles {
                indices.extend(triangle.iter().map(|corner| corner + quad_offset));
            }
            quad_offset += 1;
        }
        quad_offset += 1;
    }
    Some(indices)
}

fn create_index_buffer(backend: &mut impl GpuBackend, name: &str, data: &IndexData) -> BufferHandle {
    backend.create_buffer(&BufferInfo {
        debug_name: name,
        usage: BufferUsage::INDEX,
        stride: data.stride(),
        initial_data: data.as_bytes(),
    })
}

/// Geometry shared by every tile of one shape. Owned through an `Arc` by the
/// [`SharedBuffersCache`] and reference counted by the tiles using it.
#[derive(Debug)]
pub struct SharedBuffers {
    key: SharedBuffersKey,
    info: SharedBuffersInfo,
    num_vertices: u32,
    num_index_buffers: u32,
    use_32bit_indices: bool,
    vertices: Vec<LandscapeVertex>,
    lod_indices: Vec<IndexData>,
    index_ranges: Vec<IndexRange>,
    grass_indices: Option<IndexData>,
    grass_mip_offsets: Vec<u32>,
    occluder_indices: Option<Vec<u16>>,
    vertex_buffer: BufferHandle,
    index_buffers: Vec<BufferHandle>,
    grass_index_buffer: BufferHandle,
    adjacency: OnceLock<AdjacencyIndexBuffers>,
    ref_count: AtomicU32,
}

impl SharedBuffers {
    pub fn new(info: SharedBuffersInfo, backend: &mut impl GpuBackend) -> Result<Self> {
        info.validate()?;

        let verts = info.subsection_size_quads + 1;
        let num_index_buffers = ceil_log2(verts);
        let num_vertices = verts.pow(2) * info.num_subsections.pow(2);
        let use_32bit_indices = num_vertices > 65535;
        let mobile = info.feature_tier == FeatureTier::Mobile;

        let geometry = if mobile {
            build_shared_vertex_geometry(&info, num_index_buffers, use_32bit_indices)
        } else {
            build_grid_geometry(&info, num_index_buffers, use_32bit_indices)
        };

        let vertex_buffer = backend.create_buffer(&BufferInfo {
            debug_name: "LandscapeVertexBuffer",
            usage: BufferUsage::VERTEX,
            stride: std::mem::size_of::<LandscapeVertex>() as u32,
            initial_data: bytemuck::cast_slice(&geometry.vertices),
        });
        let index_buffers = geometry
            .lod_indices
            .iter()
            .map(|data| create_index_buffer(backend, "LandscapeIndexBuffer", data))
            .collect();

        let (grass_indices, grass_mip_offsets, grass_index_buffer) = if mobile {
            (None, Vec::new(), BufferHandle::NULL)
        } else {
            let (indices, offsets) = build_grass_indices(&info, use_32bit_indices);
            let handle = create_index_buffer(backend, "LandscapeGrassIndexBuffer", &indices);
            (Some(indices), offsets, handle)
        };

        let key = info.key();
        debug!(
            "Created landscape shared buffers {:#x}: {} vertices, {} LODs, {}-bit indices",
            key.0,
            num_vertices,
            num_index_buffers,
            if use_32bit_indices { 32 } else { 16 }
        );

        Ok(Self {
            key,
            info,
            num_vertices,
            num_index_buffers,
            use_32bit_indices,
            vertices: geometry.vertices,
            lod_indices: geometry.lod_indices,
            index_ranges: geometry.index_ranges,
            grass_indices,
            grass_mip_offsets,
            occluder_indices: build_occluder_indices(info.num_occluder_vertices),
            vertex_buffer,
            index_buffers,
            grass_index_buffer,
            adjacency: OnceLock::new(),
            ref_count: AtomicU32::new(0),
        })
    }

    pub fn key(&self) -> SharedBuffersKey {
        self.key
    }

    pub fn info(&self) -> &SharedBuffersInfo {
        &self.info
    }

    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    pub fn num_index_buffers(&self) -> u32 {
        self.num_index_buffers
    }

    pub fn subsection_size_verts(&self) -> u32 {
        self.info.subsection_size_quads + 1
    }

    pub fn num_subsections(&self) -> u32 {
        self.info.num_subsections
    }

    pub fn uses_32bit_indices(&self) -> bool {
        self.use_32bit_indices
    }

    pub fn vertex_factory(&self) -> VertexFactoryKind {
        if self.info.has_xy_offset {
            VertexFactoryKind::XyOffset
        } else {
            VertexFactoryKind::Standard
        }
    }

    pub fn vertices(&self) -> &[LandscapeVertex] {
        &self.vertices
    }

    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertex_buffer
    }

    pub fn lod_indices(&self, lod: usize) -> Option<&IndexData> {
        self.lod_indices.get(lod)
    }

    pub fn index_range(&self, lod: usize) -> Option<&IndexRange> {
        self.index_ranges.get(lod)
    }

    pub fn index_buffer(&self, lod: usize) -> Option<BufferHandle> {
        self.index_buffers.get(lod).copied()
    }

    pub fn grass_indices(&self) -> Option<&IndexData> {
        self.grass_indices.as_ref()
    }

    pub fn grass_mip_offsets(&self) -> &[u32] {
        &self.grass_mip_offsets
    }

    pub fn grass_index_buffer(&self) -> BufferHandle {
        self.grass_index_buffer
    }

    pub fn occluder_indices(&self) -> Option<&[u16]> {
        self.occluder_indices.as_deref()
    }

    pub fn adjacency(&self) -> Option<&AdjacencyIndexBuffers> {
        self.adjacency.get()
    }

    /// Builds the adjacency buffers the first time a tessellated tile needs them.
    pub fn ensure_adjacency(&self, backend: &mut impl GpuBackend) -> &AdjacencyIndexBuffers {
        self.adjacency
            .get_or_init(|| AdjacencyIndexBuffers::new(&self.lod_indices, backend))
    }

    pub fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference and returns how many remain.
    pub fn release(&self) -> u32 {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Frees every GPU buffer of the set.
    pub fn release_resources(&self, backend: &mut impl GpuBackend) {
        backend.release_buffer(self.vertex_buffer);
        for handle in &self.index_buffers {
            backend.release_buffer(*handle);
        }
        if self.grass_index_buffer.valid() {
            backend.release_buffer(self.grass_index_buffer);
        }
        if let Some(adjacency) = self.adjacency.get() {
            adjacency.release(backend);
        }
        debug!("Released landscape shared buffers {:#x}", self.key.0);
    }
}
