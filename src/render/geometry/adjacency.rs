use super::IndexData;
use crate::render::backend::{BufferHandle, BufferInfo, BufferUsage, GpuBackend};

/// Expands a triangle list into the 12-index PN-AEN layout per triangle:
/// the 3 corners, 6 edge-adjacent vertices as one pair per edge, then 3
/// dominant corners.
///
/// A regular grid shares every edge with a matching winding, so each edge
/// pair is the edge's own endpoints and each dominant corner is the corner
/// itself.
pub fn expand_pn_aen(indices: &IndexData) -> IndexData {
    let triangles = indices.len() / 3;
    let mut expanded = Vec::with_capacity(triangles * 12);
    for triangle in 0..triangles {
        let a = indices.get(triangle * 3);
        let b = indices.get(triangle * 3 + 1);
        let c = indices.get(triangle * 3 + 2);
        expanded.extend_from_slice(&[a, b, c, a, b, b, c, c, a, a, b, c]);
    }
    IndexData::from_u32(expanded, indices.is_32bit())
}

/// Per-LOD adjacency index buffers used by tessellated materials.
#[derive(Debug)]
pub struct AdjacencyIndexBuffers {
    pub indices: Vec<IndexData>,
    pub buffers: Vec<BufferHandle>,
}

impl AdjacencyIndexBuffers {
    pub fn new(lod_indices: &[IndexData], backend: &mut impl GpuBackend) -> Self {
        let indices: Vec<IndexData> = lod_indices.iter().map(expand_pn_aen).collect();
        let buffers = indices
            .iter()
            .map(|data| {
                backend.create_buffer(&BufferInfo {
                    debug_name: "LandscapeAdjacencyIndexBuffer",
                    usage: BufferUsage::INDEX,
                    stride: data.stride(),
                    initial_data: data.as_bytes(),
                })
            })
            .collect();
        Self { indices, buffers }
    }

    pub fn release(&self, backend: &mut impl GpuBackend) {
        for handle in &self.buffers {
            backend.release_buffer(*handle);
        }
    }
}
