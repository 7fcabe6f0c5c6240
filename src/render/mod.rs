//! Continuous LOD rendering for tiled terrain.
//!
//! Tiles are created through a [`RenderSystemRegistry`]. Each landscape gets
//! a [`RenderSystem`] holding a grid of per-tile LOD values that is refreshed
//! once per view and uploaded for the vertex shader. Tiles of the same shape
//! share their vertex and index buffers.

pub mod arena;
pub mod backend;
pub mod config;
pub mod debug;
pub mod error;
pub mod geometry;
pub mod lod;
pub mod neighbors;
pub mod proxy;
pub mod registry;
pub mod streaming;
pub mod system;
pub mod task;

pub use arena::{TileId, TilePool};
pub use backend::{BufferHandle, BufferInfo, BufferUsage, GpuBackend, HeadlessBackend};
pub use config::{FeatureTier, LandscapeConfig};
pub use debug::{DebugBatch, DebugMaterial, ViewMode};
pub use error::{LandscapeError, Result};
pub use geometry::cache::SharedBuffersCache;
pub use geometry::{SharedBuffers, SharedBuffersInfo, SharedBuffersKey};
pub use neighbors::{LandscapeKey, NeighborDirection};
pub use proxy::{MeshBatch, PrimitiveType, TileBounds, TileDesc, TileMaterial, TileProxy};
pub use registry::RenderSystemRegistry;
pub use system::view::{SectionLodUniforms, ShowFlags, ViewId, ViewInfo};
pub use system::{RenderSystem, SectionEntity};
