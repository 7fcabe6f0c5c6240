use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Mat4, Vec3};

use crate::render::backend::BufferHandle;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShowFlags: u32 {
        /// LOD selection is enabled. Without it every tile draws LOD 0.
        const LOD = 0x1;
        const COLLISION_PAWN = 0x2;
        const COLLISION_VISIBILITY = 0x4;
        const WIREFRAME = 0x8;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// Everything LOD selection needs to know about a camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewInfo {
    pub id: ViewId,
    pub origin: Vec3,
    pub projection: Mat4,
    pub lod_distance_factor: f32,
    pub show_flags: ShowFlags,
    /// Editor LOD override. Negative disables it.
    pub editor_forced_lod: i32,
}

impl Default for ViewInfo {
    fn default() -> Self {
        Self {
            id: ViewId(0),
            origin: Vec3::ZERO,
            projection: Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 100_000.0),
            lod_distance_factor: 1.0,
            show_flags: ShowFlags::LOD,
            editor_forced_lod: -1,
        }
    }
}

/// Per-view parameters bound by every tile of one render system.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SectionLodUniforms {
    pub min: IVec2,
    pub size: IVec2,
    pub section_lod: u32,
    pub section_lod_bias: u32,
    pub section_tessellation_falloff_c: u32,
    pub section_tessellation_falloff_k: u32,
}

impl SectionLodUniforms {
    pub fn section_lod(&self) -> BufferHandle {
        BufferHandle(self.section_lod)
    }

    pub fn section_lod_bias(&self) -> BufferHandle {
        BufferHandle(self.section_lod_bias)
    }

    pub fn section_tessellation_falloff_c(&self) -> BufferHandle {
        BufferHandle(self.section_tessellation_falloff_c)
    }

    pub fn section_tessellation_falloff_k(&self) -> BufferHandle {
        BufferHandle(self.section_tessellation_falloff_k)
    }
}

/// Output of one view's LOD pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerViewResults {
    pub lod_values: Vec<f32>,
    pub tessellation_falloff_c: Vec<f32>,
    pub tessellation_falloff_k: Vec<f32>,
}
