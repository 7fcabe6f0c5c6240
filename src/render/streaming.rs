use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

/// Heightmap texture as seen by the renderer: its mip chain and how much of it
/// the streamer currently has resident. The streamer updates residency from
/// its own thread.
#[derive(Debug)]
pub struct HeightmapTexture {
    pub size_x: u32,
    pub size_y: u32,
    pub num_mips: u32,
    resident_mips: AtomicU32,
}

impl HeightmapTexture {
    pub fn new(size_x: u32, size_y: u32, num_mips: u32) -> Self {
        Self {
            size_x,
            size_y,
            num_mips,
            resident_mips: AtomicU32::new(num_mips),
        }
    }

    pub fn with_resident_mips(self, resident: u32) -> Self {
        self.set_resident_mips(resident);
        self
    }

    #[inline]
    pub fn resident_mips(&self) -> u32 {
        self.resident_mips.load(Ordering::Acquire)
    }

    pub fn set_resident_mips(&self, resident: u32) {
        self.resident_mips
            .store(resident.min(self.num_mips), Ordering::Release);
    }

    /// Mips the GPU cannot sample yet. Zero when fully resident.
    #[inline]
    pub fn missing_mips(&self) -> u32 {
        self.num_mips.saturating_sub(self.resident_mips())
    }
}

/// Streaming state shared between a tile proxy and its render system cell.
#[derive(Debug, Default)]
pub struct TileStreamingState {
    pub heightmap: Option<Arc<HeightmapTexture>>,
    current_first_lod: AtomicI32,
}

impl TileStreamingState {
    pub fn new(heightmap: Option<Arc<HeightmapTexture>>) -> Self {
        Self {
            heightmap,
            current_first_lod: AtomicI32::new(0),
        }
    }

    /// Finest LOD whose geometry data is currently streamed in.
    #[inline]
    pub fn current_first_lod(&self) -> i32 {
        self.current_first_lod.load(Ordering::Acquire)
    }

    pub fn set_current_first_lod(&self, lod: i32) {
        self.current_first_lod.store(lod, Ordering::Release);
    }
}
