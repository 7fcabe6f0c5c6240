use std::collections::HashMap;

use bitflags::bitflags;
use bytemuck::Pod;
use tracing::warn;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STRUCTURED = 0x1;
        const UNIFORM = 0x2;
        const VERTEX = 0x4;
        const INDEX = 0x8;
        /// Contents are rewritten every frame.
        const DYNAMIC = 0x10;
    }
}

/// Opaque GPU buffer handle. Zero is never handed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    pub const NULL: BufferHandle = BufferHandle(0);

    #[inline]
    pub fn valid(&self) -> bool {
        self.0 != 0
    }
}

pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub usage: BufferUsage,
    /// Size of one element in bytes.
    pub stride: u32,
    pub initial_data: &'a [u8],
}

impl Default for BufferInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            usage: BufferUsage::STRUCTURED,
            stride: 4,
            initial_data: &[],
        }
    }
}

/// The slice of a GPU device the landscape renderer needs.
pub trait GpuBackend {
    fn create_buffer(&mut self, info: &BufferInfo) -> BufferHandle;
    fn update_buffer(&mut self, handle: BufferHandle, data: &[u8]);
    fn release_buffer(&mut self, handle: BufferHandle);
}

struct HeadlessBuffer {
    name: String,
    usage: BufferUsage,
    stride: u32,
    bytes: Vec<u8>,
}

/// In-memory backend. Buffers are plain byte vectors that can be read back.
#[derive(Default)]
pub struct HeadlessBackend {
    next_handle: u32,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    created: usize,
    updated: usize,
    released: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T: Pod>(&self, handle: BufferHandle) -> Option<Vec<T>> {
        self.buffers
            .get(&handle)
            .map(|buffer| bytemuck::pod_collect_to_vec(&buffer.bytes))
    }

    pub fn bytes(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&handle).map(|buffer| buffer.bytes.as_slice())
    }

    pub fn name(&self, handle: BufferHandle) -> Option<&str> {
        self.buffers.get(&handle).map(|buffer| buffer.name.as_str())
    }

    pub fn usage(&self, handle: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&handle).map(|buffer| buffer.usage)
    }

    pub fn stride(&self, handle: BufferHandle) -> Option<u32> {
        self.buffers.get(&handle).map(|buffer| buffer.stride)
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    pub fn released(&self) -> usize {
        self.released
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&mut self, info: &BufferInfo) -> BufferHandle {
        self.next_handle += 1;
        let handle = BufferHandle(self.next_handle);
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                name: info.debug_name.to_string(),
                usage: info.usage,
                stride: info.stride,
                bytes: info.initial_data.to_vec(),
            },
        );
        self.created += 1;
        handle
    }

    fn update_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        match self.buffers.get_mut(&handle) {
            Some(buffer) => {
                buffer.bytes.clear();
                buffer.bytes.extend_from_slice(data);
                self.updated += 1;
            }
            None => warn!("Update of unknown buffer {:?}", handle),
        }
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if self.buffers.remove(&handle).is_some() {
            self.released += 1;
        } else {
            warn!("Release of unknown buffer {:?}", handle);
        }
    }
}
