//! Octree buffer layout.
//!
//! The renderer never interprets octree contents. It only needs the number of
//! 32-bit words to size the staging, octree and lighting buffers.

/// Size of one octree word in bytes.
pub const WORD_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Shape of the flat octree buffer shared with the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OctreeLayout {
    /// Fixed octree depth, baked into the raycast pipeline.
    pub depth: u32,
    /// Number of 32-bit words in the buffer.
    pub capacity: usize,
}

impl OctreeLayout {
    /// Layout with one word per node below the root of a full octree.
    ///
    /// That is `8 + 8^2 + ... + 8^depth` words.
    pub fn for_depth(depth: u32) -> Self {
        let capacity = (1..=depth).map(|level| 8usize.pow(level)).sum();
        Self { depth, capacity }
    }

    /// Layout with an explicit capacity.
    pub fn with_capacity(depth: u32, capacity: usize) -> Self {
        Self { depth, capacity }
    }

    /// Buffer size in bytes.
    pub fn byte_size(&self) -> u64 {
        self.capacity as u64 * WORD_SIZE
    }
}
