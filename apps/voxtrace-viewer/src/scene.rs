//! Procedural octree contents.
//!
//! The viewer stores one word per node, level by level from the first level
//! below the root, with nodes of a level in Morton order. A zero word is
//! empty space, anything else is a packed RGBA8 color.

use glam::Vec3;
use std::time::Duration;
use voxtrace_app::{OctreeLayout, OctreeMutator};

/// Spread the bits of every third position into a coordinate.
fn compact_bits(mut value: u64) -> u32 {
    let mut out = 0u32;
    let mut bit = 0;
    while value != 0 {
        out |= ((value & 1) as u32) << bit;
        value >>= 3;
        bit += 1;
    }
    out
}

/// Cell coordinates of a Morton index.
pub fn morton_decode(index: u64) -> [u32; 3] {
    [
        compact_bits(index),
        compact_bits(index >> 1),
        compact_bits(index >> 2),
    ]
}

/// Color word for a cell, shaded by its position.
fn cell_color(cell: [u32; 3], side: u32) -> u32 {
    let scale = |c: u32| ((c * 255) / side.max(1)) as u8;
    u32::from_le_bytes([scale(cell[0]), scale(cell[1]), scale(cell[2]), 255])
}

/// Whether a sphere overlaps an axis-aligned box.
fn sphere_overlaps_box(center: Vec3, radius: f32, min: Vec3, max: Vec3) -> bool {
    center.clamp(min, max).distance(center) <= radius
}

/// A sphere in the unit cube whose radius oscillates over time.
pub struct PulsingSphere {
    layout: OctreeLayout,
    phase: f32,
    step: f32,
    interval: Duration,
}

impl PulsingSphere {
    pub const CENTER: Vec3 = Vec3::splat(0.5);

    pub fn new(layout: OctreeLayout) -> Self {
        Self {
            layout,
            phase: 0.0,
            step: 0.1,
            interval: Duration::from_millis(33),
        }
    }

    /// Radius at the current phase.
    pub fn radius(&self) -> f32 {
        0.3 + 0.1 * self.phase.sin()
    }

    /// Write every level of the octree for the current radius.
    pub fn fill(&self, words: &mut [u32]) {
        let radius = self.radius();
        let mut offset = 0usize;

        for level in 1..=self.layout.depth {
            let side = 1u32 << level;
            let cell_size = 1.0 / side as f32;
            let count = 8usize.pow(level);
            let Some(level_words) = words.get_mut(offset..offset + count) else {
                break;
            };

            for (index, word) in level_words.iter_mut().enumerate() {
                let cell = morton_decode(index as u64);
                let min = Vec3::new(cell[0] as f32, cell[1] as f32, cell[2] as f32) * cell_size;
                let max = min + Vec3::splat(cell_size);
                *word = if sphere_overlaps_box(Self::CENTER, radius, min, max) {
                    cell_color(cell, side)
                } else {
                    0
                };
            }

            offset += count;
        }
    }
}

impl OctreeMutator for PulsingSphere {
    fn mutate(&mut self, words: &mut [u32]) -> bool {
        self.fill(words);
        self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        true
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
