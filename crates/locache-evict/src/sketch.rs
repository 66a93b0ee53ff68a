//! Count-min sketch for compact frequency estimation

use locache_core::{fnv1a_32, mix32};

/// Probabilistic frequency counter: `depth` hash rows of `width` u32
/// counters. Increments saturate; estimates take the per-row minimum.
///
/// Each row hashes with seeded FNV-1a finished by an avalanche mix, and
/// indexes by bitmask when `width` is a power of two. All hash arithmetic
/// stays in unsigned 32-bit space.
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    mask: Option<u32>,
    seeds: Vec<u32>,
    counters: Vec<u32>,
}

impl CountMinSketch {
    pub fn new(width: usize, depth: usize) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);
        let mask = width.is_power_of_two().then(|| width as u32 - 1);
        let seeds = (0..depth)
            .map(|row| 0x9e37_79b9u32.wrapping_mul(row as u32 + 1))
            .collect();
        Self {
            width,
            depth,
            mask,
            seeds,
            counters: vec![0; width * depth],
        }
    }

    fn index(&self, row: usize, key: &str) -> usize {
        let hash = mix32(fnv1a_32(key.as_bytes(), self.seeds[row]));
        let slot = match self.mask {
            Some(mask) => hash & mask,
            None => hash % self.width as u32,
        };
        row * self.width + slot as usize
    }

    /// Count one occurrence of `key`
    pub fn increment(&mut self, key: &str) {
        for row in 0..self.depth {
            let idx = self.index(row, key);
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
    }

    /// Estimated occurrence count of `key` (never an undercount)
    pub fn estimate(&self, key: &str) -> u32 {
        (0..self.depth)
            .map(|row| self.counters[self.index(row, key)])
            .min()
            .unwrap_or(0)
    }

    /// Scale every counter by `factor` in [0, 1]
    pub fn decay(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        for counter in &mut self.counters {
            *counter = (*counter as f64 * factor) as u32;
        }
    }

    pub fn clear(&mut self) {
        self.counters.fill(0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}
