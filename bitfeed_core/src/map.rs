use crate::word::{NativeWord, Word};
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Map size used by the instrumentation layer: 2 MiB of edge counters.
pub const DEFAULT_MAP_SIZE: usize = 1 << 21;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The size is zero, not a power of two, or not a multiple of 8 bytes.
    #[error("Invalid map size {0}: must be a power of two and a multiple of 8 bytes")]
    InvalidSize(usize),
    /// A byte buffer supplied for a map does not have the map's size.
    #[error("Map length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A validated map length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapSize(usize);

impl MapSize {
    pub const DEFAULT: MapSize = MapSize(DEFAULT_MAP_SIZE);

    pub fn new(bytes: usize) -> Result<Self, MapError> {
        if bytes < 8 || !bytes.is_power_of_two() {
            return Err(MapError::InvalidSize(bytes));
        }
        Ok(Self(bytes))
    }

    pub fn bytes(self) -> usize {
        self.0
    }

    /// Number of (edge, bucket) bits tracked by a virgin map of this size.
    pub fn bits(self) -> u64 {
        (self.0 as u64) << 3
    }
}

impl Default for MapSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Hit counts for one execution.
#[derive(Clone, PartialEq, Eq)]
pub struct CoverageMap {
    bytes: Box<[u8]>,
}

impl CoverageMap {
    /// Allocates a zeroed map.
    pub fn new(size: MapSize) -> Self {
        Self {
            bytes: vec![0u8; size.bytes()].into_boxed_slice(),
        }
    }

    /// Wraps an existing buffer, e.g. a raw map dump read from disk.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self, MapError> {
        MapSize::new(bytes.len())?;
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub fn size(&self) -> MapSize {
        MapSize(self.bytes.len())
    }

    /// Zeroes every counter. Called before each execution.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Number of edges with a non-zero counter.
    pub fn count_hit_edges(&self) -> usize {
        self.bytes.iter().filter(|&&b| b != 0).count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for CoverageMap {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for CoverageMap {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl std::fmt::Debug for CoverageMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageMap")
            .field("size", &self.bytes.len())
            .field("hit_edges", &self.count_hit_edges())
            .finish()
    }
}

/// Not-yet-observed (edge, bucket) pairs.
#[derive(Clone, PartialEq, Eq)]
pub struct VirginMap {
    bytes: Box<[u8]>,
}

impl VirginMap {
    /// Allocates a map with every bit set: nothing has been seen.
    pub fn new(size: MapSize) -> Self {
        Self {
            bytes: vec![0xFFu8; size.bytes()].into_boxed_slice(),
        }
    }

    pub fn size(&self) -> MapSize {
        MapSize(self.bytes.len())
    }

    /// Marks every (edge, bucket) pair as unseen again.
    pub fn reset(&mut self) {
        self.bytes.fill(0xFF);
    }

    /// Overwrites the whole map from a byte buffer of the same size.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<(), MapError> {
        if src.len() != self.bytes.len() {
            return Err(MapError::LengthMismatch {
                expected: self.bytes.len(),
                actual: src.len(),
            });
        }
        self.bytes.copy_from_slice(src);
        Ok(())
    }

    /// Number of bits still set.
    pub fn popcount(&self) -> u64 {
        self.bytes
            .chunks_exact(NativeWord::BYTES)
            .map(|chunk| u64::from(NativeWord::load(chunk).count_ones()))
            .sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for VirginMap {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for VirginMap {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl std::fmt::Debug for VirginMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirginMap")
            .field("size", &self.bytes.len())
            .field("popcount", &self.popcount())
            .finish()
    }
}

/// Panics when a trace and a virgin map disagree on length.
///
/// Different lengths mean the instrumentation layer and the feedback engine
/// were configured with different map sizes, which no caller can recover from.
#[inline]
pub(crate) fn assert_same_len(virgin: &[u8], trace: &[u8]) {
    assert_eq!(
        virgin.len(),
        trace.len(),
        "virgin map is {} bytes but trace map is {} bytes",
        virgin.len(),
        trace.len()
    );
}
