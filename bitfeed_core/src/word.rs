use std::fmt::Debug;
use std::ops::{BitAnd, BitAndAssign, Not};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// An unsigned integer used as the processing unit for map scans.
pub trait Word:
    sealed::Sealed
    + Copy
    + Eq
    + Debug
    + BitAnd<Output = Self>
    + BitAndAssign
    + Not<Output = Self>
    + 'static
{
    /// Width of the word in bytes. Map sizes must be a multiple of this.
    const BYTES: usize;
    /// Width of the word in bits.
    const BITS: u32;
    const ZERO: Self;
    const ONES: Self;

    /// Reads a word from exactly `Self::BYTES` bytes.
    fn load(chunk: &[u8]) -> Self;

    /// Writes the word back into exactly `Self::BYTES` bytes.
    fn store(self, chunk: &mut [u8]);

    fn count_ones(self) -> u32;
}

impl Word for u32 {
    const BYTES: usize = 4;
    const BITS: u32 = u32::BITS;
    const ZERO: Self = 0;
    const ONES: Self = u32::MAX;

    #[inline]
    fn load(chunk: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(chunk);
        u32::from_le_bytes(buf)
    }

    #[inline]
    fn store(self, chunk: &mut [u8]) {
        chunk.copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn count_ones(self) -> u32 {
        u32::count_ones(self)
    }
}

impl Word for u64 {
    const BYTES: usize = 8;
    const BITS: u32 = u64::BITS;
    const ZERO: Self = 0;
    const ONES: Self = u64::MAX;

    #[inline]
    fn load(chunk: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        u64::from_le_bytes(buf)
    }

    #[inline]
    fn store(self, chunk: &mut [u8]) {
        chunk.copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn count_ones(self) -> u32 {
        u64::count_ones(self)
    }
}

/// The word width used by the convenience entry points on this target.
#[cfg(target_pointer_width = "64")]
pub type NativeWord = u64;

/// The word width used by the convenience entry points on this target.
#[cfg(not(target_pointer_width = "64"))]
pub type NativeWord = u32;

/// Word width selectable at runtime, e.g. from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordWidth {
    #[default]
    Native,
    W32,
    W64,
}

impl WordWidth {
    pub fn bytes(self) -> usize {
        match self {
            WordWidth::Native => NativeWord::BYTES,
            WordWidth::W32 => u32::BYTES,
            WordWidth::W64 => u64::BYTES,
        }
    }
}

/// Panics unless `len` can be walked in whole words of `W`.
#[inline]
pub(crate) fn assert_word_multiple<W: Word>(len: usize) {
    assert!(
        len % W::BYTES == 0,
        "map length {len} is not a multiple of the {}-byte word size",
        W::BYTES
    );
}
