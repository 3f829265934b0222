use crate::word::{NativeWord, Word, assert_word_multiple};
use once_cell::sync::Lazy;

/// Lowest raw count of each non-zero bucket, paired with the bucket value.
const BUCKET_FLOORS: [(u8, u8); 8] = [
    (1, 1),
    (2, 2),
    (3, 4),
    (4, 8),
    (8, 16),
    (16, 32),
    (32, 64),
    (128, 128),
];

/// Per-byte and per-byte-pair bucket lookup tables.
pub struct ClassBucketTable {
    lookup8: [u8; 256],
    lookup16: Box<[u16]>,
}

static TABLE: Lazy<ClassBucketTable> = Lazy::new(ClassBucketTable::build);

impl ClassBucketTable {
    /// The process-wide table, built on first use.
    pub fn global() -> &'static ClassBucketTable {
        &TABLE
    }

    fn build() -> Self {
        let mut lookup8 = [0u8; 256];
        for (count, slot) in lookup8.iter_mut().enumerate() {
            *slot = BUCKET_FLOORS
                .iter()
                .rev()
                .find(|(floor, _)| count >= usize::from(*floor))
                .map_or(0, |&(_, bucket)| bucket);
        }

        // Index is the native-endian u16 of two adjacent bytes; classifying
        // each half independently keeps the result byte-order agnostic.
        let lookup16 = (0..=u16::MAX)
            .map(|pair| {
                let [a, b] = pair.to_ne_bytes();
                u16::from_ne_bytes([lookup8[usize::from(a)], lookup8[usize::from(b)]])
            })
            .collect::<Vec<u16>>()
            .into_boxed_slice();

        Self { lookup8, lookup16 }
    }

    #[inline]
    pub fn bucket(&self, count: u8) -> u8 {
        self.lookup8[usize::from(count)]
    }

    #[inline]
    pub fn bucket_pair(&self, pair: u16) -> u16 {
        self.lookup16[usize::from(pair)]
    }
}

/// Replaces every counter in `map` with its bucket, in place, using the native
/// word width.
pub fn classify(map: &mut [u8]) {
    classify_with::<NativeWord>(map);
}

/// Replaces every counter in `map` with its bucket, in place.
///
/// All-zero words are skipped without being written. Panics if the map length
/// is not a multiple of `W::BYTES`.
pub fn classify_with<W: Word>(map: &mut [u8]) {
    assert_word_multiple::<W>(map.len());
    let table = ClassBucketTable::global();

    for chunk in map.chunks_exact_mut(W::BYTES) {
        if W::load(chunk) == W::ZERO {
            continue;
        }
        for pair in chunk.chunks_exact_mut(2) {
            let raw = u16::from_ne_bytes([pair[0], pair[1]]);
            pair.copy_from_slice(&table.bucket_pair(raw).to_ne_bytes());
        }
    }
}
