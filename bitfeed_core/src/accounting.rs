use crate::word::{NativeWord, Word, assert_word_multiple};

/// Number of (edge, bucket) pairs discovered so far, using the native word
/// width.
pub fn covered_edge_count(virgin: &[u8]) -> u64 {
    covered_edge_count_with::<NativeWord>(virgin)
}

/// Number of bits cleared from `virgin` since it was all `0xFF`.
///
/// Early in a campaign almost every word is still all-ones, so those words
/// are counted without a popcount.
pub fn covered_edge_count_with<W: Word>(virgin: &[u8]) -> u64 {
    assert_word_multiple::<W>(virgin.len());

    let total_bits = (virgin.len() as u64) << 3;
    let mut still_virgin = 0u64;

    for chunk in virgin.chunks_exact(W::BYTES) {
        let word = W::load(chunk);
        if word == W::ONES {
            still_virgin += u64::from(W::BITS);
            continue;
        }
        still_virgin += u64::from(word.count_ones());
    }

    total_bits - still_virgin
}
