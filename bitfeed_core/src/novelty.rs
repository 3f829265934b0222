use crate::map::assert_same_len;
use crate::word::{NativeWord, Word, assert_word_multiple};

/// How new an execution's coverage is relative to a virgin map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum NoveltyLevel {
    /// Every (edge, bucket) pair was already known.
    #[default]
    None = 0,
    /// Only known edges were hit, but at least one at a new bucket.
    NewCount = 1,
    /// At least one edge was hit for the first time.
    NewEdge = 2,
}

impl NoveltyLevel {
    pub fn is_novel(self) -> bool {
        self != NoveltyLevel::None
    }
}

impl From<NoveltyLevel> for u8 {
    fn from(level: NoveltyLevel) -> u8 {
        level as u8
    }
}

impl std::fmt::Display for NoveltyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NoveltyLevel::None => "none",
            NoveltyLevel::NewCount => "new-count",
            NoveltyLevel::NewEdge => "new-edge",
        };
        f.write_str(s)
    }
}

/// Compares a classified `trace` against `virgin` using the native word width
/// and clears every touched bit from `virgin`.
pub fn detect_novelty(virgin: &mut [u8], trace: &[u8]) -> NoveltyLevel {
    detect_novelty_with::<NativeWord>(virgin, trace)
}

/// Compares a classified `trace` against `virgin` and clears every touched bit
/// from `virgin`.
///
/// Returns the highest novelty seen across the map. Byte-level inspection
/// stops once `NewEdge` is reached, but bit clearing always covers the whole
/// map, so `virgin & trace == 0` holds on return. `virgin` never gains bits.
///
/// Panics if the maps differ in length or are not a multiple of `W::BYTES`.
pub fn detect_novelty_with<W: Word>(virgin: &mut [u8], trace: &[u8]) -> NoveltyLevel {
    assert_same_len(virgin, trace);
    assert_word_multiple::<W>(trace.len());

    let mut ret = NoveltyLevel::None;

    for (vir, cur) in virgin
        .chunks_exact_mut(W::BYTES)
        .zip(trace.chunks_exact(W::BYTES))
    {
        let cur_word = W::load(cur);
        if cur_word == W::ZERO {
            continue;
        }
        let vir_word = W::load(vir);
        if cur_word & vir_word == W::ZERO {
            continue;
        }

        if ret < NoveltyLevel::NewEdge {
            let new_edge = cur
                .iter()
                .zip(vir.iter())
                .any(|(&c, &v)| c != 0 && v == 0xFF);
            ret = if new_edge {
                NoveltyLevel::NewEdge
            } else {
                NoveltyLevel::NewCount
            };
        }

        (vir_word & !cur_word).store(vir);
    }

    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_with;
    use proptest::prelude::*;
    use rand::Rng;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn popcount(bytes: &[u8]) -> u32 {
        bytes.iter().map(|b| b.count_ones()).sum()
    }

    /// Sparse raw map: roughly one edge in `density` is hit.
    fn sparse_map(rng: &mut ChaCha8Rng, len: usize, density: u32) -> Vec<u8> {
        (0..len)
            .map(|_| {
                if rng.random_ratio(1, density) {
                    rng.random_range(1..=255)
                } else {
                    0
                }
            })
            .collect()
    }

    #[test]
    fn first_hit_is_a_new_edge() {
        let mut virgin = vec![0xFFu8; 8];
        let trace = [0u8, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(detect_novelty(&mut virgin, &trace), NoveltyLevel::NewEdge);
        assert_eq!(virgin, vec![0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn repeated_trace_is_not_novel() {
        let mut virgin = vec![0xFFu8; 8];
        let trace = [0u8, 0, 0, 1, 0, 0, 0, 0];
        detect_novelty(&mut virgin, &trace);
        let after_first = virgin.clone();
        assert_eq!(detect_novelty(&mut virgin, &trace), NoveltyLevel::None);
        assert_eq!(virgin, after_first);
    }

    #[test]
    fn new_bucket_on_known_edge_is_a_new_count() {
        let mut virgin = vec![0xFFu8; 8];
        virgin[3] = 0xFE;
        let trace = [0u8, 0, 0, 2, 0, 0, 0, 0];
        assert_eq!(detect_novelty(&mut virgin, &trace), NoveltyLevel::NewCount);
        assert_eq!(virgin[3], 0xFC);
    }

    #[test]
    fn empty_trace_changes_nothing() {
        let mut virgin = vec![0xA5u8; 16];
        let before = virgin.clone();
        assert_eq!(detect_novelty(&mut virgin, &[0u8; 16]), NoveltyLevel::None);
        assert_eq!(virgin, before);
    }

    #[test]
    fn new_edge_after_new_count_still_wins() {
        let mut virgin = vec![0xFFu8; 32];
        virgin[0] = 0xFE;
        let mut trace = vec![0u8; 32];
        trace[0] = 2;
        trace[24] = 1;
        assert_eq!(
            detect_novelty_with::<u64>(&mut virgin, &trace),
            NoveltyLevel::NewEdge
        );
        assert_eq!(virgin[0], 0xFC);
        assert_eq!(virgin[24], 0xFE);
    }

    #[test]
    fn clearing_continues_after_new_edge() {
        let mut virgin = vec![0xFFu8; 64];
        let mut trace = vec![0u8; 64];
        for i in (0..64).step_by(8) {
            trace[i] = 4;
        }
        assert_eq!(detect_novelty(&mut virgin, &trace), NoveltyLevel::NewEdge);
        for i in (0..64).step_by(8) {
            assert_eq!(virgin[i], 0xFB, "byte {i} was not cleared");
        }
    }

    #[test]
    #[should_panic(expected = "virgin map is 16 bytes but trace map is 8 bytes")]
    fn mismatched_lengths_panic() {
        let mut virgin = vec![0xFFu8; 16];
        detect_novelty(&mut virgin, &[0u8; 8]);
    }

    #[test]
    fn word_widths_agree_on_sparse_campaigns() {
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        let mut narrow = vec![0xFFu8; 4096];
        let mut wide = narrow.clone();

        for _ in 0..200 {
            let mut trace = sparse_map(&mut rng, 4096, 64);
            classify_with::<u64>(&mut trace);
            let a = detect_novelty_with::<u32>(&mut narrow, &trace);
            let b = detect_novelty_with::<u64>(&mut wide, &trace);
            assert_eq!(a, b);
            assert_eq!(narrow, wide);
        }
    }

    proptest! {
        #[test]
        fn prop_touched_bits_are_cleared_and_map_shrinks(
            virgin in proptest::collection::vec(any::<u8>(), 64),
            raw in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let mut trace = raw;
            classify_with::<u64>(&mut trace);
            let mut updated = virgin.clone();
            detect_novelty(&mut updated, &trace);

            for (v, t) in updated.iter().zip(trace.iter()) {
                prop_assert_eq!(v & t, 0);
            }
            for (new, old) in updated.iter().zip(virgin.iter()) {
                prop_assert_eq!(new & !old, 0, "a bit was set");
            }
            prop_assert!(popcount(&updated) <= popcount(&virgin));
        }

        #[test]
        fn prop_second_pass_is_never_novel(
            virgin in proptest::collection::vec(any::<u8>(), 64),
            raw in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let mut trace = raw;
            classify_with::<u64>(&mut trace);
            let mut updated = virgin;
            detect_novelty(&mut updated, &trace);
            let settled = updated.clone();
            prop_assert_eq!(detect_novelty(&mut updated, &trace), NoveltyLevel::None);
            prop_assert_eq!(updated, settled);
        }

        #[test]
        fn prop_word_widths_agree(
            virgin in proptest::collection::vec(any::<u8>(), 64),
            raw in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let mut trace = raw;
            classify_with::<u32>(&mut trace);
            let mut narrow = virgin.clone();
            let mut wide = virgin;
            prop_assert_eq!(
                detect_novelty_with::<u32>(&mut narrow, &trace),
                detect_novelty_with::<u64>(&mut wide, &trace)
            );
            prop_assert_eq!(narrow, wide);
        }
    }
}
