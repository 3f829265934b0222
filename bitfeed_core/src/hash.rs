use crate::classify::classify;

/// Seed mixed into every fingerprint.
pub const FINGERPRINT_SEED: u32 = 0xa5b3_5705;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;
const F1: u64 = 0xff51_afd7_ed55_8ccd;
const F2: u64 = 0xc4ce_b9fe_1a85_ec53;

/// Hashes `data` as consecutive little-endian 64-bit words.
///
/// Panics if `data.len()` is not a multiple of 8 or does not fit in a `u32`.
pub fn hash32(data: &[u8], seed: u32) -> u32 {
    assert!(
        data.len() % 8 == 0,
        "hash input length {} is not a multiple of 8",
        data.len()
    );
    assert!(
        data.len() <= u32::MAX as usize,
        "hash input length {} does not fit in 32 bits",
        data.len()
    );
    let len = data.len() as u32;

    let mut h1 = u64::from(seed ^ len);

    for chunk in data.chunks_exact(8) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        let mut k1 = u64::from_le_bytes(buf);

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);
    }

    h1 ^= h1 >> 33;
    h1 = h1.wrapping_mul(F1);
    h1 ^= h1 >> 33;
    h1 = h1.wrapping_mul(F2);
    h1 ^= h1 >> 33;

    h1 as u32
}

/// Fingerprint of a raw coverage map. The caller's map is left untouched;
/// classification runs on a private copy.
pub fn fingerprint(raw: &[u8]) -> u32 {
    let mut snapshot = raw.to_vec();
    classify(&mut snapshot);
    hash32(&snapshot, FINGERPRINT_SEED)
}
