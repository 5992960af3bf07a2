//! Integer hashing shared by the bucket table and the Bloom filter.
//!
//! Both structures hash the key's two's-complement bits with the MurmurHash3
//! 64-bit finalizer (`fmix64`), so bucket placement and filter positions are
//! identical on every platform and word size.

use crate::Key;

const FMIX_C1: u64 = 0xff51_afd7_ed55_8ccd;
const FMIX_C2: u64 = 0xc4ce_b9fe_1a85_ec53;

/// Spreads seed indices across the high bits before they are folded into
/// the base hash.
const SEED_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;

/// MurmurHash3 `fmix64`: xor-shift, multiply, xor-shift, multiply, xor-shift.
#[inline(always)]
pub fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(FMIX_C1);
    h ^= h >> 33;
    h = h.wrapping_mul(FMIX_C2);
    h ^= h >> 33;
    h
}

/// Base hash of a join key.
#[inline(always)]
pub fn hash_key(key: Key) -> u64 {
    mix64(key as u64)
}

/// The `seed`-th derived hash of an already hashed key.
#[inline(always)]
pub fn seeded(base: u64, seed: u32) -> u64 {
    mix64(base ^ (seed as u64).wrapping_mul(SEED_STRIDE))
}

/// Reduce a key to a slot in `0..slots`. `slots` must be non-zero.
#[inline(always)]
pub fn bucket_index(key: Key, slots: usize) -> usize {
    debug_assert!(slots > 0);
    (hash_key(key) % slots as u64) as usize
}
