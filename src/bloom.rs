//! Bloom filter over join keys.
//!
//! ```text
//!  key ──hash_key──► base ──seeded(base, 0..k)──► positions mod m
//!
//!  bits: [AtomicU64; ceil(m / 64)]
//!        word = pos / 64, bit = pos % 64
//! ```
//!
//! Inserts set bits with `fetch_or`, so concurrent builders never lose each
//! other's bits and the filter needs no lock of its own. The filter is never
//! resized: inserting more than [`BloomFilter::capacity`] distinct keys
//! quietly raises the false-positive rate.

use std::f64::consts::LN_2;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Key;
use crate::error::{Result, invalid_config};
use crate::hash::{hash_key, seeded};

const WORD_BITS: usize = u64::BITS as usize;
const MIN_BITS: usize = 64;
// Largest bit array accepted, in bytes: the allocation limit of `isize::MAX`,
// further capped at a 47-bit user address space.
const MAX_BYTES: u64 = 1 << 47;

pub struct BloomFilter {
    bits: Box<[AtomicU64]>,
    num_bits: usize,
    num_hashes: u32,
    capacity: usize,
}

impl BloomFilter {
    /// Size a filter for `expected_keys` distinct keys at the target
    /// false-positive probability.
    ///
    /// Uses `m = ceil(-n ln p / (ln 2)^2)` bits and `k = ceil(log2(1 / p))`
    /// hash functions. An `expected_keys` of zero is treated as one.
    pub fn with_rate(expected_keys: usize, false_positive_rate: f64) -> Result<Self> {
        check_rate(false_positive_rate)?;
        let (num_bits, num_hashes) = optimal_params(expected_keys, false_positive_rate);
        let mut filter = Self::with_params(num_bits, num_hashes)?;
        filter.capacity = expected_keys.max(1);
        Ok(filter)
    }

    /// Filter with an explicit bit-array length and hash count.
    ///
    /// Positions are taken modulo exactly `num_bits`; only the backing
    /// allocation is rounded up to whole 64-bit words. The capacity is the
    /// key count at which `k` hashes over `m` bits are optimal,
    /// `floor(m ln 2 / k)`, and at least one.
    pub fn with_params(num_bits: usize, num_hashes: u32) -> Result<Self> {
        check_params(num_bits, num_hashes)?;
        let num_words = num_bits.div_ceil(WORD_BITS);
        let mut words = Vec::new();
        words.try_reserve_exact(num_words).map_err(|e| {
            invalid_config!("cannot allocate bloom filter of {num_bits} bits: {e}")
        })?;
        words.extend((0..num_words).map(|_| AtomicU64::new(0)));
        let bits = words.into_boxed_slice();
        let capacity = (num_bits as f64 * LN_2 / num_hashes as f64).floor() as usize;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            capacity: capacity.max(1),
        })
    }

    #[inline]
    pub fn insert(&self, key: Key) {
        let base = hash_key(key);
        for seed in 0..self.num_hashes {
            let (word, mask) = self.locate(base, seed);
            self.bits[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    /// Returns false only if `key` was definitely never inserted.
    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        let base = hash_key(key);
        (0..self.num_hashes).all(|seed| {
            let (word, mask) = self.locate(base, seed);
            self.bits[word].load(Ordering::Relaxed) & mask != 0
        })
    }

    #[inline(always)]
    fn locate(&self, base: u64, seed: u32) -> (usize, u64) {
        let pos = (seeded(base, seed) % self.num_bits as u64) as usize;
        (pos / WORD_BITS, 1u64 << (pos % WORD_BITS))
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Distinct keys the filter was sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of set bits.
    pub fn ones(&self) -> usize {
        self.bits
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Expected false-positive rate after `inserted` distinct keys:
    /// `(1 - e^(-k n / m))^k`.
    pub fn estimated_false_positive_rate(&self, inserted: usize) -> f64 {
        let k = self.num_hashes as f64;
        let exponent = -k * inserted as f64 / self.num_bits as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("capacity", &self.capacity)
            .finish()
    }
}

pub(crate) fn check_rate(false_positive_rate: f64) -> Result<()> {
    if !false_positive_rate.is_finite() || false_positive_rate <= 0.0 || false_positive_rate >= 1.0
    {
        return Err(invalid_config!(
            "bloom false-positive rate must lie in (0, 1), got {false_positive_rate}"
        ));
    }
    Ok(())
}

pub(crate) fn check_params(num_bits: usize, num_hashes: u32) -> Result<()> {
    if num_bits == 0 {
        return Err(invalid_config!("bloom filter needs at least one bit"));
    }
    let bytes = num_bits.div_ceil(WORD_BITS) as u64 * size_of::<u64>() as u64;
    if bytes > MAX_BYTES || bytes > isize::MAX as u64 {
        return Err(invalid_config!(
            "bloom filter of {num_bits} bits exceeds the {MAX_BYTES}-byte limit"
        ));
    }
    if num_hashes == 0 {
        return Err(invalid_config!("bloom filter needs at least one hash function"));
    }
    Ok(())
}

fn optimal_params(expected_keys: usize, false_positive_rate: f64) -> (usize, u32) {
    let n = expected_keys.max(1) as f64;
    let m = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil() as usize;
    let k = (1.0 / false_positive_rate).log2().ceil() as u32;
    (m.max(MIN_BITS), k.max(1))
}
