//! Bucket table for the build side of a join.
//!
//! ```text
//!  buckets: Box<[Bucket]>            (fixed at construction)
//! ┌──────────────────────────────┐
//! │ 0: Mutex<[(k, [v, v, ..]), ..]>│
//! │ 1: Mutex<[]>                   │
//! │ ...                            │
//! └──────────────────────────────┘
//!  bucket = fmix64(key) % bucket_count
//! ```
//!
//! Each bucket chains its distinct keys in a small vector and owns its own
//! lock, so build workers only contend when their keys share a bucket. Once
//! the build is finished, [`HashTable::freeze`] consumes the locks and yields
//! a [`FrozenTable`] that probe workers read without any synchronization.

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::error::{Result, invalid_config};
use crate::hash::bucket_index;
use crate::{Key, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: Key,
    values: Vec<Value>,
}

#[derive(Default)]
struct Bucket {
    entries: Mutex<Vec<Entry>>,
}

fn find(entries: &[Entry], key: Key) -> Option<&Entry> {
    entries.iter().find(|e| e.key == key)
}

/// Concurrent build-side table. All methods take `&self`.
pub struct HashTable {
    buckets: Box<[Bucket]>,
    bloom: Option<BloomFilter>,
}

impl HashTable {
    pub fn new(bucket_count: usize) -> Result<Self> {
        Self::from_parts(bucket_count, None)
    }

    /// Table whose lookups are pre-filtered by `bloom`.
    pub fn with_bloom(bucket_count: usize, bloom: BloomFilter) -> Result<Self> {
        Self::from_parts(bucket_count, Some(bloom))
    }

    pub(crate) fn from_parts(bucket_count: usize, bloom: Option<BloomFilter>) -> Result<Self> {
        if bucket_count == 0 {
            return Err(invalid_config!("bucket count must be positive"));
        }
        let buckets = (0..bucket_count).map(|_| Bucket::default()).collect();
        Ok(Self { buckets, bloom })
    }

    /// Append `value` to the entry for `key`, creating the entry on first
    /// sight of the key.
    pub fn insert(&self, key: Key, value: Value) {
        if let Some(bloom) = &self.bloom {
            bloom.insert(key);
        }
        let bucket = &self.buckets[bucket_index(key, self.buckets.len())];
        let mut entries = bucket.entries.lock();
        match entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.values.push(value),
            None => entries.push(Entry {
                key,
                values: vec![value],
            }),
        }
    }

    /// Copy of the values stored under `key`, empty if there are none.
    ///
    /// Takes the bucket lock for the duration of the scan, so it is safe to
    /// call while inserts are still running.
    pub fn get(&self, key: Key) -> Vec<Value> {
        if let Some(bloom) = &self.bloom {
            if !bloom.contains(key) {
                return Vec::new();
            }
        }
        let bucket = &self.buckets[bucket_index(key, self.buckets.len())];
        let entries = bucket.entries.lock();
        find(&entries, key)
            .map(|e| e.values.clone())
            .unwrap_or_default()
    }

    pub fn build(&self, pairs: &[(Key, Value)]) {
        for &(key, value) in pairs {
            self.insert(key, value);
        }
    }

    /// Join `pairs` against the table, emitting `(build_value, probe_value)`
    /// for every match.
    pub fn probe(&self, pairs: &[(Key, Value)]) -> Vec<(Value, Value)> {
        let mut out = Vec::new();
        for &(key, probe_value) in pairs {
            out.extend(self.get(key).into_iter().map(|v| (v, probe_value)));
        }
        out
    }

    /// Distinct keys chained in the bucket that `key` maps to.
    pub fn collision_count(&self, key: Key) -> usize {
        self.buckets[bucket_index(key, self.buckets.len())]
            .entries
            .lock()
            .len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bloom(&self) -> Option<&BloomFilter> {
        self.bloom.as_ref()
    }

    /// Finish the build. The returned table is read-only and lock-free.
    pub fn freeze(self) -> FrozenTable {
        let buckets = self
            .buckets
            .into_vec()
            .into_iter()
            .map(|b| b.entries.into_inner().into_boxed_slice())
            .collect();
        FrozenTable {
            buckets,
            bloom: self.bloom,
        }
    }
}

/// Read-only view of a fully built table, shared by probe workers.
pub struct FrozenTable {
    buckets: Box<[Box<[Entry]>]>,
    bloom: Option<BloomFilter>,
}

impl FrozenTable {
    /// Values stored under `key`, empty if there are none.
    #[inline]
    pub fn get(&self, key: Key) -> &[Value] {
        if let Some(bloom) = &self.bloom {
            if !bloom.contains(key) {
                return &[];
            }
        }
        self.scan(key)
    }

    #[inline]
    fn scan(&self, key: Key) -> &[Value] {
        let entries = &self.buckets[bucket_index(key, self.buckets.len())];
        find(entries, key)
            .map(|e| e.values.as_slice())
            .unwrap_or_default()
    }

    pub fn probe(&self, pairs: &[(Key, Value)]) -> Vec<(Value, Value)> {
        let mut out = Vec::new();
        self.probe_into(pairs, &mut out);
        out
    }

    /// Append matches for `pairs` to `out`. Returns how many probe keys the
    /// Bloom filter rejected without a bucket scan.
    pub(crate) fn probe_into(
        &self,
        pairs: &[(Key, Value)],
        out: &mut Vec<(Value, Value)>,
    ) -> usize {
        let mut rejected = 0;
        for &(key, probe_value) in pairs {
            if let Some(bloom) = &self.bloom {
                if !bloom.contains(key) {
                    rejected += 1;
                    continue;
                }
            }
            out.extend(self.scan(key).iter().map(|&v| (v, probe_value)));
        }
        rejected
    }

    pub fn collision_count(&self, key: Key) -> usize {
        self.buckets[bucket_index(key, self.buckets.len())].len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longest chain of distinct keys in any bucket.
    pub fn max_chain_len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).max().unwrap_or(0)
    }

    pub fn bloom(&self) -> Option<&BloomFilter> {
        self.bloom.as_ref()
    }
}
