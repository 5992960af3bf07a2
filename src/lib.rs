//! In-memory parallel equi-join.
//!
//! Joins a build relation R with a probe relation S on integer key equality
//! and returns every `(value_R, value_S)` pair whose keys match:
//!
//! ```
//! use bucketjoin::parallel_hash_join;
//!
//! let r = [(1, 100), (2, 200), (1, 101)];
//! let s = [(1, 9), (3, 5)];
//! let mut pairs = parallel_hash_join(&r, &s, 4, 7).unwrap();
//! pairs.sort();
//! assert_eq!(pairs, vec![(100, 9), (101, 9)]);
//! ```
//!
//! The build side goes into a [`HashTable`] of independently locked buckets,
//! optionally fronted by a [`BloomFilter`] that answers most probes for
//! absent keys without touching a bucket. [`HashJoin`] drives the build and
//! probe phases across worker threads.
pub mod bloom;
pub mod error;
pub mod hash;
pub mod join;
pub mod table;

pub use bloom::BloomFilter;
pub use error::{JoinError, Phase, Result};
pub use join::{
    BloomConfig, HashJoin, JoinConfig, JoinOutput, JoinStats, parallel_hash_join,
    partition_bounds,
};
pub use table::{FrozenTable, HashTable};

/// Join key.
pub type Key = i64;
/// Payload carried alongside a key on either side of the join.
pub type Value = i64;
