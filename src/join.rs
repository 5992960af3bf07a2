//! Parallel two-phase hash join.
//!
//! ```text
//!  R ──partition──► build workers ──insert──► HashTable (+ BloomFilter)
//!                                                 │ barrier, freeze
//!  S ──partition──► probe workers ◄──get────── FrozenTable
//!                        │ private buffers
//!                        ▼
//!                  concatenate in partition order
//! ```
//!
//! Each phase runs inside its own `std::thread::scope`, one worker per
//! contiguous partition. Leaving the build scope is the barrier: the table is
//! frozen only after every build worker has been joined, so probe workers
//! can never observe a partially built table.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, trace, warn};

use crate::bloom::{self, BloomFilter};
use crate::error::{JoinError, Phase, Result, invalid_config};
use crate::table::HashTable;
use crate::{Key, Value};

pub const DEFAULT_THREADS: usize = 8;
pub const DEFAULT_TABLE_SIZE: usize = 10_007;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Rows a worker handles between deadline checks.
const CHECK_INTERVAL: usize = 1024;

/// How the optional Bloom filter is sized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BloomConfig {
    /// Sized from the build-side row count at join time.
    TargetRate { false_positive_rate: f64 },
    /// Positions are taken modulo exactly `num_bits`.
    Explicit { num_bits: usize, num_hashes: u32 },
}

impl BloomConfig {
    fn validate(&self) -> Result<()> {
        match *self {
            Self::TargetRate {
                false_positive_rate,
            } => bloom::check_rate(false_positive_rate),
            Self::Explicit {
                num_bits,
                num_hashes,
            } => bloom::check_params(num_bits, num_hashes),
        }
    }

    fn build_filter(&self, build_rows: usize) -> Result<BloomFilter> {
        match *self {
            Self::TargetRate {
                false_positive_rate,
            } => BloomFilter::with_rate(build_rows, false_positive_rate),
            Self::Explicit {
                num_bits,
                num_hashes,
            } => BloomFilter::with_params(num_bits, num_hashes),
        }
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self::TargetRate {
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinConfig {
    /// Workers per phase.
    pub threads: usize,
    /// Buckets in the hash table.
    pub table_size: usize,
    /// `None` disables the Bloom fast path.
    pub bloom: Option<BloomConfig>,
    /// Wall-clock budget for the whole join.
    pub deadline: Option<Duration>,
}

impl JoinConfig {
    pub fn new(threads: usize, table_size: usize) -> Self {
        Self {
            threads,
            table_size,
            bloom: Some(BloomConfig::default()),
            deadline: None,
        }
    }

    pub fn with_bloom(mut self, bloom: Option<BloomConfig>) -> Self {
        self.bloom = bloom;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(invalid_config!("thread count must be positive"));
        }
        if self.table_size == 0 {
            return Err(invalid_config!("table size must be positive"));
        }
        if let Some(bloom) = &self.bloom {
            bloom.validate()?;
        }
        Ok(())
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self::new(DEFAULT_THREADS, DEFAULT_TABLE_SIZE)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStats {
    pub build_rows: usize,
    pub probe_rows: usize,
    pub matches: usize,
    /// Probe rows answered by the Bloom filter alone.
    pub bloom_rejections: usize,
    pub distinct_keys: usize,
    pub max_chain_len: usize,
    pub build_time: Duration,
    pub probe_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOutput {
    /// `(build_value, probe_value)` for every matching row pair, grouped by
    /// probe partition.
    pub pairs: Vec<(Value, Value)>,
    pub stats: JoinStats,
}

/// Split `0..len` into `parts` contiguous ranges of `len / parts` rows, the
/// last one absorbing the remainder. `parts` must be non-zero.
pub fn partition_bounds(len: usize, parts: usize) -> Vec<Range<usize>> {
    debug_assert!(parts > 0);
    let chunk = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i == parts - 1 { len } else { start + chunk };
            start..end
        })
        .collect()
}

/// Shared stop signal for the workers of one join.
struct Watchdog {
    deadline: Option<Instant>,
    tripped: AtomicBool,
}

impl Watchdog {
    fn new(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|d| Instant::now() + d),
            tripped: AtomicBool::new(false),
        }
    }

    fn should_stop(&self) -> bool {
        if self.tripped.load(Ordering::Relaxed) {
            return true;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.trip();
            return true;
        }
        false
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::Relaxed);
    }
}

/// Stops sibling workers early when the owning worker unwinds.
struct TripOnPanic<'a>(&'a Watchdog);

impl Drop for TripOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.trip();
        }
    }
}

/// Run one phase: a worker per non-empty partition of `input`, all joined
/// before returning. A worker returns `None` when it stopped early on the
/// watchdog. If a worker cannot be spawned, the ones already running are
/// stopped and joined before the error is returned.
fn run_phase<T, F>(
    phase: Phase,
    input: &[(Key, Value)],
    threads: usize,
    watchdog: &Watchdog,
    work: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&[(Key, Value)]) -> Option<T> + Sync,
{
    let partitions = partition_bounds(input.len(), threads);
    let mut spawn_error = None;
    let joined: Vec<(usize, thread::Result<Option<T>>)> = thread::scope(|s| {
        let mut handles = Vec::new();
        for (partition, range) in partitions.into_iter().enumerate() {
            if range.is_empty() {
                continue;
            }
            let work = &work;
            let spawned = thread::Builder::new()
                .name(format!("{phase}-{partition}"))
                .spawn_scoped(s, move || {
                    let _guard = TripOnPanic(watchdog);
                    trace!(%phase, partition, rows = ?range, "worker started");
                    work(&input[range])
                });
            match spawned {
                Ok(handle) => handles.push((partition, handle)),
                Err(e) => {
                    watchdog.trip();
                    spawn_error = Some(JoinError::SpawnFailed {
                        phase,
                        partition,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        handles
            .into_iter()
            .map(|(partition, h)| (partition, h.join()))
            .collect()
    });
    if let Some(err) = spawn_error {
        return Err(err);
    }

    let mut results = Vec::with_capacity(joined.len());
    let mut interrupted = false;
    for (partition, outcome) in joined {
        match outcome {
            Ok(Some(value)) => results.push(value),
            Ok(None) => interrupted = true,
            Err(_) => return Err(JoinError::WorkerPanicked { phase, partition }),
        }
    }
    if interrupted {
        return Err(JoinError::DeadlineExceeded { phase });
    }
    Ok(results)
}

/// A configured parallel hash join, reusable across inputs.
#[derive(Debug, Clone)]
pub struct HashJoin {
    config: JoinConfig,
}

impl HashJoin {
    pub fn new(config: JoinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Join `build` (R) with `probe` (S) on key equality.
    pub fn execute(&self, build: &[(Key, Value)], probe: &[(Key, Value)]) -> Result<JoinOutput> {
        let config = &self.config;
        let span = info_span!(
            "hash_join",
            threads = config.threads,
            table_size = config.table_size,
            build_rows = build.len(),
            probe_rows = probe.len(),
            bloom = config.bloom.is_some(),
        );
        let _enter = span.enter();

        let mut stats = JoinStats {
            build_rows: build.len(),
            probe_rows: probe.len(),
            ..JoinStats::default()
        };
        if build.is_empty() || probe.is_empty() {
            debug!("empty input, nothing to join");
            return Ok(JoinOutput {
                pairs: Vec::new(),
                stats,
            });
        }

        let filter = config
            .bloom
            .map(|b| b.build_filter(build.len()))
            .transpose()?;
        let table = HashTable::from_parts(config.table_size, filter)?;
        let watchdog = Watchdog::new(config.deadline);

        let start = Instant::now();
        run_phase(Phase::Build, build, config.threads, &watchdog, |rows| {
            for chunk in rows.chunks(CHECK_INTERVAL) {
                if watchdog.should_stop() {
                    return None;
                }
                table.build(chunk);
            }
            Some(())
        })?;
        stats.build_time = start.elapsed();

        let table = table.freeze();
        stats.distinct_keys = table.len();
        stats.max_chain_len = table.max_chain_len();
        debug!(
            elapsed = ?stats.build_time,
            distinct_keys = stats.distinct_keys,
            max_chain_len = stats.max_chain_len,
            "build phase complete"
        );
        if let Some(filter) = table.bloom() {
            if stats.distinct_keys > filter.capacity() {
                warn!(
                    num_bits = filter.num_bits(),
                    capacity = filter.capacity(),
                    distinct_keys = stats.distinct_keys,
                    estimated_false_positive_rate =
                        filter.estimated_false_positive_rate(stats.distinct_keys),
                    "bloom filter over-filled, absent keys will often reach the buckets"
                );
            }
        }

        let start = Instant::now();
        let outputs = run_phase(Phase::Probe, probe, config.threads, &watchdog, |rows| {
            let mut out = Vec::new();
            let mut rejected = 0;
            for chunk in rows.chunks(CHECK_INTERVAL) {
                if watchdog.should_stop() {
                    return None;
                }
                rejected += table.probe_into(chunk, &mut out);
            }
            Some((out, rejected))
        })?;
        stats.probe_time = start.elapsed();

        let total: usize = outputs.iter().map(|(out, _)| out.len()).sum();
        let mut pairs = Vec::with_capacity(total);
        for (out, rejected) in outputs {
            pairs.extend(out);
            stats.bloom_rejections += rejected;
        }
        stats.matches = pairs.len();
        debug!(elapsed = ?stats.probe_time, "probe phase complete");
        info!(
            matches = stats.matches,
            bloom_rejections = stats.bloom_rejections,
            "hash join complete"
        );

        Ok(JoinOutput { pairs, stats })
    }
}

/// Join `r` and `s` with `thread_count` workers per phase over a table of
/// `table_size` buckets, using the default Bloom filter.
pub fn parallel_hash_join(
    r: &[(Key, Value)],
    s: &[(Key, Value)],
    thread_count: usize,
    table_size: usize,
) -> Result<Vec<(Value, Value)>> {
    let join = HashJoin::new(JoinConfig::new(thread_count, table_size))?;
    Ok(join.execute(r, s)?.pairs)
}
