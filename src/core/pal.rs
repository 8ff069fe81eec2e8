//! Parallel abstraction layer.
//!
//! Deterministic `parallel_for` / `parallel_map` over index domains, a
//! stateless counter-based RNG, and a small explicitly owned worker pool for
//! bulk numeric kernels. Every helper here returns bit-identical results for
//! any worker count: mapping depends only on the index, and reductions always
//! run in index order (or in a fixed pairwise shape).

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment override for the worker count (positive integer).
pub const MAX_WORKERS_ENV: &str = "GROWNET_PAL_MAX_WORKERS";

/// Default number of indices per in-process tile.
pub const DEFAULT_TILE_SIZE: usize = 4096;

/// Shard length for worker-pool numeric helpers; shorter inputs stay inline.
pub const NUMERIC_SHARD_LEN: usize = 2048;

/// Leaf size for pairwise-tree reductions.
const PAIRWISE_LEAF: usize = 64;

// ─────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────

/// Requested compute device. Only the CPU path exists; see [`select_device`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
    Auto,
}

/// How per-index results are folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Reduction {
    /// Left fold in index order.
    #[default]
    Ordered,
    /// Fixed-shape pairwise tree over index order.
    PairwiseTree,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ParallelOptions {
    /// Worker cap; `None` uses the host's available parallelism.
    pub max_workers: Option<usize>,
    pub tile_size: usize,
    pub device: Device,
    /// Accepted for interface compatibility; kernels are scalar.
    pub vectorization_enabled: bool,
    pub reduction: Reduction,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            tile_size: DEFAULT_TILE_SIZE,
            device: Device::Cpu,
            vectorization_enabled: true,
            reduction: Reduction::Ordered,
        }
    }
}

impl ParallelOptions {
    /// Single-worker options: the path the simulation tick always takes.
    pub fn sequential() -> Self {
        Self::default().with_max_workers(1)
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.tile_size == 0 {
            return Err("tile_size must be > 0");
        }
        if self.max_workers == Some(0) {
            return Err("max_workers must be > 0 when set");
        }
        Ok(())
    }
}

/// Parse a worker-count override. Only positive integers are accepted.
pub fn parse_worker_override(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

fn env_max_workers() -> Option<usize> {
    let raw = std::env::var(MAX_WORKERS_ENV).ok()?;
    let parsed = parse_worker_override(&raw);
    if parsed.is_none() {
        warn!("Ignoring invalid {} value: {:?}", MAX_WORKERS_ENV, raw);
    }
    parsed
}

/// Worker count actually used: environment override, then
/// `options.max_workers`, then available parallelism.
pub fn effective_workers(options: &ParallelOptions) -> usize {
    if let Some(n) = env_max_workers() {
        return n;
    }
    if let Some(n) = options.max_workers.filter(|&n| n > 0) {
        return n;
    }
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Device that will actually run kernels.
///
/// GPU execution is not implemented, so every request resolves to the CPU.
pub fn select_device(options: &ParallelOptions) -> Device {
    match options.device {
        Device::Cpu => Device::Cpu,
        Device::Auto => {
            debug!("Auto device selection resolved to CPU");
            Device::Cpu
        }
        Device::Gpu => {
            warn!("GPU device requested but unavailable; using CPU fallback");
            Device::Cpu
        }
    }
}

/// Resolve the device for its logging side effect. Every kernel in this
/// module runs on the CPU.
fn resolve_cpu_device(options: &ParallelOptions) {
    let device = select_device(options);
    debug_assert_eq!(device, Device::Cpu);
}

// ─────────────────────────────────────────────────────────────────────────
// Index domains
// ─────────────────────────────────────────────────────────────────────────

/// Something with a length whose elements can be produced from an index.
pub trait IndexDomain: Sync {
    type Item;

    fn len(&self) -> usize;

    fn at(&self, index: usize) -> Self::Item;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexDomain for Range<usize> {
    type Item = usize;

    fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    fn at(&self, index: usize) -> usize {
        self.start + index
    }
}

impl<'a, T: Sync> IndexDomain for &'a [T] {
    type Item = &'a T;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn at(&self, index: usize) -> &'a T {
        let items: &'a [T] = self;
        &items[index]
    }
}

/// Row-major `(row, col)` cells of a `height x width` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid2D {
    pub height: usize,
    pub width: usize,
}

impl IndexDomain for Grid2D {
    type Item = (usize, usize);

    fn len(&self) -> usize {
        self.height * self.width
    }

    fn at(&self, index: usize) -> (usize, usize) {
        (index / self.width, index % self.width)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// parallel_for / parallel_map
// ─────────────────────────────────────────────────────────────────────────

/// Run `kernel` on every element in index order.
///
/// Side-effecting kernels always observe sequential execution, whatever the
/// resolved worker count.
pub fn parallel_for<D, F>(domain: &D, mut kernel: F, options: &ParallelOptions)
where
    D: IndexDomain,
    F: FnMut(D::Item),
{
    resolve_cpu_device(options);
    for index in 0..domain.len() {
        kernel(domain.at(index));
    }
}

/// Map every element, then hand the results to `reduce_in_order` in index
/// order.
///
/// Domains no larger than one tile, or a single worker, run inline.
pub fn parallel_map<D, T, R, K, F>(
    domain: &D,
    kernel: K,
    reduce_in_order: F,
    options: &ParallelOptions,
) -> R
where
    D: IndexDomain,
    T: Send,
    K: Fn(D::Item) -> T + Sync,
    F: FnOnce(Vec<T>) -> R,
{
    resolve_cpu_device(options);
    let len = domain.len();
    let workers = effective_workers(options);
    let mapped = if workers <= 1 || len <= options.tile_size.max(1) {
        (0..len).map(|i| kernel(domain.at(i))).collect()
    } else {
        map_sharded_in_process(domain, &kernel, workers)
    };
    reduce_in_order(mapped)
}

#[cfg(feature = "parallel")]
fn map_sharded_in_process<D, T, K>(domain: &D, kernel: &K, workers: usize) -> Vec<T>
where
    D: IndexDomain,
    T: Send,
    K: Fn(D::Item) -> T + Sync,
{
    let len = domain.len();
    match build_thread_pool(workers) {
        Ok(pool) => pool.install(|| (0..len).into_par_iter().map(|i| kernel(domain.at(i))).collect()),
        Err(e) => {
            warn!("Thread pool unavailable ({}); mapping sequentially", e);
            (0..len).map(|i| kernel(domain.at(i))).collect()
        }
    }
}

#[cfg(feature = "parallel")]
fn build_thread_pool(workers: usize) -> Result<rayon::ThreadPool, PalError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("grownet-pal-{i}"))
        .build()
        .map_err(|e| PalError::ThreadPool(e.to_string()))
}

#[cfg(not(feature = "parallel"))]
fn map_sharded_in_process<D, T, K>(domain: &D, kernel: &K, _workers: usize) -> Vec<T>
where
    D: IndexDomain,
    T: Send,
    K: Fn(D::Item) -> T + Sync,
{
    (0..domain.len()).map(|i| kernel(domain.at(i))).collect()
}

// ─────────────────────────────────────────────────────────────────────────
// Counter-based RNG
// ─────────────────────────────────────────────────────────────────────────

/// SplitMix64 finalizer.
#[inline]
pub fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Stateless draw in [0, 1) keyed by six counters.
///
/// Same inputs give the same bits regardless of call order, thread or
/// platform.
#[inline]
pub fn counter_rng(
    seed: u64,
    step: u64,
    draw_kind: u64,
    layer_index: u64,
    unit_index: u64,
    draw_index: u64,
) -> f64 {
    let mut key = seed;
    for part in [step, draw_kind, layer_index, unit_index, draw_index] {
        key = mix64(key ^ part);
    }
    (key >> 11) as f64 / (1u64 << 53) as f64
}

/// Fixed counters for a stream of `counter_rng` draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DrawKey {
    pub seed: u64,
    pub step: u64,
    pub draw_kind: u64,
    pub layer_index: u64,
    pub unit_index: u64,
}

impl DrawKey {
    #[inline]
    pub fn draw(&self, draw_index: u64) -> f64 {
        counter_rng(
            self.seed,
            self.step,
            self.draw_kind,
            self.layer_index,
            self.unit_index,
            draw_index,
        )
    }
}

/// Sum `values` with the requested reduction shape.
pub fn reduce_sum(values: &[f64], reduction: Reduction) -> f64 {
    match reduction {
        Reduction::Ordered => values.iter().sum(),
        Reduction::PairwiseTree => pairwise_sum(values),
    }
}

fn pairwise_sum(values: &[f64]) -> f64 {
    if values.len() <= PAIRWISE_LEAF {
        return values.iter().sum();
    }
    let (left, right) = values.split_at(values.len() / 2);
    pairwise_sum(left) + pairwise_sum(right)
}

// ─────────────────────────────────────────────────────────────────────────
// Worker pool
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PalError {
    #[error("worker pool is shut down")]
    ShutDown,
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("{failed} of {total} shards failed; first failure: {first}")]
    Batch {
        failed: usize,
        total: usize,
        first: String,
    },
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Outcome of one task submitted to a [`WorkerPool`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    outcome: Result<T, String>,
}

impl<T> TaskHandle<T> {
    /// The task's value, or the panic it raised.
    pub fn join(self) -> Result<T, PalError> {
        self.outcome.map_err(PalError::WorkerPanicked)
    }
}

/// An explicitly owned pool for bulk numeric kernels.
///
/// With the `parallel` feature the pool is a rayon thread pool built on first
/// use and dropped by [`WorkerPool::shutdown`]; without it, batches run on
/// the calling thread with the same sharding and failure semantics. Tasks
/// must not touch simulation state.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
    started: bool,
    shut_down: bool,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            #[cfg(feature = "parallel")]
            pool: None,
            started: false,
            shut_down: false,
        }
    }

    pub fn from_options(options: &ParallelOptions) -> Self {
        Self::new(effective_workers(options))
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn ensure_started(&mut self) -> Result<(), PalError> {
        if self.shut_down {
            return Err(PalError::ShutDown);
        }
        #[cfg(feature = "parallel")]
        if self.pool.is_none() {
            self.pool = Some(build_thread_pool(self.max_workers)?);
        }
        if !self.started {
            debug!(workers = self.max_workers, "PAL worker pool started");
            self.started = true;
        }
        Ok(())
    }

    /// Run `op` on the pool's threads when there are any.
    fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            return pool.install(op);
        }
        op()
    }

    /// Run one task to completion.
    pub fn run<T, F>(&mut self, task: F) -> Result<TaskHandle<T>, PalError>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        self.ensure_started()?;
        let outcome = self.install(|| panic::catch_unwind(AssertUnwindSafe(task)).map_err(panic_message));
        Ok(TaskHandle { outcome })
    }

    /// Split `input` into contiguous shards, run `kernel` on each and
    /// concatenate the outputs in shard order.
    ///
    /// Small inputs (or a single-worker pool) run inline. Every shard is
    /// awaited; any failure fails the whole batch.
    pub fn map_sharded<T, R, F>(
        &mut self,
        input: &[T],
        shard_len: usize,
        kernel: F,
    ) -> Result<Vec<R>, PalError>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> Vec<R> + Sync,
    {
        let shard_len = shard_len.max(1);
        if self.max_workers <= 1 || input.len() < shard_len {
            return panic::catch_unwind(AssertUnwindSafe(|| kernel(input)))
                .map_err(|payload| PalError::WorkerPanicked(panic_message(payload)));
        }

        self.ensure_started()?;
        let run_shard = |shard: &[T]| panic::catch_unwind(AssertUnwindSafe(|| kernel(shard))).map_err(panic_message);
        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<Vec<R>, String>> =
            self.install(|| input.par_chunks(shard_len).map(run_shard).collect());
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<Vec<R>, String>> = input.chunks(shard_len).map(run_shard).collect();

        let total = outcomes.len();
        let mut out = Vec::with_capacity(input.len());
        let mut failed = 0;
        let mut first = None;
        for outcome in outcomes {
            match outcome {
                Ok(part) => out.extend(part),
                Err(message) => {
                    failed += 1;
                    first.get_or_insert(message);
                }
            }
        }

        match first {
            None => Ok(out),
            Some(first) => {
                warn!(failed, total, "PAL batch failed");
                Err(PalError::Batch {
                    failed,
                    total,
                    first,
                })
            }
        }
    }

    /// Stop accepting work and release the pool's threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.started = false;
        #[cfg(feature = "parallel")]
        {
            self.pool = None;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Numeric helpers
// ─────────────────────────────────────────────────────────────────────────

/// `values[i] + scalar`, sharded across the pool.
pub fn map_add_scalar(pool: &mut WorkerPool, values: &[f64], scalar: f64) -> Result<Vec<f64>, PalError> {
    pool.map_sharded(values, NUMERIC_SHARD_LEN, move |shard: &[f64]| {
        shard.iter().map(|v| v + scalar).collect()
    })
}

/// `values[i] * factor`, sharded across the pool.
pub fn map_scale(pool: &mut WorkerPool, values: &[f64], factor: f64) -> Result<Vec<f64>, PalError> {
    pool.map_sharded(values, NUMERIC_SHARD_LEN, move |shard: &[f64]| {
        shard.iter().map(|v| v * factor).collect()
    })
}

/// Sum of draws `0..count` from `key`.
///
/// Draws are generated in shards but summed in index order, so the result
/// does not depend on the pool size.
pub fn counter_rng_sum(
    pool: &mut WorkerPool,
    key: DrawKey,
    count: u64,
    reduction: Reduction,
) -> Result<f64, PalError> {
    let indices: Vec<u64> = (0..count).collect();
    let draws = pool.map_sharded(&indices, NUMERIC_SHARD_LEN, move |shard: &[u64]| {
        shard.iter().map(|&i| key.draw(i)).collect()
    })?;
    Ok(reduce_sum(&draws, reduction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch the worker-count environment variable.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn mix64_matches_splitmix_reference() {
        assert_eq!(mix64(0), 0xE220_A839_7B1D_CDAF);
    }

    #[test]
    fn counter_rng_is_pure_and_in_range() {
        let a = counter_rng(1234, 7, 1, 2, 3, 4);
        let b = counter_rng(1234, 7, 1, 2, 3, 4);
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((0.0..1.0).contains(&a));

        assert_ne!(a, counter_rng(1234, 7, 1, 2, 3, 5));
        assert_ne!(a, counter_rng(1235, 7, 1, 2, 3, 4));
    }

    #[test]
    fn parallel_map_is_identical_for_one_and_eight_workers() {
        let domain = 0..10_000usize;
        let key = DrawKey {
            seed: 1234,
            ..DrawKey::default()
        };
        let run = |workers: usize| {
            let opts = ParallelOptions::default()
                .with_max_workers(workers)
                .with_tile_size(256);
            parallel_map(&domain, |i| key.draw(i as u64), |v| v, &opts)
        };

        let one = run(1);
        let eight = run(8);
        assert_eq!(one.len(), 10_000);
        assert!(one
            .iter()
            .zip(eight.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn parallel_map_reduces_in_index_order() {
        let items = ["a", "b", "c", "d", "e"];
        let domain: &[&str] = &items;
        let opts = ParallelOptions::default().with_max_workers(3).with_tile_size(1);
        let joined = parallel_map(&domain, |s| s.to_uppercase(), |v| v.concat(), &opts);
        assert_eq!(joined, "ABCDE");
    }

    #[test]
    fn parallel_for_visits_every_index_in_order() {
        let mut seen = Vec::new();
        let opts = ParallelOptions::default().with_max_workers(8);
        parallel_for(&Grid2D { height: 2, width: 3 }, |cell| seen.push(cell), &opts);
        assert_eq!(seen, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn gpu_requests_fall_back_to_cpu() {
        for device in [Device::Cpu, Device::Gpu, Device::Auto] {
            let opts = ParallelOptions::default().with_device(device);
            assert_eq!(select_device(&opts), Device::Cpu);
        }
    }

    #[test]
    fn gpu_requests_still_map_and_visit_on_the_cpu() {
        for device in [Device::Gpu, Device::Auto] {
            let opts = ParallelOptions::sequential().with_device(device);
            let squares = parallel_map(&(0..5usize), |i| i * i, |v| v, &opts);
            assert_eq!(squares, vec![0, 1, 4, 9, 16]);

            let mut visited = 0;
            parallel_for(&(0..5usize), |_| visited += 1, &opts);
            assert_eq!(visited, 5);
        }
    }

    #[test]
    fn worker_override_parsing() {
        assert_eq!(parse_worker_override(" 4 "), Some(4));
        assert_eq!(parse_worker_override("0"), None);
        assert_eq!(parse_worker_override("-2"), None);
        assert_eq!(parse_worker_override("many"), None);
    }

    #[test]
    fn worker_count_precedence() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let host = thread::available_parallelism().map_or(1, |n| n.get());
        let capped = ParallelOptions::default().with_max_workers(3);

        std::env::remove_var(MAX_WORKERS_ENV);
        assert_eq!(effective_workers(&ParallelOptions::default()), host);
        assert_eq!(effective_workers(&capped), 3);

        std::env::set_var(MAX_WORKERS_ENV, "5");
        assert_eq!(effective_workers(&capped), 5);
        assert_eq!(effective_workers(&ParallelOptions::sequential()), 5);
        assert_eq!(WorkerPool::from_options(&capped).max_workers(), 5);

        std::env::set_var(MAX_WORKERS_ENV, "zero");
        assert_eq!(effective_workers(&capped), 3, "invalid override is ignored");

        std::env::remove_var(MAX_WORKERS_ENV);
        assert_eq!(effective_workers(&capped), 3);
    }

    #[test]
    fn options_validation() {
        assert!(ParallelOptions::default().validate().is_ok());
        assert!(ParallelOptions::default().with_tile_size(0).validate().is_err());
        assert!(ParallelOptions::default().with_max_workers(0).validate().is_err());
    }

    #[test]
    fn numeric_helpers_small_inputs() {
        let mut pool = WorkerPool::new(2);
        let added = map_add_scalar(&mut pool, &[1.0, 2.0, 3.0, 4.0], 0.5).unwrap();
        assert_eq!(added, vec![1.5, 2.5, 3.5, 4.5]);
        let scaled = map_scale(&mut pool, &[1.0, 2.0, 3.0, 4.0], 2.0).unwrap();
        assert_eq!(scaled, vec![2.0, 4.0, 6.0, 8.0]);
        assert!(!pool.is_started(), "small inputs stay inline");
    }

    #[test]
    fn numeric_helpers_match_sequential_on_large_inputs() {
        let values: Vec<f64> = (0..10_000).map(|i| i as f64 * 0.25).collect();
        let mut single = WorkerPool::new(1);
        let mut many = WorkerPool::new(4);

        let a = map_scale(&mut single, &values, 3.0).unwrap();
        let b = map_scale(&mut many, &values, 3.0).unwrap();
        assert_eq!(a, b);
        assert!(many.is_started());

        let key = DrawKey {
            seed: 1234,
            step: 1,
            ..DrawKey::default()
        };
        for reduction in [Reduction::Ordered, Reduction::PairwiseTree] {
            let s1 = counter_rng_sum(&mut single, key, 10_000, reduction).unwrap();
            let s4 = counter_rng_sum(&mut many, key, 10_000, reduction).unwrap();
            assert_eq!(s1.to_bits(), s4.to_bits());
            assert!((s1 / 10_000.0 - 0.5).abs() < 0.05, "mean of uniform draws");
        }
    }

    #[test]
    fn failing_shard_fails_the_whole_batch() {
        let mut pool = WorkerPool::new(2);
        let input: Vec<u32> = (0..10).collect();
        let result = pool.map_sharded(&input, 3, |shard: &[u32]| {
            if shard.contains(&4) {
                panic!("bad shard");
            }
            shard.to_vec()
        });
        match result {
            Err(PalError::Batch { failed, total, first }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 4);
                assert!(first.contains("bad shard"));
            }
            other => panic!("expected batch failure, got {other:?}"),
        }

        // The pool survives a panicking task.
        let ok = pool.map_sharded(&input, 3, |shard: &[u32]| shard.to_vec()).unwrap();
        assert_eq!(ok, input);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let mut pool = WorkerPool::new(2);
        let handle = pool.run(|| 21 * 2).unwrap();
        assert_eq!(handle.join().unwrap(), 42);

        let failed = pool.run(|| -> u32 { panic!("task blew up") }).unwrap();
        match failed.join() {
            Err(PalError::WorkerPanicked(message)) => assert!(message.contains("task blew up")),
            other => panic!("expected a worker panic, got {other:?}"),
        }
        assert!(pool.is_started());

        pool.shutdown();
        pool.shutdown();
        assert!(!pool.is_started());
        assert!(pool.is_shut_down());
        assert!(matches!(pool.run(|| 1), Err(PalError::ShutDown)));
    }
}
