#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Fixed-cost CPU workloads and the `Workload` trait.
//!
//! The service layer only needs "burn a constant amount of CPU and tell me how
//! long it took". This crate defines the trait the work loop depends on, a
//! couple of deterministic implementations, and the rate helpers used when a
//! measured duration is turned into a metric row.
//!
//! None of these workloads are proof-of-work functions. They exist to produce a
//! stable, repeatable cost per iteration.

use std::time::Duration;

/// Default number of rounds per iteration.
pub const DEFAULT_ROUNDS: u32 = 10_000;

/// A pure, deterministic computation of constant cost.
///
/// Implementations must not block, sleep, or touch I/O: the work loop times
/// `run` and treats the result as a throughput sample.
pub trait Workload: Send + Sync {
    /// Human-readable workload name (for logs).
    fn name(&self) -> &'static str;

    /// Number of rounds performed by a single `run`.
    fn rounds(&self) -> u32;

    /// Execute one iteration. The returned value only exists so the optimiser
    /// cannot discard the computation.
    fn run(&self) -> u64;
}

/// Integer mixing workload.
///
/// Folds a splitmix64 sequence for a fixed number of rounds.
#[derive(Clone, Debug)]
pub struct MixWorkload {
    rounds: u32,
}

impl MixWorkload {
    pub fn new(rounds: u32) -> Self {
        Self { rounds }
    }
}

impl Default for MixWorkload {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl Workload for MixWorkload {
    fn name(&self) -> &'static str {
        "cpu-mix"
    }

    fn rounds(&self) -> u32 {
        self.rounds
    }

    fn run(&self) -> u64 {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut acc: u64 = 0;
        for i in 0..self.rounds {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15 ^ u64::from(i));
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            acc ^= z ^ (z >> 31);
        }
        std::hint::black_box(acc)
    }
}

/// Floating-point workload.
///
/// A chain of square roots and fused multiply-adds; heavier per round than
/// [`MixWorkload`] on most cores.
#[derive(Clone, Debug)]
pub struct FloatWorkload {
    rounds: u32,
}

impl FloatWorkload {
    pub fn new(rounds: u32) -> Self {
        Self { rounds }
    }
}

impl Default for FloatWorkload {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl Workload for FloatWorkload {
    fn name(&self) -> &'static str {
        "cpu-float"
    }

    fn rounds(&self) -> u32 {
        self.rounds
    }

    fn run(&self) -> u64 {
        let mut acc = 0.0f64;
        for i in 0..self.rounds {
            let x = f64::from(i % 90) + 1.0;
            acc = x.sqrt().mul_add(1.000_001, acc) / 1.000_000_5;
        }
        std::hint::black_box(acc).to_bits()
    }
}

/// Workload selectable by name from configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkloadKind {
    Mix,
    Float,
}

impl WorkloadKind {
    /// Build a boxed workload with the given round count.
    pub fn build(self, rounds: u32) -> Box<dyn Workload> {
        let workload: Box<dyn Workload> = match self {
            WorkloadKind::Mix => Box::new(MixWorkload::new(rounds)),
            WorkloadKind::Float => Box::new(FloatWorkload::new(rounds)),
        };
        log::debug!("built workload {} with {} rounds", workload.name(), rounds);
        workload
    }
}

/// Iterations per second for one iteration that took `elapsed_ns`.
///
/// A zero duration is clamped to one nanosecond so the rate stays finite.
pub fn rate_from_elapsed_ns(elapsed_ns: u64) -> f64 {
    1_000_000_000.0 / elapsed_ns.max(1) as f64
}

/// Same as [`rate_from_elapsed_ns`] for a `Duration`.
pub fn rate_from_duration(elapsed: Duration) -> f64 {
    rate_from_elapsed_ns(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
}

/// Render a rate with exactly two decimal places, as written to the CSV log.
pub fn format_rate(rate: f64) -> String {
    format!("{rate:.2}")
}

/// Human-friendly rate for console output (e.g. `1.25K it/s`).
pub fn format_rate_human(rate: f64) -> String {
    if rate >= 1_000_000.0 {
        format!("{:.2}M it/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2}K it/s", rate / 1_000.0)
    } else {
        format!("{rate:.2} it/s")
    }
}
