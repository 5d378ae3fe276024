//! NNTP and pool counters
//!
//! A [`MetricsCollector`] is created per triage run and handed by reference to
//! every task of that run, so concurrent runs never share counters. Pool
//! lifecycle counters are kept twice: per run (in the collector) and for the
//! lifetime of the engine (in [`PoolCounters`]).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Snapshot of one run's counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    /// STAT commands issued
    pub stat_calls: u64,
    /// STAT commands answered 223
    pub stat_successes: u64,
    /// STAT commands answered 430
    pub stat_missing: u64,
    /// STAT commands that failed otherwise
    pub stat_errors: u64,
    /// Total STAT latency
    pub stat_duration_ms: u64,
    /// BODY commands issued
    pub body_calls: u64,
    /// BODY commands answered 222
    pub body_successes: u64,
    /// BODY commands answered 430
    pub body_missing: u64,
    /// BODY commands that failed otherwise
    pub body_errors: u64,
    /// Total BODY latency
    pub body_duration_ms: u64,
    /// Decoded bytes handed to inspectors
    pub bytes_decoded: u64,
    /// NZBs that went through analysis
    pub nzbs_analyzed: u64,
    /// Highest number of NZBs under analysis at the same time
    pub peak_concurrent_nzbs: u64,
    /// Pools built during this run
    pub pool_creates: u64,
    /// Shared pools reused during this run
    pub pool_reuses: u64,
    /// Pools closed during this run
    pub pool_closes: u64,
    /// Lifetime pool counters of the engine
    pub pool_totals: PoolTotals,
}

/// Lifetime pool counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    /// Pools built
    pub creates: u64,
    /// Shared pools reused
    pub reuses: u64,
    /// Pools closed
    pub closes: u64,
}

/// Which NNTP command a measurement belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// STAT
    Stat,
    /// BODY
    Body,
}

/// Outcome of an NNTP command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Positive answer
    Success,
    /// Article missing
    Missing,
    /// Any other failure
    Error,
}

#[derive(Debug, Default)]
struct CommandCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    missing: AtomicU64,
    errors: AtomicU64,
    duration_ms: AtomicU64,
}

impl CommandCounters {
    fn record(&self, outcome: Outcome, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Success => &self.successes,
            Outcome::Missing => &self.missing,
            Outcome::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Lock-free per-run counters
#[derive(Debug, Default)]
pub struct MetricsCollector {
    stat: CommandCounters,
    body: CommandCounters,
    bytes_decoded: AtomicU64,
    nzbs_analyzed: AtomicU64,
    active_nzbs: AtomicUsize,
    peak_concurrent_nzbs: AtomicUsize,
    pool_creates: AtomicU64,
    pool_reuses: AtomicU64,
    pool_closes: AtomicU64,
}

impl MetricsCollector {
    /// Fresh collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one STAT or BODY exchange
    pub fn record_command(&self, command: Command, outcome: Outcome, elapsed: Duration) {
        match command {
            Command::Stat => self.stat.record(outcome, elapsed),
            Command::Body => self.body.record(outcome, elapsed),
        }
    }

    /// Record decoded bytes handed to an inspector
    pub fn record_decoded(&self, bytes: usize) {
        self.bytes_decoded
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Mark an NZB as entering analysis; the guard marks it leaving
    pub fn enter_nzb(&self) -> ActiveNzbGuard<'_> {
        self.nzbs_analyzed.fetch_add(1, Ordering::Relaxed);
        let now = self.active_nzbs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent_nzbs.fetch_max(now, Ordering::SeqCst);
        ActiveNzbGuard { collector: self }
    }

    /// Record a pool build
    pub fn record_pool_create(&self) {
        self.pool_creates.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shared pool reuse
    pub fn record_pool_reuse(&self) {
        self.pool_reuses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pool close
    pub fn record_pool_close(&self) {
        self.pool_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters, merging in the engine's lifetime pool totals
    pub fn snapshot(&self, pool_totals: PoolTotals) -> RunMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RunMetrics {
            stat_calls: load(&self.stat.calls),
            stat_successes: load(&self.stat.successes),
            stat_missing: load(&self.stat.missing),
            stat_errors: load(&self.stat.errors),
            stat_duration_ms: load(&self.stat.duration_ms),
            body_calls: load(&self.body.calls),
            body_successes: load(&self.body.successes),
            body_missing: load(&self.body.missing),
            body_errors: load(&self.body.errors),
            body_duration_ms: load(&self.body.duration_ms),
            bytes_decoded: load(&self.bytes_decoded),
            nzbs_analyzed: load(&self.nzbs_analyzed),
            peak_concurrent_nzbs: self.peak_concurrent_nzbs.load(Ordering::SeqCst) as u64,
            pool_creates: load(&self.pool_creates),
            pool_reuses: load(&self.pool_reuses),
            pool_closes: load(&self.pool_closes),
            pool_totals,
        }
    }
}

/// Decrements the active-NZB gauge on drop
pub struct ActiveNzbGuard<'a> {
    collector: &'a MetricsCollector,
}

impl Drop for ActiveNzbGuard<'_> {
    fn drop(&mut self) {
        self.collector.active_nzbs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lifetime pool counters owned by the engine
#[derive(Debug, Default)]
pub struct PoolCounters {
    creates: AtomicU64,
    reuses: AtomicU64,
    closes: AtomicU64,
}

impl PoolCounters {
    /// Count a pool build
    pub fn created(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a shared pool reuse
    pub fn reused(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a pool close
    pub fn closed(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals
    pub fn totals(&self) -> PoolTotals {
        PoolTotals {
            creates: self.creates.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }
}
