//! Softirq counters
//!
//! Relaxed atomics bumped on the dispatch path; read with [`SoftirqStats::snapshot`].

use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Live counters for one dispatcher
#[derive(Debug, Default)]
pub struct SoftirqStats {
    rx_packets: AtomicU64,
    tx_completions: AtomicU64,
    invalid_cmds: AtomicU64,
    timer_runs: AtomicU64,
    storage_wakeups: AtomicU64,
    deferred_threads: AtomicU64,
    inline_runs: AtomicU64,
    idle_skips: AtomicU64,
    thread_exhausted: AtomicU64,
}

/// Point-in-time copy of [`SoftirqStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Packets delivered to the network stack
    pub rx_packets: u64,
    /// Transmit buffers freed
    pub tx_completions: u64,
    /// Commands dropped for an unknown tag
    pub invalid_cmds: u64,
    /// Passes that ran expired timers
    pub timer_runs: u64,
    /// Threads woken by storage completions
    pub storage_wakeups: u64,
    /// Deferred softirq threads handed out
    pub deferred_threads: u64,
    /// Passes executed inline
    pub inline_runs: u64,
    /// Dispatches that found nothing to do
    pub idle_skips: u64,
    /// Deferred dispatches refused for lack of a thread permit
    pub thread_exhausted: u64,
}

impl SoftirqStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_rx_packets(&self, n: usize) {
        self.rx_packets.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn add_tx_completions(&self, n: usize) {
        self.tx_completions.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn inc_invalid_cmds(&self) {
        self.invalid_cmds.fetch_add(1, Relaxed);
    }

    pub(crate) fn inc_timer_runs(&self) {
        self.timer_runs.fetch_add(1, Relaxed);
    }

    pub(crate) fn add_storage_wakeups(&self, n: usize) {
        self.storage_wakeups.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn inc_deferred_threads(&self) {
        self.deferred_threads.fetch_add(1, Relaxed);
    }

    pub(crate) fn inc_inline_runs(&self) {
        self.inline_runs.fetch_add(1, Relaxed);
    }

    pub(crate) fn inc_idle_skips(&self) {
        self.idle_skips.fetch_add(1, Relaxed);
    }

    pub(crate) fn inc_thread_exhausted(&self) {
        self.thread_exhausted.fetch_add(1, Relaxed);
    }

    /// Copy out the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Relaxed),
            tx_completions: self.tx_completions.load(Relaxed),
            invalid_cmds: self.invalid_cmds.load(Relaxed),
            timer_runs: self.timer_runs.load(Relaxed),
            storage_wakeups: self.storage_wakeups.load(Relaxed),
            deferred_threads: self.deferred_threads.load(Relaxed),
            inline_runs: self.inline_runs.load(Relaxed),
            idle_skips: self.idle_skips.load(Relaxed),
            thread_exhausted: self.thread_exhausted.load(Relaxed),
        }
    }
}
