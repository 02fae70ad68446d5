//! Softirq dispatch
//!
//! Handles high priority events for a kthread: received packets, transmit
//! completions, expired timers and storage completions. A pass has two
//! phases:
//!
//! 1. **Gather**, with the kthread lock held: drain up to a budget of RX
//!    commands into a [`SoftirqWork`], then let leftover budget harvest
//!    storage completions.
//! 2. **Execute**, with no lock: free transmitted mbufs, deliver received
//!    packets, run expired timers, wake storage threads. In that order.
//!
//! Two entry points wrap the pair. [`Softirq::softirq_run_thread`] packages
//! the gathered batch as a [`SoftirqThread`] for the scheduler to run later.
//! [`Softirq::softirq_run`] executes it inline before returning.
//!
//! Both check the idle predicate first (RX queue empty, no timer due, no
//! storage completion waiting) and bail out before locking or taking a
//! thread permit, which is the common case on a lightly loaded core.

mod thread;
mod work;

pub use thread::{SoftirqThread, ThreadState};
pub use work::SoftirqWork;

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::SoftirqConfig;
use crate::error::{Result, SoftirqError};
use crate::kthread::{Kthread, KthreadGuard};
use crate::ratelimit::RateLimit;
use crate::stats::SoftirqStats;
use crate::traits::{
    CommandQueue, MbufOps, NetStack, NoStorage, RxRegion, SchedulerOps, StorageOps, TimerOps,
};

use thread::ThreadPermit;

static NO_STORAGE: NoStorage = NoStorage;

/// Softirq dispatcher shared by the kthreads of one runtime
pub struct Softirq<'rt> {
    region: &'rt dyn RxRegion,
    net: &'rt dyn NetStack,
    mbufs: &'rt dyn MbufOps,
    timers: &'rt dyn TimerOps,
    storage: &'rt dyn StorageOps,
    sched: &'rt dyn SchedulerOps,
    config: SoftirqConfig,
    threads_in_flight: AtomicUsize,
    invalid_cmd_log: RateLimit,
    stats: SoftirqStats,
}

/// Builder for [`Softirq`]
pub struct SoftirqBuilder<'rt> {
    region: &'rt dyn RxRegion,
    net: &'rt dyn NetStack,
    mbufs: &'rt dyn MbufOps,
    timers: &'rt dyn TimerOps,
    storage: &'rt dyn StorageOps,
    sched: &'rt dyn SchedulerOps,
    config: SoftirqConfig,
}

impl<'rt> SoftirqBuilder<'rt> {
    /// Attach a storage completion poller (default: [`NoStorage`])
    pub fn storage(mut self, storage: &'rt dyn StorageOps) -> Self {
        self.storage = storage;
        self
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: SoftirqConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and build the dispatcher
    pub fn build(self) -> Result<Softirq<'rt>> {
        self.config.validate()?;

        log::debug!(
            "Softirq dispatcher ready: budget {}, rx_buf_len {}, max_threads {}",
            self.config.budget,
            self.config.rx_buf_len,
            self.config.max_threads
        );

        Ok(Softirq {
            region: self.region,
            net: self.net,
            mbufs: self.mbufs,
            timers: self.timers,
            storage: self.storage,
            sched: self.sched,
            invalid_cmd_log: RateLimit::new(self.config.log_interval()),
            config: self.config,
            threads_in_flight: AtomicUsize::new(0),
            stats: SoftirqStats::new(),
        })
    }
}

impl<'rt> Softirq<'rt> {
    /// Start building a dispatcher over the runtime's subsystems
    pub fn builder(
        region: &'rt dyn RxRegion,
        net: &'rt dyn NetStack,
        mbufs: &'rt dyn MbufOps,
        timers: &'rt dyn TimerOps,
        sched: &'rt dyn SchedulerOps,
    ) -> SoftirqBuilder<'rt> {
        SoftirqBuilder {
            region,
            net,
            mbufs,
            timers,
            storage: &NO_STORAGE,
            sched,
            config: SoftirqConfig::default(),
        }
    }

    /// Configured per-pass budget
    pub fn budget(&self) -> usize {
        self.config.budget
    }

    /// Active configuration
    pub fn config(&self) -> &SoftirqConfig {
        &self.config
    }

    /// Dispatch counters
    pub fn stats(&self) -> &SoftirqStats {
        &self.stats
    }

    /// Deferred softirq threads currently alive
    pub fn threads_in_flight(&self) -> usize {
        self.threads_in_flight.load(Ordering::Acquire)
    }

    /// Check if `k` has anything for a softirq pass to do
    ///
    /// Safe to call without the kthread lock; the answer may be stale by the
    /// time the caller acts on it, which gather tolerates.
    pub fn has_work<Q: CommandQueue>(&self, k: &Kthread<Q>) -> bool {
        !k.rxq().is_empty() || self.timers.needed(k.id()) || self.storage.available(k.id())
    }

    /// Package a softirq pass as a thread for the scheduler
    ///
    /// The caller must hold `k`'s lock. Returns `Ok(None)` if there is no work,
    /// or [`SoftirqError::NoThreads`] if every thread permit is in use, in
    /// which case nothing was drained and the caller may retry or fall back
    /// to [`softirq_run`](Self::softirq_run).
    pub fn softirq_run_thread<'a, Q: CommandQueue>(
        &'a self,
        k: &Kthread<Q>,
        guard: &KthreadGuard<'_>,
        budget: usize,
    ) -> Result<Option<SoftirqThread<'a>>> {
        k.assert_lock_held(guard);

        if !self.has_work(k) {
            self.stats.inc_idle_skips();
            return Ok(None);
        }

        let permit = self.acquire_permit()?;
        let work = self.gather(k, guard, budget);
        self.stats.inc_deferred_threads();

        Ok(Some(SoftirqThread::new(self, permit, work)))
    }

    /// Run a softirq pass in the calling context
    ///
    /// Takes `k`'s lock only to gather; the batch executes after the lock is
    /// released. Returns `true` if a pass ran.
    pub fn softirq_run<Q: CommandQueue>(&self, k: &Kthread<Q>, budget: usize) -> bool {
        if !self.has_work(k) {
            self.stats.inc_idle_skips();
            return false;
        }

        let work = {
            let guard = k.lock();
            // Another consumer may have drained the queue while we spun
            if !self.has_work(k) {
                self.stats.inc_idle_skips();
                return false;
            }
            self.gather(k, &guard, budget)
        };

        self.stats.inc_inline_runs();
        self.execute(work);
        true
    }

    /// [`softirq_run_thread`](Self::softirq_run_thread) with the configured budget
    pub fn softirq_run_thread_default<'a, Q: CommandQueue>(
        &'a self,
        k: &Kthread<Q>,
        guard: &KthreadGuard<'_>,
    ) -> Result<Option<SoftirqThread<'a>>> {
        self.softirq_run_thread(k, guard, self.config.budget)
    }

    /// [`softirq_run`](Self::softirq_run) with the configured budget
    pub fn softirq_run_default<Q: CommandQueue>(&self, k: &Kthread<Q>) -> bool {
        self.softirq_run(k, self.config.budget)
    }

    fn acquire_permit(&self) -> Result<ThreadPermit<'_>> {
        let max = self.config.max_threads;
        let taken = self
            .threads_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1));

        match taken {
            Ok(_) => Ok(ThreadPermit::new(&self.threads_in_flight)),
            Err(in_flight) => {
                self.stats.inc_thread_exhausted();
                log::warn!("softirq: no thread available ({} in flight)", in_flight);
                Err(SoftirqError::NoThreads(in_flight))
            }
        }
    }
}
