//! Softirq batches: gather and execute

use super::Softirq;
use crate::kthread::{Kthread, KthreadGuard, KthreadId, ThreadId};
use crate::lrpc::RxCmd;
use crate::ratelimit::error_ratelimited;
use crate::shm::{MbufRef, RxBuf, ShmPtr};
use crate::traits::{CommandQueue, ThreadBatch};
use crate::SOFTIRQ_MAX_BUDGET;

/// Work gathered by one softirq pass
///
/// Stored inline; a batch never allocates. Owned by exactly one entry point
/// (or the [`SoftirqThread`](super::SoftirqThread) carrying it) and consumed
/// by a single execute.
#[derive(Debug)]
pub struct SoftirqWork {
    k: KthreadId,
    recv: heapless::Vec<RxBuf, SOFTIRQ_MAX_BUDGET>,
    compl: heapless::Vec<MbufRef, SOFTIRQ_MAX_BUDGET>,
    storage: ThreadBatch,
    timer_budget: usize,
}

impl SoftirqWork {
    fn new(k: KthreadId) -> Self {
        Self {
            k,
            recv: heapless::Vec::new(),
            compl: heapless::Vec::new(),
            storage: heapless::Vec::new(),
            timer_budget: 0,
        }
    }

    /// Kthread the batch was gathered from
    pub fn kthread(&self) -> KthreadId {
        self.k
    }

    /// Received packets, in arrival order
    pub fn received(&self) -> &[RxBuf] {
        &self.recv
    }

    /// Transmitted mbufs awaiting free, in arrival order
    pub fn completed(&self) -> &[MbufRef] {
        &self.compl
    }

    /// Threads unblocked by storage completions
    pub fn storage_ready(&self) -> &[ThreadId] {
        &self.storage
    }

    /// Budget left for timer expiry
    pub fn timer_budget(&self) -> usize {
        self.timer_budget
    }
}

fn push_bounded<T, const N: usize>(v: &mut heapless::Vec<T, N>, item: T) {
    if v.push(item).is_err() {
        unreachable!("softirq batch exceeds SOFTIRQ_MAX_BUDGET");
    }
}

impl Softirq<'_> {
    /// Drain up to `budget` RX commands from `k` into a new batch
    ///
    /// `budget` is capped at [`SOFTIRQ_MAX_BUDGET`], which also bounds how many
    /// commands are dequeued. Only recognized commands are charged against the
    /// budget; whatever is left becomes the timer budget and, if positive, the
    /// storage harvest budget.
    ///
    /// # Panics
    ///
    /// If a received-packet offset does not resolve in the shared RX region.
    /// Offsets come only from trusted producers, so this is memory corruption.
    pub fn gather<Q: CommandQueue>(
        &self,
        k: &Kthread<Q>,
        guard: &KthreadGuard<'_>,
        budget: usize,
    ) -> SoftirqWork {
        k.assert_lock_held(guard);

        let budget = budget.min(SOFTIRQ_MAX_BUDGET);
        let mut w = SoftirqWork::new(k.id());

        for _ in 0..budget {
            let Some(cmd) = k.rxq().try_recv() else {
                break;
            };

            match cmd.cmd() {
                Some(RxCmd::NetRecv) => {
                    let ptr = ShmPtr::new(cmd.payload);
                    let Some(buf) = self.region.resolve(ptr, self.config.rx_buf_len) else {
                        panic!(
                            "softirq: kthread {:?} RX offset {:#x} outside shared region",
                            k.id(),
                            ptr.raw()
                        );
                    };
                    push_bounded(&mut w.recv, buf);
                }
                Some(RxCmd::NetComplete) => {
                    push_bounded(&mut w.compl, MbufRef::from_raw(cmd.payload));
                }
                None => {
                    self.stats.inc_invalid_cmds();
                    error_ratelimited!(self.invalid_cmd_log, "net: invalid RXQ cmd '{}'", cmd.tag);
                }
            }
        }

        let left = budget - (w.recv.len() + w.compl.len());
        w.timer_budget = left;

        if left > 0 {
            self.storage.proc_completions(k.id(), left, &mut w.storage);
            // Harvested completions are already gone from the backend
            if w.storage.len() > left {
                log::warn!(
                    "softirq: storage harvested {} completions with budget {}",
                    w.storage.len(),
                    left
                );
            }
        }

        w
    }

    /// Carry out a gathered batch
    ///
    /// Needs no lock. Order: free completed mbufs, deliver received packets in
    /// one batch, run expired timers (re-checked now, since a deferred batch
    /// may run well after it was gathered), then wake storage threads.
    pub fn execute(&self, w: SoftirqWork) {
        let SoftirqWork {
            k,
            recv,
            compl,
            storage,
            timer_budget,
        } = w;

        let compl_cnt = compl.len();
        for mbuf in compl {
            self.mbufs.free(mbuf);
        }
        self.stats.add_tx_completions(compl_cnt);

        if !recv.is_empty() {
            self.net.rx_batch(&recv);
            self.stats.add_rx_packets(recv.len());
        }

        let timers = self.timers.needed(k);
        if timers {
            self.timers.softirq(k, timer_budget);
            self.stats.inc_timer_runs();
        }

        for &th in &storage {
            self.sched.thread_ready(th);
        }
        self.stats.add_storage_wakeups(storage.len());

        log::trace!(
            "softirq: kthread {:?} freed {} rx {} timers {} woke {}",
            k,
            compl_cnt,
            recv.len(),
            timers,
            storage.len()
        );
    }
}
