//! # Softirq Collaborator Traits
//!
//! The softirq pass sits at the bottom of the runtime and drives subsystems it
//! does not own: the network stack, mbuf reclamation, the timer wheel, the
//! storage completion poller and the scheduler. Each is reached through a
//! trait so the dispatcher can be exercised against recording mocks.
//!
//! ## Testing Strategy
//!
//! Production runtimes hand the dispatcher their real subsystems. Unit tests
//! use [`mock::MockRuntime`], which implements every trait and records each
//! call into one ordered journal, so tests can check both what happened and
//! in which order.

use crate::kthread::{KthreadId, ThreadId};
use crate::lrpc::Command;
use crate::shm::{MbufRef, RxBuf, ShmPtr};
use crate::SOFTIRQ_MAX_BUDGET;

/// Threads made runnable by storage completions, at most one per budget unit
pub type ThreadBatch = heapless::Vec<ThreadId, SOFTIRQ_MAX_BUDGET>;

/// Consumer side of a kthread's RX command queue
///
/// Both operations are non-blocking.
pub trait CommandQueue {
    /// Take the next command, `None` if the queue is empty
    fn try_recv(&self) -> Option<Command>;

    /// Check if no commands are waiting
    fn is_empty(&self) -> bool;
}

/// Region RX offsets are resolved against
pub trait RxRegion: Send + Sync {
    /// Resolve `len` bytes at `ptr`, `None` if the range is invalid
    fn resolve(&self, ptr: ShmPtr, len: usize) -> Option<RxBuf>;
}

/// Network stack receive path
pub trait NetStack: Send + Sync {
    /// Ingest received packets, in the order given
    fn rx_batch(&self, bufs: &[RxBuf]);
}

/// Transmit buffer reclamation
pub trait MbufOps: Send + Sync {
    /// Free a transmitted buffer. Freeing twice is a bug.
    fn free(&self, mbuf: MbufRef);
}

/// Timer wheel hooks
pub trait TimerOps: Send + Sync {
    /// Check if `k` has expired timers to run
    fn needed(&self, k: KthreadId) -> bool;

    /// Run expired timers on `k`, at most `budget` of them
    fn softirq(&self, k: KthreadId, budget: usize);
}

/// Storage completion poller
pub trait StorageOps: Send + Sync {
    /// Check if `k` has storage completions waiting
    fn available(&self, k: KthreadId) -> bool;

    /// Harvest up to `budget` completions, pushing the threads they unblock
    /// onto `out`. Returns the number harvested.
    fn proc_completions(&self, k: KthreadId, budget: usize, out: &mut ThreadBatch) -> usize;
}

/// Scheduler hook used to wake threads
pub trait SchedulerOps: Send + Sync {
    /// Mark a thread runnable
    fn thread_ready(&self, th: ThreadId);
}

/// Storage backend for runtimes built without one
///
/// Never reports completions, so the storage leg of a pass costs one
/// predictable branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStorage;

impl StorageOps for NoStorage {
    #[inline]
    fn available(&self, _k: KthreadId) -> bool {
        false
    }

    #[inline]
    fn proc_completions(&self, _k: KthreadId, _budget: usize, _out: &mut ThreadBatch) -> usize {
        0
    }
}

// ============================================================================
// Test Mock Implementations
// ============================================================================
