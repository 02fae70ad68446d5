//! Deferred softirq threads

use core::sync::atomic::{AtomicUsize, Ordering};

use super::{Softirq, SoftirqWork};
use crate::kthread::KthreadId;

/// Scheduling state of a softirq thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Gathered and waiting for the scheduler
    Runnable,
    /// Executing its batch
    Running,
}

/// One slot of the dispatcher's thread budget, returned on drop
pub(crate) struct ThreadPermit<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> ThreadPermit<'a> {
    /// Wrap a slot already counted in `in_flight`
    pub(crate) fn new(in_flight: &'a AtomicUsize) -> Self {
        Self { in_flight }
    }
}

impl Drop for ThreadPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A softirq pass packaged for the scheduler
///
/// Carries its batch inline. [`run`](Self::run) consumes the thread, so it
/// executes at most once; dropping it unrun discards the batch and returns
/// the thread permit.
pub struct SoftirqThread<'a> {
    softirq: &'a Softirq<'a>,
    _permit: ThreadPermit<'a>,
    work: SoftirqWork,
    state: ThreadState,
}

impl<'a> SoftirqThread<'a> {
    pub(super) fn new(softirq: &'a Softirq<'a>, permit: ThreadPermit<'a>, work: SoftirqWork) -> Self {
        Self {
            softirq,
            _permit: permit,
            work,
            state: ThreadState::Runnable,
        }
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Kthread the batch came from
    pub fn kthread(&self) -> KthreadId {
        self.work.kthread()
    }

    /// The gathered batch
    pub fn work(&self) -> &SoftirqWork {
        &self.work
    }

    /// Thread body: execute the batch
    pub fn run(mut self) {
        debug_assert_eq!(self.state, ThreadState::Runnable);
        self.state = ThreadState::Running;
        log::trace!("softirq: thread for kthread {:?} running", self.work.kthread());

        // The permit is held until the batch has executed
        self.softirq.execute(self.work);
    }
}
