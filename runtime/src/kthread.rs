//! Per-core kthread state
//!
//! A kthread is one runtime worker pinned to one core. It owns the RX command
//! ring its producers feed and the spinlock that serializes consumers of that
//! ring. Callers thread the kthread through explicitly instead of looking it up
//! from ambient per-CPU state, so lock obligations are visible at call sites.

use spin::{Mutex, MutexGuard};

use crate::lrpc::{Lrpc, LrpcError};
use crate::traits::CommandQueue;

/// Kthread identifier (one per core)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KthreadId(pub u32);

/// Identifier of a schedulable user thread
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// Wrap a raw thread id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw thread id
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Per-core worker state
pub struct Kthread<Q = Lrpc> {
    id: KthreadId,
    rxq: Q,
    lock: Mutex<()>,
}

/// Proof that a kthread's lock is held
///
/// Dropping the guard releases the lock.
pub struct KthreadGuard<'a> {
    id: KthreadId,
    _guard: MutexGuard<'a, ()>,
}

impl KthreadGuard<'_> {
    /// Kthread whose lock this guard holds
    pub fn kthread(&self) -> KthreadId {
        self.id
    }
}

impl Kthread<Lrpc> {
    /// Create a kthread with a fresh RX ring of `ring_size` slots
    pub fn with_ring(id: KthreadId, ring_size: u32) -> Result<Self, LrpcError> {
        Ok(Self::new(id, Lrpc::new(ring_size)?))
    }
}

impl<Q: CommandQueue> Kthread<Q> {
    /// Create a kthread around an existing RX queue
    pub fn new(id: KthreadId, rxq: Q) -> Self {
        Self {
            id,
            rxq,
            lock: Mutex::new(()),
        }
    }

    /// Kthread identifier
    pub fn id(&self) -> KthreadId {
        self.id
    }

    /// RX command queue
    ///
    /// Producers may use it freely; consuming requires the kthread lock.
    pub fn rxq(&self) -> &Q {
        &self.rxq
    }

    /// Acquire the kthread lock, spinning until it is free
    pub fn lock(&self) -> KthreadGuard<'_> {
        KthreadGuard {
            id: self.id,
            _guard: self.lock.lock(),
        }
    }

    /// Acquire the kthread lock without spinning
    pub fn try_lock(&self) -> Option<KthreadGuard<'_>> {
        self.lock.try_lock().map(|guard| KthreadGuard {
            id: self.id,
            _guard: guard,
        })
    }

    /// Check if the kthread lock is currently held by anyone
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Debug-build check that `guard` is this kthread's lock
    #[inline]
    pub(crate) fn assert_lock_held(&self, guard: &KthreadGuard<'_>) {
        debug_assert_eq!(guard.id, self.id, "guard belongs to another kthread");
        debug_assert!(self.is_locked(), "kthread {:?} lock not held", self.id);
    }
}
