//! # Nyx Runtime
//!
//! Per-core pieces of the Nyx userspace runtime.
//!
//! ## Softirq
//!
//! Every runtime kthread owns an RX command ring fed by the NIC poller, the
//! transmit completion path and (optionally) a storage completion poller.
//! Once per scheduling quantum the kthread runs a *softirq* pass over that
//! ring:
//!
//! ```text
//!   RX ring ──► gather (kthread lock held) ──► SoftirqWork ──► execute (no lock)
//!                                                   │
//!                        ┌──────────────────────────┴───────────────┐
//!                        ▼                                          ▼
//!              softirq_run_thread()                           softirq_run()
//!        packaged as a SoftirqThread for               executed inline in the
//!            the scheduler to run later                   calling context
//! ```
//!
//! Work is bounded by a budget capped at [`SOFTIRQ_MAX_BUDGET`], and the batch
//! is stored inline so a pass never allocates.
//!
//! ## Lock hierarchy
//!
//! The kthread lock is a per-CPU level lock. It guards the consumer side of
//! the RX ring and the timer/storage query state, and is held only while a
//! batch is gathered.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod kthread;
pub mod lrpc;
pub mod ratelimit;
pub mod shm;
pub mod softirq;
pub mod stats;
pub mod traits;

pub use config::SoftirqConfig;
pub use error::{ConfigError, SoftirqError};
pub use kthread::{Kthread, KthreadGuard, KthreadId, ThreadId};
pub use lrpc::{Command, Lrpc, LrpcError, RxCmd};
pub use shm::{MbufRef, RxBuf, ShmPtr, ShmRegion};
pub use softirq::{Softirq, SoftirqBuilder, SoftirqThread, SoftirqWork, ThreadState};
pub use stats::{SoftirqStats, StatsSnapshot};
pub use traits::{
    CommandQueue, MbufOps, NetStack, NoStorage, RxRegion, SchedulerOps, StorageOps, TimerOps,
};

/// Hard cap on commands drained by a single softirq pass, and the inline
/// capacity of every batch array.
pub const SOFTIRQ_MAX_BUDGET: usize = 128;

/// Default per-pass budget
pub const RUNTIME_SOFTIRQ_BUDGET: usize = 16;

/// Length every received packet offset is resolved with
pub const MBUF_DEFAULT_LEN: usize = 2048;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
