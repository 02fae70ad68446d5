//! RX Command Ring
//!
//! Lock-free single-producer / single-consumer ring carrying `(tag, payload)`
//! commands into a kthread. The producer is the NIC poller or a completion
//! path; the consumer is the softirq gather phase, serialized by the kthread
//! lock.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

use crate::shm::{MbufRef, ShmPtr};
use crate::traits::CommandQueue;

/// Largest ring a kthread may be created with
pub const MAX_RING_SIZE: u32 = 1 << 16;

/// RX command tags
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxCmd {
    /// A packet landed in the shared RX region; payload is its offset
    NetRecv = 0,
    /// A transmit finished; payload is the mbuf to free
    NetComplete = 1,
}

impl RxCmd {
    /// Decode a raw tag, `None` if it isn't a known command
    pub fn from_raw(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::NetRecv),
            1 => Some(Self::NetComplete),
            _ => None,
        }
    }
}

/// A command as it travels through the ring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    /// Raw command tag
    pub tag: u64,
    /// Tag-specific payload word
    pub payload: u64,
}

impl Command {
    /// Build a command from raw parts
    pub const fn new(tag: u64, payload: u64) -> Self {
        Self { tag, payload }
    }

    /// Announce a received packet at `ptr`
    pub const fn net_recv(ptr: ShmPtr) -> Self {
        Self::new(RxCmd::NetRecv as u64, ptr.raw())
    }

    /// Hand back a transmitted mbuf
    pub const fn net_complete(mbuf: MbufRef) -> Self {
        Self::new(RxCmd::NetComplete as u64, mbuf.raw())
    }

    /// Decoded tag
    pub fn cmd(&self) -> Option<RxCmd> {
        RxCmd::from_raw(self.tag)
    }
}

/// Ring errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LrpcError {
    /// Capacity is zero, not a power of two, or above [`MAX_RING_SIZE`]
    #[error("Invalid ring capacity: {0}")]
    InvalidCapacity(u32),
    /// No free slot for the command
    #[error("Ring full")]
    Full,
}

struct Slot {
    tag: AtomicU64,
    payload: AtomicU64,
}

/// Per-kthread RX command ring
pub struct Lrpc {
    /// Consumer index (softirq reads, increments after taking an entry)
    head: AtomicU32,
    /// Producer index (producer writes, increments after publishing)
    tail: AtomicU32,
    /// Ring mask (size - 1)
    mask: u32,
    slots: Box<[Slot]>,
}

impl Lrpc {
    /// Create a ring with `capacity` slots
    pub fn new(capacity: u32) -> Result<Self, LrpcError> {
        if !capacity.is_power_of_two() || capacity > MAX_RING_SIZE {
            return Err(LrpcError::InvalidCapacity(capacity));
        }

        let slots = (0..capacity)
            .map(|_| Slot {
                tag: AtomicU64::new(0),
                payload: AtomicU64::new(0),
            })
            .collect();

        Ok(Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            mask: capacity - 1,
            slots,
        })
    }

    /// Publish a command (producer side)
    ///
    /// The ring has a single producer. Callers sending from more than one
    /// thread must serialize their sends; two unsynchronized producers can
    /// claim the same slot and one command is lost.
    pub fn send(&self, cmd: Command) -> Result<(), LrpcError> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);

        if tail.wrapping_sub(head) > self.mask {
            return Err(LrpcError::Full);
        }

        let slot = &self.slots[(tail & self.mask) as usize];
        slot.tag.store(cmd.tag, Ordering::Relaxed);
        slot.payload.store(cmd.payload, Ordering::Relaxed);

        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Take the oldest command (consumer side)
    pub fn recv(&self) -> Option<Command> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &self.slots[(head & self.mask) as usize];
        let cmd = Command::new(
            slot.tag.load(Ordering::Relaxed),
            slot.payload.load(Ordering::Relaxed),
        );

        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(cmd)
    }

    /// Number of commands waiting
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    /// Check if no commands are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl CommandQueue for Lrpc {
    fn try_recv(&self) -> Option<Command> {
        self.recv()
    }

    fn is_empty(&self) -> bool {
        Lrpc::is_empty(self)
    }
}
