//! Shared RX Region
//!
//! The NIC poller writes received packets into a region shared with every
//! kthread and announces them by offset. Resolving an offset hands the
//! consumer an exclusively-owned [`RxBuf`]; the producer must not touch the
//! bytes again after enqueuing the offset.

use core::ptr::NonNull;
use thiserror::Error;

use crate::traits::RxRegion;

/// An offset into a shared region
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShmPtr(u64);

impl ShmPtr {
    /// Wrap a raw offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Raw offset
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to a transmit buffer awaiting reclamation
///
/// Deliberately not `Clone`: each handle is freed exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MbufRef(u64);

impl MbufRef {
    /// Adopt the payload word of a transmit completion
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// A received packet, owned by the batch until delivered
#[derive(Debug, PartialEq, Eq)]
pub struct RxBuf {
    ptr: NonNull<u8>,
    len: usize,
    offset: ShmPtr,
}

// SAFETY: ownership of the bytes moves to the consumer when the offset is
// resolved, and RxBuf is not Clone, so only one holder can reach them.
unsafe impl Send for RxBuf {}

impl RxBuf {
    /// Start of the packet
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length the buffer was resolved with
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check for a zero-length buffer
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset the buffer was announced with
    pub fn offset(&self) -> ShmPtr {
        self.offset
    }

    /// View the packet bytes
    ///
    /// # Safety
    ///
    /// The region backing this buffer must still be mapped.
    pub unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: resolve() checked the range against the region; the caller
        // guarantees the region outlives this borrow.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Shared memory errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShmError {
    /// Region size of zero
    #[error("Invalid region size")]
    InvalidSize,
}

/// A contiguous shared region
pub struct ShmRegion {
    base: NonNull<u8>,
    len: usize,
    owned: bool,
}

// SAFETY: the region is plain memory shared by design; per-buffer exclusivity
// is carried by RxBuf ownership.
unsafe impl Send for ShmRegion {}
// SAFETY: see above; resolve() only computes addresses.
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Allocate a zeroed region of `len` bytes
    pub fn new(len: usize) -> Result<Self, ShmError> {
        if len == 0 {
            return Err(ShmError::InvalidSize);
        }

        let mem = vec![0u8; len].into_boxed_slice();
        let base = NonNull::from(Box::leak(mem)).cast::<u8>();

        log::debug!("Created shared RX region: {} bytes", len);

        Ok(Self {
            base,
            len,
            owned: true,
        })
    }

    /// Adopt an existing mapping
    ///
    /// # Safety
    ///
    /// `base` must point to `len` bytes that stay mapped for the lifetime of
    /// the region and of every buffer resolved from it.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self {
            base,
            len,
            owned: false,
        }
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check for an empty region (only possible for adopted mappings)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Turn an offset into a live buffer of `len` bytes
    ///
    /// Returns `None` when `[ptr, ptr + len)` does not fit in the region.
    pub fn resolve(&self, ptr: ShmPtr, len: usize) -> Option<RxBuf> {
        let end = ptr.raw().checked_add(len as u64)?;
        if end > self.len as u64 {
            return None;
        }

        // SAFETY: offset + len is within the region, so the address is in
        // bounds of the allocation and non-null.
        let addr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(ptr.raw() as usize)) };

        Some(RxBuf {
            ptr: addr,
            len,
            offset: ptr,
        })
    }
}

impl RxRegion for ShmRegion {
    fn resolve(&self, ptr: ShmPtr, len: usize) -> Option<RxBuf> {
        ShmRegion::resolve(self, ptr, len)
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.owned {
            let slice = core::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.len);
            // SAFETY: base/len came from Box::leak in new() and are freed once.
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}
