//! Registered buffer pool.
//!
//! One contiguous, anonymous mapping of `slot_count × slot_size` bytes,
//! allocated once and never resized. Slots are addressed by index or by byte
//! offset from the start of the region; the region itself is handed to the
//! stack exactly once for registration.
//!
//! ## Ownership
//!
//! The pool is shared (`Arc`) between the reactor and the stack because the
//! stack writes received datagrams into, and reads outgoing payloads from, the
//! same memory. Exclusive access to a slot is not tracked here: it follows
//! from the descriptor state machine in [`crate::descriptor`]. A slot belongs
//! to the stack while its descriptor is in flight and to the reactor
//! otherwise, which is why the byte accessors are `unsafe`.

use crate::error::{Result, RioError};
use std::io::Error;
use std::os::raw::c_void;
use std::ptr::{self, NonNull};

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE;

#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

/// Fixed-size slot region
pub struct BufferPool {
    /// Start of the mapped region
    base: NonNull<u8>,

    /// Bytes per slot
    slot_size: usize,

    /// Number of slots
    slot_count: usize,
}

impl BufferPool {
    /// Allocate a zeroed region of `slot_size × slot_count` bytes
    ///
    /// # Errors
    ///
    /// Returns `RioError::Allocation` if the size overflows, is zero, or the
    /// mapping fails.
    pub fn new(slot_size: usize, slot_count: usize) -> Result<Self> {
        let size = slot_size
            .checked_mul(slot_count)
            .filter(|&size| size > 0)
            .ok_or_else(|| RioError::Allocation {
                size: slot_size.saturating_mul(slot_count),
                source: Error::from_raw_os_error(libc::EINVAL),
            })?;

        // SAFETY: anonymous private mapping with no fixed address; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(RioError::Allocation {
                size,
                source: Error::last_os_error(),
            });
        }

        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| RioError::Allocation {
            size,
            source: Error::from_raw_os_error(libc::ENOMEM),
        })?;

        tracing::debug!(
            "Allocated buffer pool: {} slots x {} bytes ({} bytes)",
            slot_count,
            slot_size,
            size
        );

        Ok(Self {
            base,
            slot_size,
            slot_count,
        })
    }

    /// Bytes per slot
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Total region size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.slot_size * self.slot_count
    }

    /// Always false; a pool cannot be created empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start of the region, for registration with the stack
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Byte offset of slot `index`
    #[must_use]
    pub fn slot_offset(&self, index: usize) -> Option<u32> {
        if index >= self.slot_count {
            return None;
        }
        u32::try_from(index * self.slot_size).ok()
    }

    /// Whether `[offset, offset + len)` lies inside a single slot
    #[must_use]
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        let offset = offset as usize;
        let len = len as usize;
        offset % self.slot_size == 0 && offset < self.len() && len <= self.slot_size
    }

    /// Address of `offset` within the region
    pub(crate) fn ptr_at(&self, offset: u32) -> Option<*mut u8> {
        if (offset as usize) >= self.len() {
            return None;
        }
        // SAFETY: offset is bounds-checked against the mapped length above.
        Some(unsafe { self.base.as_ptr().add(offset as usize) })
    }

    /// Shared view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: nobody, including the stack, may write to
    /// it while the returned slice is alive.
    pub unsafe fn slice(&self, offset: u32, len: u32) -> Option<&[u8]> {
        if !self.contains(offset, len) {
            return None;
        }
        // SAFETY: bounds checked by `contains`; exclusivity guaranteed by caller.
        unsafe {
            Some(std::slice::from_raw_parts(
                self.base.as_ptr().add(offset as usize),
                len as usize,
            ))
        }
    }

    /// Mutable view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot exclusively for the lifetime of the
    /// returned slice: no other reference to it may exist and the stack must
    /// not have an operation outstanding on it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: u32, len: u32) -> Option<&mut [u8]> {
        if !self.contains(offset, len) {
            return None;
        }
        // SAFETY: bounds checked by `contains`; exclusivity guaranteed by caller.
        unsafe {
            Some(std::slice::from_raw_parts_mut(
                self.base.as_ptr().add(offset as usize),
                len as usize,
            ))
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // SAFETY: unmapping the region obtained from mmap with the same length.
        unsafe {
            libc::munmap(self.base.as_ptr().cast::<c_void>(), self.len());
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("base", &self.base)
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

// SAFETY: the pool is a plain memory region; slot exclusivity is enforced by
// the descriptor table, not by the pool.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}
