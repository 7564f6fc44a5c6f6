// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Typed view over memory shared with the accelerator.
//!
//! Every host access to CSR space or to a workspace goes through
//! [`MmioRegion`]. Loads and stores are volatile and 32 bits wide, so the
//! compiler can neither cache a value across poll iterations nor merge,
//! split or elide a register write.
//!
//! # Ordering
//!
//! Volatile accesses are not reordered against each other by the compiler,
//! but they carry no inter-thread ordering. Two points need explicit fences:
//!
//! - after observing a device flag, call [`MmioRegion::acquire`] before
//!   reading the data the flag publishes (identifier words, result word);
//! - before publishing a flag from a producer, call [`MmioRegion::release`].

use crate::error::{CciError, CciResult};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// Width of one register or status word in bytes.
pub const WORD_BYTES: usize = 4;

/// Bounds-checked volatile window over mapped memory.
///
/// The view does not own the mapping. Whoever constructs it keeps the
/// underlying memory alive for as long as the view exists.
pub struct MmioRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl std::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: the region only exposes volatile word accesses through &self; the
// memory is device-shared and not tied to any thread.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for reads and writes of `len` bytes for the
    ///   whole lifetime of the returned view
    /// - `ptr` must be at least 4-byte aligned
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> CciResult<Self> {
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| CciError::InvalidArgument("null region pointer".to_string()))?;
        if ptr.as_ptr() as usize % WORD_BYTES != 0 {
            return Err(CciError::InvalidArgument(format!(
                "region at {:p} is not word aligned",
                ptr
            )));
        }
        Ok(Self { ptr, len })
    }

    /// Host-virtual base address.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of whole 32-bit words in the region.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.len / WORD_BYTES
    }

    #[inline]
    fn word_ptr(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % WORD_BYTES == 0 && offset + WORD_BYTES <= self.len,
            "word offset {:#x} outside region of {:#x} bytes",
            offset,
            self.len
        );
        // SAFETY: offset checked against len above.
        unsafe { self.ptr.as_ptr().add(offset) as *mut u32 }
    }

    /// Volatile 32-bit load at byte `offset`.
    ///
    /// Every call issues a fresh read of memory.
    #[inline]
    pub fn load_u32(&self, offset: usize) -> u32 {
        // SAFETY: in-bounds and aligned; validity guaranteed by constructor contract.
        unsafe { std::ptr::read_volatile(self.word_ptr(offset)) }
    }

    /// Volatile 32-bit store at byte `offset`.
    #[inline]
    pub fn store_u32(&self, offset: usize, value: u32) {
        // SAFETY: in-bounds and aligned; validity guaranteed by constructor contract.
        unsafe { std::ptr::write_volatile(self.word_ptr(offset), value) }
    }

    /// Zero the whole region, then fence so the device observes the zeros
    /// before anything the host publishes afterwards.
    pub fn fill_zero(&self) {
        // SAFETY: [ptr, ptr+len) is valid for writes per constructor contract.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), 0, self.len) };
        fence(Ordering::SeqCst);
    }

    /// Acquire fence: reads after this see everything published before the
    /// flag that was just observed.
    #[inline]
    pub fn acquire(&self) {
        fence(Ordering::Acquire);
    }

    /// Release fence: writes before this are visible before any flag
    /// stored afterwards.
    #[inline]
    pub fn release(&self) {
        fence(Ordering::Release);
    }
}
