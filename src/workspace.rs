// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Host/device shared workspaces.
//!
//! A workspace is a physically contiguous, cache-line-aligned region with a
//! host-virtual address (for the host) and a device-physical address (for
//! the AFU's address registers).
//!
//! [`Workspace`] is a scoped handle: it borrows the allocator that produced
//! it and hands the region back exactly once when dropped. Because it
//! borrows the device, the compiler rejects any attempt to destroy the
//! device while a workspace is still alive.

use crate::csr::CACHE_LINE_BYTES;
use crate::error::{CciError, CciResult};
use crate::mmio::MmioRegion;

/// What a workspace is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceRole {
    /// Device status memory.
    DeviceStatusMemory,
    /// Kernel input buffer.
    Input,
    /// Kernel output buffer.
    Output,
}

impl std::fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceStatusMemory => write!(f, "DSM"),
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Backend-specific storage behind a pinned region.
///
/// Dropping the backing releases the memory.
pub trait RegionBacking: Send + std::fmt::Debug {
    /// Host view of the memory.
    fn region(&self) -> &MmioRegion;

    /// Device-physical base address.
    fn phys_addr(&self) -> u64;
}

/// A pinned, device-addressable region as returned by an allocator.
#[derive(Debug)]
pub struct PinnedRegion {
    backing: Box<dyn RegionBacking>,
}

impl PinnedRegion {
    /// Wrap a backend allocation.
    ///
    /// # Errors
    ///
    /// Returns [`CciError::AllocationFailed`] if the physical address is not
    /// cache-line aligned; such a region can never be programmed into an
    /// address register.
    pub fn new(backing: impl RegionBacking + 'static) -> CciResult<Self> {
        let phys = backing.phys_addr();
        if phys % CACHE_LINE_BYTES != 0 {
            return Err(CciError::AllocationFailed {
                size: backing.region().len(),
                reason: format!("physical address {:#x} is not cache-line aligned", phys),
            });
        }
        Ok(Self {
            backing: Box::new(backing),
        })
    }

    /// Host view of the memory.
    #[inline]
    pub fn region(&self) -> &MmioRegion {
        self.backing.region()
    }

    /// Device-physical base address.
    #[inline]
    pub fn phys_addr(&self) -> u64 {
        self.backing.phys_addr()
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.backing.region().len()
    }

    /// Returns true for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of pinned regions.
pub trait WorkspaceAllocator {
    /// Allocate `len` bytes of physically contiguous, cache-line-aligned
    /// memory.
    ///
    /// # Errors
    ///
    /// Returns [`CciError::AllocationFailed`] if the memory subsystem cannot
    /// satisfy the request.
    fn allocate_region(&self, len: usize) -> CciResult<PinnedRegion>;

    /// Release a region. Takes the region by value, so it cannot be freed
    /// twice.
    fn free_region(&self, region: PinnedRegion);
}

/// Scoped workspace handle.
#[derive(Debug)]
pub struct Workspace<'a, A: WorkspaceAllocator + ?Sized> {
    role: WorkspaceRole,
    allocator: &'a A,
    region: Option<PinnedRegion>,
}

impl<'a, A: WorkspaceAllocator + ?Sized> Workspace<'a, A> {
    /// Allocate a workspace of `len` bytes from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns [`CciError::InvalidArgument`] for `len == 0`, otherwise
    /// whatever the allocator reports.
    pub fn allocate(allocator: &'a A, role: WorkspaceRole, len: usize) -> CciResult<Self> {
        if len == 0 {
            return Err(CciError::InvalidArgument(format!(
                "{} workspace length must be non-zero",
                role
            )));
        }
        let region = allocator.allocate_region(len)?;
        log::debug!(
            "allocated {} workspace: {} bytes, virt={:p}, phys={:#x}",
            role,
            region.len(),
            region.region().as_ptr(),
            region.phys_addr()
        );
        Ok(Self {
            role,
            allocator,
            region: Some(region),
        })
    }

    fn pinned(&self) -> &PinnedRegion {
        match &self.region {
            Some(region) => region,
            // Only taken in Drop.
            None => unreachable!("workspace used after free"),
        }
    }

    /// Role of this workspace.
    pub fn role(&self) -> WorkspaceRole {
        self.role
    }

    /// Host view of the memory.
    pub fn region(&self) -> &MmioRegion {
        self.pinned().region()
    }

    /// Device-physical base address.
    pub fn phys_addr(&self) -> u64 {
        self.pinned().phys_addr()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.pinned().len()
    }

    /// Returns true for a zero-length workspace.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the workspace now rather than at end of scope.
    pub fn free(self) {
        drop(self);
    }
}

impl<A: WorkspaceAllocator + ?Sized> Drop for Workspace<'_, A> {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            log::debug!("freeing {} workspace at phys={:#x}", self.role, region.phys_addr());
            self.allocator.free_region(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct HeapBacking {
        _buf: Vec<u64>,
        region: MmioRegion,
        phys: u64,
    }

    impl HeapBacking {
        fn new(len: usize, phys: u64) -> Self {
            let mut buf = vec![0u64; len.div_ceil(8)];
            let region =
                unsafe { MmioRegion::from_raw_parts(buf.as_mut_ptr() as *mut u8, len).unwrap() };
            Self {
                _buf: buf,
                region,
                phys,
            }
        }
    }

    impl RegionBacking for HeapBacking {
        fn region(&self) -> &MmioRegion {
            &self.region
        }
        fn phys_addr(&self) -> u64 {
            self.phys
        }
    }

    #[derive(Default)]
    struct CountingAllocator {
        allocated: Cell<usize>,
        freed: Cell<usize>,
        next_phys: Cell<u64>,
    }

    impl WorkspaceAllocator for CountingAllocator {
        fn allocate_region(&self, len: usize) -> CciResult<PinnedRegion> {
            let phys = self.next_phys.get();
            self.next_phys.set(phys + 0x1000);
            self.allocated.set(self.allocated.get() + 1);
            PinnedRegion::new(HeapBacking::new(len, phys))
        }

        fn free_region(&self, region: PinnedRegion) {
            self.freed.set(self.freed.get() + 1);
            drop(region);
        }
    }

    #[test]
    fn test_freed_exactly_once_on_drop() {
        let alloc = CountingAllocator::default();
        {
            let ws = Workspace::allocate(&alloc, WorkspaceRole::Input, 256).unwrap();
            assert_eq!(ws.len(), 256);
            assert_eq!(ws.role(), WorkspaceRole::Input);
        }
        assert_eq!(alloc.allocated.get(), 1);
        assert_eq!(alloc.freed.get(), 1);
    }

    #[test]
    fn test_explicit_free() {
        let alloc = CountingAllocator::default();
        let ws = Workspace::allocate(&alloc, WorkspaceRole::Output, 64).unwrap();
        ws.free();
        assert_eq!(alloc.freed.get(), 1);
    }

    #[test]
    fn test_released_on_early_return() {
        fn fails_midway(alloc: &CountingAllocator) -> CciResult<()> {
            let _dsm = Workspace::allocate(alloc, WorkspaceRole::DeviceStatusMemory, 128)?;
            let _input = Workspace::allocate(alloc, WorkspaceRole::Input, 64)?;
            Workspace::allocate(alloc, WorkspaceRole::Output, 0)?;
            Ok(())
        }

        let alloc = CountingAllocator::default();
        assert!(matches!(
            fails_midway(&alloc),
            Err(CciError::InvalidArgument(_))
        ));
        assert_eq!(alloc.allocated.get(), 2);
        assert_eq!(alloc.freed.get(), 2);
    }

    #[test]
    fn test_rejects_unaligned_physical_address() {
        let result = PinnedRegion::new(HeapBacking::new(64, 0x1010));
        assert!(matches!(result, Err(CciError::AllocationFailed { .. })));
    }
}
