// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Direct userspace access (`--target=Direct`).
//!
//! # Platform Support
//!
//! ## Linux
//! CSRs are reached by mapping BAR0 through
//! `/sys/bus/pci/devices/<addr>/resource0`. Workspaces are anonymous
//! hugepage mappings, locked in memory, whose physical address is read from
//! `/proc/self/pagemap`. Reading physical frame numbers requires
//! `CAP_SYS_ADMIN`. A hugepage is physically contiguous, so one lookup per
//! region is enough.
//!
//! Regions up to 2 MiB use a 2 MiB page; larger ones (the 4 MiB DSM, big
//! input buffers) use a 1 GiB page. The corresponding hugepage pools must be
//! reserved beforehand, e.g. through `/sys/kernel/mm/hugepages/`.
//!
//! ## Other platforms
//! Opening a device returns `CciError::PlatformNotSupported`.

use crate::config::Target;
use crate::device::{CciDevice, DeviceFactory};
use crate::error::CciResult;

#[cfg(target_os = "linux")]
use crate::error::CciError;

/// Sysfs base path for PCI devices (Linux only).
#[cfg(target_os = "linux")]
const SYSFS_PCI_PATH: &str = "/sys/bus/pci/devices";

/// Intel PCI vendor id.
pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// PCI device ids of Intel CCI-attached FPGA accelerators.
pub const KNOWN_AFU_DEVICE_IDS: [u16; 5] = [0xbcbc, 0xbcbd, 0xbcc0, 0x09c4, 0x09c5];

/// 2 MiB hugepage.
pub const HUGE_PAGE_2M: usize = 2 * 1024 * 1024;

/// 1 GiB hugepage.
pub const HUGE_PAGE_1G: usize = 1024 * 1024 * 1024;

/// Hugepage size used for a region of `len` bytes, if any fits.
pub fn huge_page_size_for(len: usize) -> Option<usize> {
    match len {
        0 => None,
        l if l <= HUGE_PAGE_2M => Some(HUGE_PAGE_2M),
        l if l <= HUGE_PAGE_1G => Some(HUGE_PAGE_1G),
        _ => None,
    }
}

/// Decode one `/proc/<pid>/pagemap` entry into a page frame number.
///
/// Bit 63 is "page present", bits 0..=54 hold the PFN. An unprivileged
/// reader sees a PFN of zero.
pub fn pagemap_pfn(entry: u64) -> Option<u64> {
    const PRESENT: u64 = 1 << 63;
    const PFN_MASK: u64 = (1 << 55) - 1;
    if entry & PRESENT == 0 {
        return None;
    }
    match entry & PFN_MASK {
        0 => None,
        pfn => Some(pfn),
    }
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use crate::csr::RegisterInterface;
    use crate::mmio::MmioRegion;
    use crate::workspace::{PinnedRegion, RegionBacking, WorkspaceAllocator};
    use std::fs::{self, File};
    use std::os::unix::fs::FileExt;
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    /// Scan sysfs for the first known accelerator.
    pub fn discover_afu() -> CciResult<String> {
        let sysfs_path = Path::new(SYSFS_PCI_PATH);
        if !sysfs_path.exists() {
            return Err(CciError::PlatformNotSupported);
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(sysfs_path)? {
            let entry = entry?;
            let path = entry.path();
            let vendor = read_sysfs_hex(&path.join("vendor"));
            let device = read_sysfs_hex(&path.join("device"));
            if let (Ok(vendor), Ok(device)) = (vendor, device) {
                if vendor == INTEL_VENDOR_ID && KNOWN_AFU_DEVICE_IDS.contains(&device) {
                    candidates.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }

        candidates.sort();
        let address = candidates.into_iter().next().ok_or(CciError::NoDeviceFound)?;
        log::info!("found CCI accelerator at {}", address);
        Ok(address)
    }

    fn read_sysfs_hex(path: &Path) -> CciResult<u16> {
        let s = fs::read_to_string(path)?;
        let s = s.trim();
        u16::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|_| CciError::InvalidArgument(format!("invalid id in sysfs: {}", s)))
    }

    /// BAR0 mapping holding the CSRs.
    #[derive(Debug)]
    struct BarMapping {
        _file: File,
        region: MmioRegion,
    }

    impl BarMapping {
        fn open(path: &Path) -> CciResult<Self> {
            let file = File::options()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        CciError::PermissionDenied(path.display().to_string())
                    } else {
                        CciError::Io(e)
                    }
                })?;

            let size = file.metadata()?.len() as usize;
            if size == 0 {
                return Err(CciError::MmapFailed(format!(
                    "{} has zero size (device not enabled?)",
                    path.display()
                )));
            }

            // SAFETY: fd is open, size is non-zero; the mapping is released in Drop.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(CciError::MmapFailed(format!(
                    "mmap failed for {}: {}",
                    path.display(),
                    std::io::Error::last_os_error()
                )));
            }

            // SAFETY: ptr maps size bytes until munmap in Drop.
            let region = match unsafe { MmioRegion::from_raw_parts(ptr as *mut u8, size) } {
                Ok(region) => region,
                Err(e) => {
                    // SAFETY: mapped above with this size.
                    unsafe { libc::munmap(ptr, size) };
                    return Err(e);
                }
            };

            log::debug!("mapped {} ({} bytes)", path.display(), size);
            Ok(Self {
                _file: file,
                region,
            })
        }
    }

    impl Drop for BarMapping {
        fn drop(&mut self) {
            // SAFETY: region covers exactly the mapping created in open().
            unsafe {
                libc::munmap(self.region.as_ptr() as *mut libc::c_void, self.region.len());
            }
        }
    }

    /// Locked hugepage mapping with a resolved physical address.
    #[derive(Debug)]
    struct HugePageRegion {
        region: MmioRegion,
        map_len: usize,
        phys: u64,
    }

    impl HugePageRegion {
        fn allocate(len: usize) -> CciResult<Self> {
            let failed = |reason: String| CciError::AllocationFailed { size: len, reason };

            let page = huge_page_size_for(len)
                .ok_or_else(|| failed("no hugepage size fits the request".to_string()))?;
            let size_flag = if page == HUGE_PAGE_2M {
                libc::MAP_HUGE_2MB
            } else {
                libc::MAP_HUGE_1GB
            };

            // SAFETY: anonymous mapping, no fd; released by the guard or in Drop.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    page,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | size_flag,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(failed(format!(
                    "hugepage pool exhausted: {}",
                    std::io::Error::last_os_error()
                )));
            }

            let mapping = scopeguard::guard(ptr, |ptr| {
                // SAFETY: ptr maps `page` bytes; only reached on an error path.
                unsafe { libc::munmap(ptr, page) };
            });

            // SAFETY: [ptr, ptr+page) was just mapped.
            if unsafe { libc::mlock(*mapping, page) } != 0 {
                return Err(failed(format!(
                    "mlock failed: {}",
                    std::io::Error::last_os_error()
                )));
            }

            // Touch the page so it is faulted in before the pagemap lookup.
            // SAFETY: in-bounds write to the fresh mapping.
            unsafe { std::ptr::write_volatile(*mapping as *mut u8, 0) };

            let phys = physical_address(*mapping as usize)?;

            // SAFETY: mapping is valid for page >= len bytes.
            let region = unsafe { MmioRegion::from_raw_parts(*mapping as *mut u8, len)? };
            let _ = scopeguard::ScopeGuard::into_inner(mapping);

            Ok(Self {
                region,
                map_len: page,
                phys,
            })
        }
    }

    impl RegionBacking for HugePageRegion {
        fn region(&self) -> &MmioRegion {
            &self.region
        }

        fn phys_addr(&self) -> u64 {
            self.phys
        }
    }

    impl Drop for HugePageRegion {
        fn drop(&mut self) {
            // SAFETY: region base is the start of a map_len-byte mapping from allocate().
            unsafe {
                libc::munlock(self.region.as_ptr() as *const libc::c_void, self.map_len);
                libc::munmap(self.region.as_ptr() as *mut libc::c_void, self.map_len);
            }
        }
    }

    fn physical_address(vaddr: usize) -> CciResult<u64> {
        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let pagemap = File::open("/proc/self/pagemap")?;

        let mut entry = [0u8; 8];
        pagemap.read_exact_at(&mut entry, (vaddr / page_size * 8) as u64)?;
        let pfn = pagemap_pfn(u64::from_le_bytes(entry)).ok_or_else(|| {
            CciError::PermissionDenied(
                "physical frame numbers are hidden; CAP_SYS_ADMIN is required".to_string(),
            )
        })?;

        Ok(pfn * page_size as u64 + (vaddr % page_size) as u64)
    }

    /// Device handle over a PCIe-attached AFU.
    #[derive(Debug)]
    pub struct DirectDevice {
        pci_address: String,
        bar0: BarMapping,
    }

    impl DirectDevice {
        /// Open the AFU at `pci_address` (e.g. `0000:5e:00.0`).
        ///
        /// # Errors
        ///
        /// Returns an error if BAR0 cannot be opened or mapped.
        pub fn open(pci_address: &str) -> CciResult<Self> {
            let path: PathBuf = Path::new(SYSFS_PCI_PATH)
                .join(pci_address)
                .join("resource0");
            let bar0 = BarMapping::open(&path)?;
            log::info!("opened CCI accelerator {}", pci_address);
            Ok(Self {
                pci_address: pci_address.to_string(),
                bar0,
            })
        }

        /// PCI address of the device.
        pub fn pci_address(&self) -> &str {
            &self.pci_address
        }
    }

    // Offsets outside BAR0 panic in MmioRegion.
    impl RegisterInterface for DirectDevice {
        fn read_csr(&self, offset: u32) -> u32 {
            self.bar0.region.load_u32(offset as usize)
        }

        fn write_csr(&self, offset: u32, value: u32) {
            self.bar0.region.store_u32(offset as usize, value);
        }
    }

    impl WorkspaceAllocator for DirectDevice {
        fn allocate_region(&self, len: usize) -> CciResult<PinnedRegion> {
            PinnedRegion::new(HugePageRegion::allocate(len)?)
        }

        fn free_region(&self, region: PinnedRegion) {
            drop(region);
        }
    }

    impl CciDevice for DirectDevice {
        fn target(&self) -> Target {
            Target::Direct
        }
    }
}

// ============================================================================
// Unsupported Platform Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub_impl {
    use super::*;
    use crate::error::CciError;

    pub fn discover_afu() -> CciResult<String> {
        Err(CciError::PlatformNotSupported)
    }

    /// Placeholder; never constructed on this platform.
    #[derive(Debug)]
    pub struct DirectDevice {
        _private: (),
    }

    impl DirectDevice {
        /// Direct access requires Linux.
        pub fn open(_pci_address: &str) -> CciResult<Self> {
            Err(CciError::PlatformNotSupported)
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::{discover_afu, DirectDevice};

#[cfg(not(target_os = "linux"))]
pub use stub_impl::{discover_afu, DirectDevice};

/// Factory for [`DirectDevice`] handles.
#[derive(Debug, Clone, Default)]
pub struct DirectDeviceFactory {
    pci_address: Option<String>,
}

impl DirectDeviceFactory {
    /// Factory for the device at `pci_address`, or the first one discovered.
    pub fn new(pci_address: Option<String>) -> Self {
        Self { pci_address }
    }
}

impl DeviceFactory for DirectDeviceFactory {
    fn target(&self) -> Target {
        Target::Direct
    }

    #[cfg(target_os = "linux")]
    fn create_device(&self) -> CciResult<Box<dyn CciDevice>> {
        let address = match &self.pci_address {
            Some(address) => address.clone(),
            None => discover_afu()?,
        };
        Ok(Box::new(DirectDevice::open(&address)?))
    }

    #[cfg(not(target_os = "linux"))]
    fn create_device(&self) -> CciResult<Box<dyn CciDevice>> {
        Err(crate::error::CciError::PlatformNotSupported)
    }
}
