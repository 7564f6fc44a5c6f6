// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! AFU control/status register map and the register access contract.
//!
//! Every CSR is 32 bits wide. Addresses wider than 32 bits are split over a
//! HIGH and a LOW register; the HIGH word is always written first because
//! the AFU latches the address as soon as the LOW word lands.

use crate::error::{CciError, CciResult};
use bitflags::bitflags;

/// Cache-line size used by address-valued registers.
pub const CACHE_LINE_BYTES: u64 = 64;

/// log2 of [`CACHE_LINE_BYTES`].
pub const LOG2_CACHE_LINE: u32 = 6;

/// AFU control/status registers.
///
/// Each variant's discriminant is its byte offset in CSR space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Csr {
    /// CCI control; bit 24 is the global AFU reset.
    CipuCtl = 0x280,

    /// Device status memory physical address, low word.
    DsmBaseLow = 0x1a00,

    /// Device status memory physical address, high word.
    DsmBaseHigh = 0x1a04,

    /// Input buffer physical address in cache-line units.
    SrcAddr = 0x1a20,

    /// Output buffer physical address in cache-line units.
    DstAddr = 0x1a24,

    /// Kernel control; see [`AfuCtl`].
    Ctl = 0x1a2c,

    /// Input size in cache-line units.
    DataSize = 0x1a30,

    /// Number of kernel loop iterations.
    LoopNum = 0x1a34,
}

impl Csr {
    /// All registers, ordered by offset.
    pub const ALL: [Csr; 8] = [
        Csr::CipuCtl,
        Csr::DsmBaseLow,
        Csr::DsmBaseHigh,
        Csr::SrcAddr,
        Csr::DstAddr,
        Csr::Ctl,
        Csr::DataSize,
        Csr::LoopNum,
    ];

    /// Byte offset in CSR space.
    #[inline]
    pub const fn offset(self) -> u32 {
        self as u32
    }

    /// Look up a register by byte offset.
    pub fn from_offset(offset: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|csr| csr.offset() == offset)
    }

    /// Register name as used in hardware documentation.
    pub const fn name(self) -> &'static str {
        match self {
            Csr::CipuCtl => "CIPUCTL",
            Csr::DsmBaseLow => "DSM_BASE_LOW",
            Csr::DsmBaseHigh => "DSM_BASE_HIGH",
            Csr::SrcAddr => "SRC_ADDR",
            Csr::DstAddr => "DST_ADDR",
            Csr::Ctl => "CTL",
            Csr::DataSize => "DATA_SIZE",
            Csr::LoopNum => "LOOP_NUM",
        }
    }
}

impl std::fmt::Display for Csr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#06x}", self.name(), self.offset())
    }
}

bitflags! {
    /// CIPUCTL bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CipuCtl: u32 {
        /// Global AFU reset.
        const RESET = 1 << 24;
    }
}

bitflags! {
    /// AFU CTL bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AfuCtl: u32 {
        /// Start kernel execution.
        const START = 1 << 1;
    }
}

/// 32-bit CSR access.
///
/// Both calls are synchronous and never retry. Offset validity is the
/// caller's responsibility; no error is reported for an unmapped offset.
/// Device-owned status registers must not be written after initialization.
///
/// # Panics
///
/// Implementations backed by a mapped BAR ([`MmioRegion`]) panic on an
/// offset that is unaligned or outside the mapping. Every [`Csr`] offset
/// lies inside the AFU's CSR window.
///
/// [`MmioRegion`]: crate::mmio::MmioRegion
pub trait RegisterInterface {
    /// Read the register at byte `offset`.
    fn read_csr(&self, offset: u32) -> u32;

    /// Write `value` to the register at byte `offset`.
    fn write_csr(&self, offset: u32, value: u32);

    /// Read a named register.
    #[inline]
    fn read(&self, csr: Csr) -> u32 {
        self.read_csr(csr.offset())
    }

    /// Write a named register.
    #[inline]
    fn write(&self, csr: Csr, value: u32) {
        log::trace!("csr write {} <- {:#010x}", csr, value);
        self.write_csr(csr.offset(), value);
    }

    /// Write a 64-bit value split over `high` and `low`, HIGH word first.
    fn write_split(&self, high: Csr, low: Csr, value: u64) {
        let (hi, lo) = split_address(value);
        self.write(high, hi);
        self.write(low, lo);
    }
}

/// Split a 64-bit address into its (high, low) register words.
#[inline]
pub const fn split_address(addr: u64) -> (u32, u32) {
    ((addr >> 32) as u32, (addr & 0xffff_ffff) as u32)
}

/// Rebuild a 64-bit address from its (high, low) register words.
#[inline]
pub const fn join_address(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// Convert a cache-line-aligned byte quantity into cache-line units.
///
/// Address and size registers take cache-line units, not bytes.
///
/// # Errors
///
/// Returns [`CciError::InvalidArgument`] if `bytes` is not a multiple of 64
/// or the unit count does not fit in a 32-bit register.
pub fn cache_line_units(bytes: u64) -> CciResult<u32> {
    if bytes % CACHE_LINE_BYTES != 0 {
        return Err(CciError::InvalidArgument(format!(
            "{:#x} is not cache-line aligned",
            bytes
        )));
    }
    u32::try_from(bytes >> LOG2_CACHE_LINE).map_err(|_| {
        CciError::InvalidArgument(format!(
            "{:#x} does not fit a 32-bit cache-line register",
            bytes
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(Csr::CipuCtl.offset(), 0x280);
        assert_eq!(Csr::DsmBaseLow.offset(), 0x1a00);
        assert_eq!(Csr::DsmBaseHigh.offset(), 0x1a04);
        assert_eq!(Csr::Ctl.offset(), 0x1a2c);
        assert_eq!(Csr::LoopNum.offset(), 0x1a34);
    }

    #[test]
    fn test_from_offset() {
        for csr in Csr::ALL {
            assert_eq!(Csr::from_offset(csr.offset()), Some(csr));
        }
        assert_eq!(Csr::from_offset(0x1a28), None);
    }

    #[test]
    fn test_bits() {
        assert_eq!(CipuCtl::RESET.bits(), 0x0100_0000);
        assert_eq!(AfuCtl::START.bits(), 0x2);
    }

    #[test]
    fn test_cache_line_round_trip() {
        for p in [0u64, 64, 0x1000, 0x2_0000_0040, 0x3f_ffff_ffc0] {
            let units = cache_line_units(p).unwrap();
            assert_eq!((units as u64) * CACHE_LINE_BYTES, p);
        }
    }

    #[test]
    fn test_cache_line_rejects_unaligned() {
        assert!(matches!(
            cache_line_units(0x1001),
            Err(CciError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache_line_units(1u64 << 40),
            Err(CciError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_split_join() {
        for a in [0u64, 1, 0xffff_ffff, 0x1_0000_0000, 0xdead_beef_cafe_f00d, u64::MAX] {
            let (hi, lo) = split_address(a);
            assert_eq!(hi as u64, a >> 32);
            assert_eq!(lo as u64, a & 0xffff_ffff);
            assert_eq!(join_address(hi, lo), a);
        }
    }

    #[test]
    fn test_write_split_order() {
        use std::cell::RefCell;

        #[derive(Default)]
        struct Recorder(RefCell<Vec<(u32, u32)>>);
        impl RegisterInterface for Recorder {
            fn read_csr(&self, _offset: u32) -> u32 {
                0
            }
            fn write_csr(&self, offset: u32, value: u32) {
                self.0.borrow_mut().push((offset, value));
            }
        }

        let regs = Recorder::default();
        regs.write_split(Csr::DsmBaseHigh, Csr::DsmBaseLow, 0x0000_0002_0040_0000);
        assert_eq!(
            *regs.0.borrow(),
            vec![(0x1a04, 0x0000_0002), (0x1a00, 0x0040_0000)]
        );
    }

    struct BarRegs(crate::mmio::MmioRegion);

    impl RegisterInterface for BarRegs {
        fn read_csr(&self, offset: u32) -> u32 {
            self.0.load_u32(offset as usize)
        }
        fn write_csr(&self, offset: u32, value: u32) {
            self.0.store_u32(offset as usize, value);
        }
    }

    fn bar_over(buf: &mut [u32]) -> BarRegs {
        let len = buf.len() * 4;
        BarRegs(unsafe { crate::mmio::MmioRegion::from_raw_parts(buf.as_mut_ptr() as *mut u8, len) }.unwrap())
    }

    #[test]
    fn test_mapped_bar_covers_csr_map() {
        let mut buf = vec![0u32; 0x2000 / 4];
        let regs = bar_over(&mut buf);
        for csr in Csr::ALL {
            regs.write(csr, csr.offset());
            assert_eq!(regs.read(csr), csr.offset());
        }
    }

    #[test]
    #[should_panic(expected = "outside region")]
    fn test_mapped_bar_panics_past_end() {
        let mut buf = vec![0u32; 0x1000 / 4];
        let regs = bar_over(&mut buf);
        regs.read(Csr::LoopNum);
    }
}
