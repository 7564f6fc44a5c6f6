// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device status memory (DSM) layout.
//!
//! The DSM is a host-allocated workspace whose physical address is handed to
//! the AFU. The AFU publishes its identifier and run status there; the host
//! only zeroes it before use and otherwise reads it.
//!
//! # Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00 | 16 | AFU identifier, four little-endian words, word 3 most significant |
//! | 0x40 | 4 | execution complete flag |
//! | 0x44 | 4 | test error code |
//! | 0x60 | 32 | mode error codes, 8 words |

use crate::error::{CciError, CciResult};
use crate::handshake::{await_nonzero, Handshake, WaitPolicy};
use crate::mmio::{MmioRegion, WORD_BYTES};

/// DSM workspace size (4 MiB).
pub const DSM_SIZE: usize = 4 * 1024 * 1024;

/// Offset of the AFU identifier.
pub const DSM_AFU_ID: usize = 0x00;

/// Number of 32-bit words in the AFU identifier.
pub const AFU_ID_WORDS: usize = 4;

/// Offset of the execution complete flag.
pub const DSM_STATUS_COMPLETE: usize = 0x40;

/// Offset of the test error code.
pub const DSM_STATUS_TEST_ERROR: usize = 0x44;

/// Offset of the first mode error code.
pub const DSM_STATUS_MODE_ERROR_0: usize = 0x60;

/// Number of mode error codes.
pub const DSM_STATUS_ERROR_REGS: usize = 8;

/// Smallest region that holds every DSM field.
pub const DSM_MIN_LEN: usize = DSM_STATUS_MODE_ERROR_0 + DSM_STATUS_ERROR_REGS * WORD_BYTES;

/// 128-bit AFU identifier.
///
/// Stored as four words, `words[0]` least significant. Displayed as 32 hex
/// digits, most significant word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AfuId([u32; AFU_ID_WORDS]);

impl AfuId {
    /// Build from DSM words, least significant first.
    #[inline]
    pub const fn from_words(words: [u32; AFU_ID_WORDS]) -> Self {
        Self(words)
    }

    /// Build from a 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self([
            value as u32,
            (value >> 32) as u32,
            (value >> 64) as u32,
            (value >> 96) as u32,
        ])
    }

    /// DSM words, least significant first.
    #[inline]
    pub const fn words(&self) -> [u32; AFU_ID_WORDS] {
        self.0
    }

    /// Identifier as a 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        (self.0[0] as u128)
            | ((self.0[1] as u128) << 32)
            | ((self.0[2] as u128) << 64)
            | ((self.0[3] as u128) << 96)
    }
}

impl std::fmt::Display for AfuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for word in self.0.iter().rev() {
            write!(f, "{:08x}", word)?;
        }
        Ok(())
    }
}

/// Host-side view of a DSM workspace.
#[derive(Debug)]
pub struct DsmView<'a> {
    region: &'a MmioRegion,
}

impl<'a> DsmView<'a> {
    /// Wrap a DSM region.
    ///
    /// # Errors
    ///
    /// Returns [`CciError::InvalidArgument`] if the region is too small to
    /// hold the status fields.
    pub fn new(region: &'a MmioRegion) -> CciResult<Self> {
        if region.len() < DSM_MIN_LEN {
            return Err(CciError::InvalidArgument(format!(
                "DSM region of {} bytes is smaller than {} bytes",
                region.len(),
                DSM_MIN_LEN
            )));
        }
        Ok(Self { region })
    }

    /// Zero the whole DSM. Only done before the AFU is given its address.
    pub fn clear(&self) {
        self.region.fill_zero();
    }

    /// Wait for the AFU to publish its identifier.
    ///
    /// Polls word 0 only; the remaining three words are read once afterwards
    /// and are assumed stable by then.
    pub fn await_afu_id(&self, policy: WaitPolicy) -> CciResult<AfuId> {
        let first = await_nonzero(self.region, DSM_AFU_ID, Handshake::Ready, policy)?;
        let mut words = [first, 0, 0, 0];
        for (i, word) in words.iter_mut().enumerate().skip(1) {
            *word = self.region.load_u32(DSM_AFU_ID + i * WORD_BYTES);
        }
        Ok(AfuId::from_words(words))
    }

    /// Wait for the execution complete flag; returns the flag value.
    pub fn await_complete(&self, policy: WaitPolicy) -> CciResult<u32> {
        await_nonzero(self.region, DSM_STATUS_COMPLETE, Handshake::Completion, policy)
    }

    /// Current value of the complete flag, without waiting.
    pub fn complete_flag(&self) -> u32 {
        self.region.load_u32(DSM_STATUS_COMPLETE)
    }

    /// Test error code published by the AFU.
    pub fn test_error(&self) -> u32 {
        self.region.load_u32(DSM_STATUS_TEST_ERROR)
    }

    /// Mode error codes published by the AFU.
    pub fn mode_errors(&self) -> [u32; DSM_STATUS_ERROR_REGS] {
        let mut codes = [0u32; DSM_STATUS_ERROR_REGS];
        for (i, code) in codes.iter_mut().enumerate() {
            *code = self.region.load_u32(DSM_STATUS_MODE_ERROR_0 + i * WORD_BYTES);
        }
        codes
    }
}

const _: () = assert!(DSM_MIN_LEN == 0x80);
const _: () = assert!(DSM_MIN_LEN <= DSM_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    fn region_over(buf: &mut [u32]) -> MmioRegion {
        unsafe {
            MmioRegion::from_raw_parts(buf.as_mut_ptr() as *mut u8, buf.len() * WORD_BYTES)
                .unwrap()
        }
    }

    #[test]
    fn test_afu_id_display_high_to_low() {
        let id = AfuId::from_words([0x4444_4444, 0x3333_3333, 0x2222_2222, 0x1111_1111]);
        assert_eq!(id.to_string(), "11111111222222223333333344444444");
    }

    #[test]
    fn test_afu_id_u128() {
        let value = 0x0123_4567_89ab_cdef_fedc_ba98_7654_3210u128;
        let id = AfuId::from_u128(value);
        assert_eq!(id.words()[0], 0x7654_3210);
        assert_eq!(id.words()[3], 0x0123_4567);
        assert_eq!(id.as_u128(), value);
        assert_eq!(id.to_string(), "0123456789abcdeffedcba9876543210");
    }

    #[test]
    fn test_rejects_short_region() {
        let mut buf = vec![0u32; 16];
        let region = region_over(&mut buf);
        assert!(matches!(
            DsmView::new(&region),
            Err(CciError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reads_status_fields() {
        let mut buf = vec![0u32; DSM_MIN_LEN / WORD_BYTES];
        let region = region_over(&mut buf);
        let dsm = DsmView::new(&region).unwrap();

        region.store_u32(DSM_AFU_ID, 0xa);
        region.store_u32(DSM_AFU_ID + 4, 0xb);
        region.store_u32(DSM_AFU_ID + 8, 0xc);
        region.store_u32(DSM_AFU_ID + 12, 0xd);
        region.store_u32(DSM_STATUS_TEST_ERROR, 3);
        region.store_u32(DSM_STATUS_MODE_ERROR_0 + 7 * 4, 9);
        region.store_u32(DSM_STATUS_COMPLETE, 1);

        let id = dsm.await_afu_id(WaitPolicy::Spins(1)).unwrap();
        assert_eq!(id.words(), [0xa, 0xb, 0xc, 0xd]);
        assert_eq!(dsm.await_complete(WaitPolicy::Spins(1)).unwrap(), 1);
        assert_eq!(dsm.test_error(), 3);
        assert_eq!(dsm.mode_errors()[7], 9);
        assert_eq!(dsm.mode_errors()[0], 0);

        dsm.clear();
        assert_eq!(dsm.complete_flag(), 0);
        assert_eq!(dsm.test_error(), 0);
    }
}
