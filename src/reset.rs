// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! AFU global reset sequence.

use crate::csr::{CipuCtl, Csr, RegisterInterface};

/// Pulse the global AFU reset bit in CIPUCTL.
///
/// Read-modify-write to assert bit 24, then read-modify-write again to clear
/// it. All other CIPUCTL bits are preserved.
///
/// No delay and no readback is performed between assert and de-assert. The
/// reset is taken to be effective within one bus transaction; whether that
/// holds on every platform is unverified.
pub fn reset_device<R: RegisterInterface + ?Sized>(regs: &R) {
    let csr = CipuCtl::from_bits_retain(regs.read(Csr::CipuCtl));
    regs.write(Csr::CipuCtl, (csr | CipuCtl::RESET).bits());

    let csr = CipuCtl::from_bits_retain(regs.read(Csr::CipuCtl));
    regs.write(Csr::CipuCtl, (csr - CipuCtl::RESET).bits());

    log::trace!("AFU reset pulsed without settle delay");
}

/// Assert the global AFU reset bit and leave it asserted.
///
/// Used to stop an AFU that still holds workspace addresses before those
/// workspaces are released. The next [`reset_device`] clears the bit.
pub fn hold_reset<R: RegisterInterface + ?Sized>(regs: &R) {
    let csr = CipuCtl::from_bits_retain(regs.read(Csr::CipuCtl));
    regs.write(Csr::CipuCtl, (csr | CipuCtl::RESET).bits());
    log::debug!("AFU held in reset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRegs {
        values: RefCell<HashMap<u32, u32>>,
        writes: RefCell<Vec<(u32, u32)>>,
    }

    impl RegisterInterface for FakeRegs {
        fn read_csr(&self, offset: u32) -> u32 {
            self.values.borrow().get(&offset).copied().unwrap_or(0)
        }

        fn write_csr(&self, offset: u32, value: u32) {
            self.values.borrow_mut().insert(offset, value);
            self.writes.borrow_mut().push((offset, value));
        }
    }

    #[test]
    fn test_reset_asserts_then_deasserts() {
        let regs = FakeRegs::default();
        reset_device(&regs);

        let writes = regs.writes.borrow();
        assert_eq!(*writes, vec![(0x280, 0x0100_0000), (0x280, 0)]);
    }

    #[test]
    fn test_reset_preserves_other_bits() {
        let regs = FakeRegs::default();
        regs.values.borrow_mut().insert(0x280, 0x0000_00a5);
        reset_device(&regs);

        let writes = regs.writes.borrow();
        assert_eq!(writes[0], (0x280, 0x0100_00a5));
        assert_eq!(writes[1], (0x280, 0x0000_00a5));
    }

    #[test]
    fn test_reset_clears_stuck_bit() {
        let regs = FakeRegs::default();
        regs.values.borrow_mut().insert(0x280, 0x0100_0001);
        reset_device(&regs);

        assert_eq!(regs.read_csr(0x280), 0x0000_0001);
        assert_eq!(regs.writes.borrow().len(), 2);
    }

    #[test]
    fn test_hold_reset_stays_asserted() {
        let regs = FakeRegs::default();
        regs.values.borrow_mut().insert(0x280, 0x0000_0003);
        hold_reset(&regs);

        assert_eq!(*regs.writes.borrow(), vec![(0x280, 0x0100_0003)]);
        assert_eq!(regs.read_csr(0x280), 0x0100_0003);

        reset_device(&regs);
        assert_eq!(regs.read_csr(0x280), 0x0000_0003);
    }
}
