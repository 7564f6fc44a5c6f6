// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device handles and backend selection.
//!
//! A device handle combines CSR access with workspace allocation. Backends
//! are picked at runtime from [`Target`]:
//!
//! | Target | Backend | Availability |
//! |--------|---------|--------------|
//! | `ASE`    | in-process simulated AFU | feature `ase` |
//! | `Direct` | PCIe BAR0 via sysfs, hugepage workspaces | feature `direct`, Linux |
//! | `AAL`    | managed driver | not built |

use crate::config::{DeviceOptions, Target};
use crate::csr::RegisterInterface;
use crate::error::{CciError, CciResult};
use crate::workspace::WorkspaceAllocator;

/// A CSR-accessible, workspace-allocating accelerator handle.
///
/// Dropping the handle releases the device. Workspaces borrow the handle,
/// so they are always freed first.
pub trait CciDevice: RegisterInterface + WorkspaceAllocator + std::fmt::Debug {
    /// Backend this handle talks to.
    fn target(&self) -> Target;
}

/// Creates device handles for one backend.
pub trait DeviceFactory: std::fmt::Debug {
    /// Backend produced by this factory.
    fn target(&self) -> Target;

    /// Open a device handle.
    fn create_device(&self) -> CciResult<Box<dyn CciDevice>>;
}

/// Select the factory for `options.target`.
///
/// # Errors
///
/// Returns [`CciError::UnsupportedTarget`] if this build has no backend for
/// the target.
pub fn device_factory(options: &DeviceOptions) -> CciResult<Box<dyn DeviceFactory>> {
    log::debug!("selecting backend for --target={}", options.target);
    match options.target {
        Target::Ase => ase_factory(),
        Target::Direct => direct_factory(options),
        Target::Aal => Err(CciError::UnsupportedTarget(Target::Aal)),
    }
}

#[cfg(feature = "ase")]
fn ase_factory() -> CciResult<Box<dyn DeviceFactory>> {
    Ok(Box::new(crate::sim::SimulatedAfuFactory::default()))
}

#[cfg(not(feature = "ase"))]
fn ase_factory() -> CciResult<Box<dyn DeviceFactory>> {
    Err(CciError::UnsupportedTarget(Target::Ase))
}

#[cfg(feature = "direct")]
fn direct_factory(options: &DeviceOptions) -> CciResult<Box<dyn DeviceFactory>> {
    Ok(Box::new(crate::direct::DirectDeviceFactory::new(
        options.pci_address.clone(),
    )))
}

#[cfg(not(feature = "direct"))]
fn direct_factory(_options: &DeviceOptions) -> CciResult<Box<dyn DeviceFactory>> {
    Err(CciError::UnsupportedTarget(Target::Direct))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aal_is_unsupported() {
        let err = device_factory(&DeviceOptions::new(Target::Aal)).unwrap_err();
        assert!(matches!(err, CciError::UnsupportedTarget(Target::Aal)));
        assert_eq!(err.exit_code(), 3);
    }

    #[cfg(feature = "ase")]
    #[test]
    fn test_ase_factory() {
        let factory = device_factory(&DeviceOptions::new(Target::Ase)).unwrap();
        assert_eq!(factory.target(), Target::Ase);
        let device = factory.create_device().unwrap();
        assert_eq!(device.target(), Target::Ase);
    }

    #[cfg(feature = "direct")]
    #[test]
    fn test_direct_factory_selected() {
        // Creating the factory never touches hardware.
        let factory = device_factory(&DeviceOptions::new(Target::Direct)).unwrap();
        assert_eq!(factory.target(), Target::Direct);
    }
}
