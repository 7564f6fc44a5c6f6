// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # CCI Accelerator Microbenchmark
//!
//! Host-side control and timing harness for a reduction kernel running on a
//! cache-coherent (CCI) FPGA accelerator function unit (AFU).
//!
//! The host allocates three pinned, physically contiguous workspaces (device
//! status memory, input, output), resets the AFU, tells it where its status
//! memory lives, waits for it to publish its identifier, programs source,
//! destination, size and loop count, fills the input, starts the kernel and
//! waits for the completion flag. Each phase is timed.
//!
//! ## Backends
//!
//! | Target | Backend | Requires |
//! |--------|---------|----------|
//! | `ASE`    | In-process simulated AFU | feature `ase` |
//! | `Direct` | PCIe BAR0 CSRs, hugepage workspaces | feature `direct`, Linux, `CAP_SYS_ADMIN` |
//! | `AAL`    | Not available | |
//!
//! ## Example
//!
//! ```rust,no_run
//! use cci_microbench::{device_factory, BenchmarkConfig, BenchmarkHarness, CciError};
//! use cci_microbench::{DeviceOptions, Target};
//!
//! fn main() -> Result<(), CciError> {
//!     let factory = device_factory(&DeviceOptions::new(Target::Ase))?;
//!     let mut harness = BenchmarkHarness::new(BenchmarkConfig::new(10, 5)?, factory);
//!     let report = harness.run()?;
//!
//!     println!("AFU {} returned {}", report.afu_id, report.result);
//!     for sample in &report.timings {
//!         println!("{}", sample);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Handshakes
//!
//! Both device handshakes (identifier published, kernel complete) poll a DSM
//! word until it becomes non-zero. By default they wait forever, like the
//! hardware protocol expects; [`WaitPolicy`] bounds them.

// Module declarations
pub mod cli;
pub mod config;
pub mod csr;
pub mod device;
pub mod dsm;
pub mod error;
pub mod handshake;
pub mod harness;
pub mod mmio;
pub mod reset;
pub mod timing;
pub mod workspace;

#[cfg(feature = "direct")]
pub mod direct;
#[cfg(feature = "ase")]
pub mod sim;

// Re-exports for convenient access
pub use config::{BenchmarkConfig, DeviceOptions, RunConfig, Target};
pub use csr::{AfuCtl, CipuCtl, Csr, RegisterInterface};
pub use device::{device_factory, CciDevice, DeviceFactory};
pub use dsm::{AfuId, DsmView};
pub use error::{CciError, CciResult};
pub use handshake::{Handshake, WaitPolicy};
pub use harness::{run_repeated, BenchmarkHarness, BenchmarkReport, HarnessEvent, HarnessState};
pub use mmio::MmioRegion;
pub use timing::{summarize, Checkpoint, PhaseStats, Stopwatch, TimingSample};
pub use workspace::{PinnedRegion, Workspace, WorkspaceAllocator, WorkspaceRole};
