// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmark harness: drives one AFU run and times its phases.
//!
//! # States
//!
//! ```text
//! Unconfigured -> WorkspacesAllocated -> DeviceReset -> Programmed
//!              -> Running -> Completed -> TornDown
//! ```
//!
//! `TornDown` is the only normal exit. A device that never answers leaves
//! the harness in `DeviceReset` or `Running`: forever under the default
//! [`WaitPolicy::Unbounded`], or until a bounded policy reports
//! [`CciError::HandshakeTimeout`]. On a timeout the AFU is held in reset
//! before anything is released. Workspaces and the device are released on
//! every exit path, workspaces first.

use crate::config::{BenchmarkConfig, OUTPUT_BUFFER_SIZE};
use crate::csr::{cache_line_units, AfuCtl, Csr, RegisterInterface};
use crate::device::{CciDevice, DeviceFactory};
use crate::dsm::{AfuId, DsmView, DSM_SIZE, DSM_STATUS_ERROR_REGS};
use crate::error::{CciError, CciResult};
use crate::handshake::WaitPolicy;
use crate::mmio::{MmioRegion, WORD_BYTES};
use crate::reset::{hold_reset, reset_device};
use crate::timing::{Checkpoint, Stopwatch, TimingSample};
use crate::workspace::{Workspace, WorkspaceRole};

/// Harness progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    /// Nothing allocated yet.
    Unconfigured,
    /// DSM, input and output workspaces exist; DSM zeroed.
    WorkspacesAllocated,
    /// Reset pulsed and DSM address written.
    DeviceReset,
    /// Addresses, size and loop count programmed.
    Programmed,
    /// Input initialized and start bit written.
    Running,
    /// Completion observed and result read.
    Completed,
    /// Everything released.
    TornDown,
}

/// Progress notifications, emitted as they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessEvent {
    /// AFU identifier observed in the DSM.
    DeviceReady(AfuId),
    /// Kernel result read from the output buffer.
    Completed {
        /// Result word.
        result: u32,
    },
    /// A timing window closed.
    Checkpoint(TimingSample),
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkReport {
    /// Identifier the AFU published.
    pub afu_id: AfuId,
    /// Kernel result word.
    pub result: u32,
    /// DSM test error code.
    pub test_error: u32,
    /// DSM mode error codes.
    pub mode_errors: [u32; DSM_STATUS_ERROR_REGS],
    /// Reported timing windows, in order.
    pub timings: Vec<TimingSample>,
}

impl BenchmarkReport {
    /// Returns true if the AFU reported no test or mode error.
    pub fn is_clean(&self) -> bool {
        self.test_error == 0 && self.mode_errors.iter().all(|&code| code == 0)
    }
}

/// Value written to input element `index`.
///
/// Odd numbers 1..=31, repeating every 16 elements.
#[inline]
pub const fn input_pattern(index: usize) -> u32 {
    2 * (index % 16) as u32 + 1
}

/// Fill `count` words of `region` with [`input_pattern`].
pub fn fill_input(region: &MmioRegion, count: usize) {
    for i in 0..count {
        region.store_u32(i * WORD_BYTES, input_pattern(i));
    }
}

type Observer = Box<dyn FnMut(&HarnessEvent)>;

/// Drives one benchmark run against a device from `factory`.
///
/// # Example
///
/// ```rust,no_run
/// use cci_microbench::{device_factory, BenchmarkConfig, BenchmarkHarness, DeviceOptions, Target};
///
/// fn main() -> Result<(), cci_microbench::CciError> {
///     let factory = device_factory(&DeviceOptions::new(Target::Ase))?;
///     let mut harness = BenchmarkHarness::new(BenchmarkConfig::new(10, 5)?, factory);
///     let report = harness.run()?;
///     println!("result = {}", report.result);
///     Ok(())
/// }
/// ```
pub struct BenchmarkHarness {
    config: BenchmarkConfig,
    wait: WaitPolicy,
    factory: Option<Box<dyn DeviceFactory>>,
    state: HarnessState,
    observer: Option<Observer>,
}

impl std::fmt::Debug for BenchmarkHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkHarness")
            .field("config", &self.config)
            .field("wait", &self.wait)
            .field("factory", &self.factory)
            .field("state", &self.state)
            .finish()
    }
}

impl BenchmarkHarness {
    /// Harness for one run of `config` on a device from `factory`.
    pub fn new(config: BenchmarkConfig, factory: Box<dyn DeviceFactory>) -> Self {
        Self {
            config,
            wait: WaitPolicy::Unbounded,
            factory: Some(factory),
            state: HarnessState::Unconfigured,
            observer: None,
        }
    }

    /// Bound both handshakes.
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Receive [`HarnessEvent`]s as the run progresses.
    pub fn on_event(mut self, observer: impl FnMut(&HarnessEvent) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Current state.
    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Benchmark dimensions.
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    fn enter(&mut self, next: HarnessState) {
        log::debug!("harness: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn emit(&mut self, event: HarnessEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }

    fn checkpoint(&mut self, watch: &mut Stopwatch, checkpoint: Checkpoint) -> TimingSample {
        let sample = watch.lap(checkpoint);
        log::info!("{}", sample);
        if checkpoint.is_reported() {
            self.emit(HarnessEvent::Checkpoint(sample));
        }
        sample
    }

    /// Execute the run.
    ///
    /// Consumes the factory; a harness runs once.
    ///
    /// # Errors
    ///
    /// - [`CciError::Configuration`] if the harness already ran
    /// - whatever the factory reports when opening the device
    /// - [`CciError::AllocationFailed`] if a workspace cannot be provided
    /// - [`CciError::HandshakeTimeout`] if a bounded wait expires
    pub fn run(&mut self) -> CciResult<BenchmarkReport> {
        let factory = self.factory.take().ok_or_else(|| {
            CciError::Configuration("benchmark harness already ran".to_string())
        })?;

        let mut watch = Stopwatch::start();
        let mut timings = Vec::with_capacity(3);

        let device = factory.create_device()?;
        log::info!("opened {} device", device.target());

        let (afu_id, result, test_error, mode_errors) = {
            let dev: &dyn CciDevice = &*device;

            // Unconfigured -> WorkspacesAllocated
            let dsm = Workspace::allocate(dev, WorkspaceRole::DeviceStatusMemory, DSM_SIZE)?;
            let input =
                Workspace::allocate(dev, WorkspaceRole::Input, self.config.input_bytes())?;
            let output = Workspace::allocate(dev, WorkspaceRole::Output, OUTPUT_BUFFER_SIZE)?;
            let status = DsmView::new(dsm.region())?;
            status.clear();
            self.enter(HarnessState::WorkspacesAllocated);

            // WorkspacesAllocated -> DeviceReset
            reset_device(dev);
            dev.write_split(Csr::DsmBaseHigh, Csr::DsmBaseLow, dsm.phys_addr());
            self.enter(HarnessState::DeviceReset);
            // A timed-out AFU still holds the DSM address; stop it before the
            // workspaces are released.
            let afu_id = status
                .await_afu_id(self.wait)
                .inspect_err(|_| hold_reset(dev))?;
            log::info!("AFU ID={}", afu_id);
            self.emit(HarnessEvent::DeviceReady(afu_id));

            // DeviceReset -> Programmed
            dev.write(Csr::SrcAddr, cache_line_units(input.phys_addr())?);
            dev.write(Csr::DstAddr, cache_line_units(output.phys_addr())?);
            dev.write(Csr::DataSize, self.config.data_size_lines()?);
            dev.write(Csr::LoopNum, self.config.loop_count());
            self.enter(HarnessState::Programmed);
            timings.push(self.checkpoint(&mut watch, Checkpoint::Preprocess));

            // Programmed -> Running
            fill_input(input.region(), self.config.element_count());
            self.checkpoint(&mut watch, Checkpoint::InputInit);
            dev.write(Csr::Ctl, AfuCtl::START.bits());
            self.enter(HarnessState::Running);

            // Running -> Completed
            status
                .await_complete(self.wait)
                .inspect_err(|_| hold_reset(dev))?;
            let result = output.region().load_u32(0);
            self.emit(HarnessEvent::Completed { result });
            timings.push(self.checkpoint(&mut watch, Checkpoint::KernelExecution));
            self.enter(HarnessState::Completed);

            let test_error = status.test_error();
            let mode_errors = status.mode_errors();
            if test_error != 0 || mode_errors.iter().any(|&code| code != 0) {
                log::warn!(
                    "AFU reported errors: test={:#x}, mode={:x?}",
                    test_error,
                    mode_errors
                );
            }

            // Completed -> TornDown: workspaces first.
            input.free();
            output.free();
            dsm.free();

            (afu_id, result, test_error, mode_errors)
        };

        drop(device);
        drop(factory);
        timings.push(self.checkpoint(&mut watch, Checkpoint::Postprocess));
        self.enter(HarnessState::TornDown);

        Ok(BenchmarkReport {
            afu_id,
            result,
            test_error,
            mode_errors,
            timings,
        })
    }
}

/// Run `runs` benchmarks back to back, each on a fresh harness from `make`.
///
/// Stops at the first failing run.
///
/// # Errors
///
/// Returns the first error from `make` or from a run.
pub fn run_repeated<F>(runs: u32, mut make: F) -> CciResult<Vec<BenchmarkReport>>
where
    F: FnMut() -> CciResult<BenchmarkHarness>,
{
    let mut reports = Vec::with_capacity(runs as usize);
    for run in 1..=runs {
        log::debug!("run {}/{}", run, runs);
        reports.push(make()?.run()?);
    }
    Ok(reports)
}
