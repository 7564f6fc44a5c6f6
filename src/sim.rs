// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Simulated AFU (`--target=ASE`).
//!
//! The simulated device runs on its own thread and reacts to CSR writes the
//! way the benchmark AFU does:
//!
//! - CIPUCTL bit 24 asserted: forget the DSM binding.
//! - DSM_BASE_LOW written outside reset: publish the AFU identifier into the
//!   DSM (words 3..1 first, then word 0).
//! - CTL start bit: sum the input buffer `LOOP_NUM` times, write the 32-bit
//!   running sum to the output buffer, then set the DSM complete flag.
//!
//! Workspaces live in host memory. Each one gets a synthetic physical
//! address from a bump allocator starting at 8 GiB, so that the DSM address
//! needs both HIGH and LOW registers and every cache-line address still
//! fits its 32-bit register.

use crate::config::Target;
use crate::csr::{join_address, AfuCtl, CipuCtl, Csr, RegisterInterface, LOG2_CACHE_LINE};
use crate::device::{CciDevice, DeviceFactory};
use crate::dsm::{
    AfuId, AFU_ID_WORDS, DSM_AFU_ID, DSM_MIN_LEN, DSM_STATUS_COMPLETE, DSM_STATUS_TEST_ERROR,
};
use crate::error::{CciError, CciResult};
use crate::mmio::{MmioRegion, WORD_BYTES};
use crate::workspace::{PinnedRegion, RegionBacking, WorkspaceAllocator};
use std::alloc::Layout;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Identifier published by the simulated AFU.
pub const SIM_AFU_ID: AfuId = AfuId::from_u128(0xc000_c966_0d82_4272_9aef_fe5f_8457_0612);

/// First synthetic physical address.
pub const SIM_PHYS_BASE: u64 = 0x2_0000_0000;

/// Test error code for an input or output address that maps no workspace.
pub const TEST_ERROR_BAD_ADDRESS: u32 = 0x1;

const SIM_PAGE_SIZE: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the simulated AFU responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimBehavior {
    /// Answer both handshakes.
    #[default]
    Normal,
    /// Never publish an identifier.
    Unresponsive,
    /// Publish an identifier but never complete a kernel.
    NeverCompletes,
}

/// What the simulated AFU observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimObservations {
    /// Every CSR write, in order, as (offset, value).
    pub csr_writes: Vec<(u32, u32)>,
    /// Regions handed out.
    pub allocations: usize,
    /// Regions handed back.
    pub frees: usize,
    /// Whether the DSM fields were all zero when the AFU attached to it.
    pub dsm_clean_at_attach: Option<bool>,
    /// Kernels run to completion.
    pub kernel_runs: u32,
    /// Number of CSR writes seen when the first region was handed back.
    pub csr_writes_before_first_free: Option<usize>,
}

impl SimObservations {
    /// Regions allocated and not yet freed.
    pub fn live_regions(&self) -> usize {
        self.allocations - self.frees
    }

    /// Last CSR write issued before the first region was handed back.
    pub fn last_write_before_free(&self) -> Option<(u32, u32)> {
        let n = self.csr_writes_before_first_free?;
        n.checked_sub(1).map(|i| self.csr_writes[i])
    }

    /// CSR writes to one register, in order.
    pub fn writes_to(&self, csr: Csr) -> Vec<u32> {
        self.csr_writes
            .iter()
            .filter(|(offset, _)| *offset == csr.offset())
            .map(|(_, value)| *value)
            .collect()
    }
}

/// Shared handle onto a simulated device's observations.
///
/// Outlives the device, so a test can inspect what happened after teardown.
#[derive(Debug, Clone, Default)]
pub struct SimMonitor(Arc<Mutex<SimObservations>>);

impl SimMonitor {
    /// Copy of everything observed so far.
    pub fn snapshot(&self) -> SimObservations {
        lock(&self.0).clone()
    }

    fn record(&self, f: impl FnOnce(&mut SimObservations)) {
        f(&mut lock(&self.0));
    }
}

/// Page-aligned, zeroed host allocation standing in for pinned memory.
#[derive(Debug)]
struct SimBuffer {
    layout: Layout,
    region: MmioRegion,
}

impl SimBuffer {
    fn new(len: usize) -> CciResult<Self> {
        let layout = Layout::from_size_align(len, SIM_PAGE_SIZE).map_err(|e| {
            CciError::AllocationFailed {
                size: len,
                reason: e.to_string(),
            }
        })?;

        // SAFETY: len > 0 is checked by the allocator entry point; layout is valid.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(CciError::AllocationFailed {
                size: len,
                reason: "host memory exhausted".to_string(),
            });
        }

        // SAFETY: ptr is valid for len bytes until dealloc in Drop.
        let region = match unsafe { MmioRegion::from_raw_parts(ptr, len) } {
            Ok(region) => region,
            Err(e) => {
                // SAFETY: allocated above with this layout.
                unsafe { std::alloc::dealloc(ptr, layout) };
                return Err(e);
            }
        };
        Ok(Self { layout, region })
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        // SAFETY: region.as_ptr() came from alloc_zeroed with self.layout.
        unsafe { std::alloc::dealloc(self.region.as_ptr(), self.layout) };
    }
}

#[derive(Debug)]
struct SimRegion {
    buffer: Arc<SimBuffer>,
    phys: u64,
}

impl RegionBacking for SimRegion {
    fn region(&self) -> &MmioRegion {
        &self.buffer.region
    }

    fn phys_addr(&self) -> u64 {
        self.phys
    }
}

/// A physical address resolved to a workspace and an offset within it.
#[derive(Debug, Clone)]
struct Mapped {
    buffer: Arc<SimBuffer>,
    offset: usize,
}

impl Mapped {
    fn load(&self, offset: usize) -> u32 {
        self.buffer.region.load_u32(self.offset + offset)
    }

    fn store(&self, offset: usize, value: u32) {
        self.buffer.region.store_u32(self.offset + offset, value);
    }

    fn release(&self) {
        self.buffer.region.release();
    }
}

#[derive(Debug, Default)]
struct HostSide {
    csr: HashMap<u32, u32>,
    pending: VecDeque<(u32, u32)>,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    host: Mutex<HostSide>,
    wake: Condvar,
    memory: Mutex<BTreeMap<u64, Arc<SimBuffer>>>,
    monitor: SimMonitor,
}

impl Shared {
    fn resolve(&self, phys: u64, len: usize) -> Option<Mapped> {
        let memory = lock(&self.memory);
        let (base, buffer) = memory.range(..=phys).next_back()?;
        let offset = usize::try_from(phys - base).ok()?;
        if offset.checked_add(len)? > buffer.region.len() {
            return None;
        }
        Some(Mapped {
            buffer: Arc::clone(buffer),
            offset,
        })
    }
}

/// Device-side model, owned by the simulation thread.
struct AfuModel {
    shared: Arc<Shared>,
    behavior: SimBehavior,
    regs: HashMap<u32, u32>,
    in_reset: bool,
    dsm: Option<Mapped>,
}

impl AfuModel {
    fn run(mut self) {
        log::trace!("simulated AFU thread started");
        loop {
            let (offset, value) = {
                let mut host = lock(&self.shared.host);
                loop {
                    if host.shutdown {
                        log::trace!("simulated AFU thread stopping");
                        return;
                    }
                    if let Some(write) = host.pending.pop_front() {
                        break write;
                    }
                    host = self
                        .shared
                        .wake
                        .wait(host)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            self.regs.insert(offset, value);
            self.on_write(offset, value);
        }
    }

    fn reg(&self, csr: Csr) -> u32 {
        self.regs.get(&csr.offset()).copied().unwrap_or(0)
    }

    fn on_write(&mut self, offset: u32, value: u32) {
        match Csr::from_offset(offset) {
            Some(Csr::CipuCtl) => {
                let reset = CipuCtl::from_bits_retain(value).contains(CipuCtl::RESET);
                if reset && !self.in_reset {
                    log::trace!("simulated AFU: reset asserted");
                    self.dsm = None;
                }
                self.in_reset = reset;
            }
            Some(Csr::DsmBaseLow) => self.attach_dsm(),
            Some(Csr::Ctl) if AfuCtl::from_bits_retain(value).contains(AfuCtl::START) => {
                self.run_kernel()
            }
            _ => {}
        }
    }

    fn attach_dsm(&mut self) {
        if self.in_reset {
            log::warn!("simulated AFU: DSM base written while in reset, ignored");
            return;
        }
        let phys = join_address(self.reg(Csr::DsmBaseHigh), self.reg(Csr::DsmBaseLow));
        let Some(dsm) = self.shared.resolve(phys, DSM_MIN_LEN) else {
            log::warn!("simulated AFU: DSM address {:#x} maps no workspace", phys);
            return;
        };

        let clean = (0..DSM_MIN_LEN / WORD_BYTES).all(|i| dsm.load(i * WORD_BYTES) == 0);
        self.shared
            .monitor
            .record(|obs| obs.dsm_clean_at_attach = Some(clean));

        if self.behavior == SimBehavior::Unresponsive {
            return;
        }

        let words = SIM_AFU_ID.words();
        for i in (1..AFU_ID_WORDS).rev() {
            dsm.store(DSM_AFU_ID + i * WORD_BYTES, words[i]);
        }
        dsm.release();
        dsm.store(DSM_AFU_ID, words[0]);
        log::debug!("simulated AFU: attached DSM at {:#x}", phys);
        self.dsm = Some(dsm);
    }

    fn run_kernel(&mut self) {
        let Some(dsm) = self.dsm.clone() else {
            log::warn!("simulated AFU: start without DSM, ignored");
            return;
        };
        if self.behavior == SimBehavior::NeverCompletes {
            return;
        }

        let src = (self.reg(Csr::SrcAddr) as u64) << LOG2_CACHE_LINE;
        let dst = (self.reg(Csr::DstAddr) as u64) << LOG2_CACHE_LINE;
        let bytes = (self.reg(Csr::DataSize) as usize) << LOG2_CACHE_LINE;
        let loops = self.reg(Csr::LoopNum);

        match (self.shared.resolve(src, bytes), self.shared.resolve(dst, WORD_BYTES)) {
            (Some(input), Some(output)) => {
                let pass = (0..bytes / WORD_BYTES)
                    .fold(0u32, |acc, i| acc.wrapping_add(input.load(i * WORD_BYTES)));
                let result = pass.wrapping_mul(loops);
                output.store(0, result);
                log::debug!(
                    "simulated AFU: {} words x {} loops -> {}",
                    bytes / WORD_BYTES,
                    loops,
                    result
                );
            }
            _ => {
                log::warn!(
                    "simulated AFU: src {:#x} or dst {:#x} maps no workspace",
                    src,
                    dst
                );
                dsm.store(DSM_STATUS_TEST_ERROR, TEST_ERROR_BAD_ADDRESS);
            }
        }

        dsm.release();
        dsm.store(DSM_STATUS_COMPLETE, 1);
        self.shared.monitor.record(|obs| obs.kernel_runs += 1);
    }
}

/// In-process simulated AFU.
#[derive(Debug)]
pub struct SimulatedAfu {
    shared: Arc<Shared>,
    next_phys: Mutex<u64>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedAfu {
    /// Start a simulated AFU with its own monitor.
    pub fn new(behavior: SimBehavior) -> CciResult<Self> {
        Self::with_monitor(behavior, SimMonitor::default())
    }

    /// Start a simulated AFU that records into `monitor`.
    pub fn with_monitor(behavior: SimBehavior, monitor: SimMonitor) -> CciResult<Self> {
        let shared = Arc::new(Shared {
            host: Mutex::new(HostSide::default()),
            wake: Condvar::new(),
            memory: Mutex::new(BTreeMap::new()),
            monitor,
        });

        let model = AfuModel {
            shared: Arc::clone(&shared),
            behavior,
            regs: HashMap::new(),
            in_reset: false,
            dsm: None,
        };
        let worker = std::thread::Builder::new()
            .name("sim-afu".to_string())
            .spawn(move || model.run())?;

        log::info!("simulated AFU started ({:?})", behavior);
        Ok(Self {
            shared,
            next_phys: Mutex::new(SIM_PHYS_BASE),
            worker: Some(worker),
        })
    }

    /// Observation handle.
    pub fn monitor(&self) -> SimMonitor {
        self.shared.monitor.clone()
    }
}

impl RegisterInterface for SimulatedAfu {
    fn read_csr(&self, offset: u32) -> u32 {
        lock(&self.shared.host)
            .csr
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    fn write_csr(&self, offset: u32, value: u32) {
        {
            let mut host = lock(&self.shared.host);
            host.csr.insert(offset, value);
            host.pending.push_back((offset, value));
        }
        self.shared
            .monitor
            .record(|obs| obs.csr_writes.push((offset, value)));
        self.shared.wake.notify_one();
    }
}

impl WorkspaceAllocator for SimulatedAfu {
    fn allocate_region(&self, len: usize) -> CciResult<PinnedRegion> {
        if len == 0 {
            return Err(CciError::InvalidArgument(
                "zero-length region".to_string(),
            ));
        }
        let buffer = Arc::new(SimBuffer::new(len)?);

        let phys = {
            let mut next = lock(&self.next_phys);
            let phys = *next;
            *next += len.next_multiple_of(SIM_PAGE_SIZE) as u64;
            phys
        };

        lock(&self.shared.memory).insert(phys, Arc::clone(&buffer));
        self.shared.monitor.record(|obs| obs.allocations += 1);
        PinnedRegion::new(SimRegion { buffer, phys })
    }

    fn free_region(&self, region: PinnedRegion) {
        lock(&self.shared.memory).remove(&region.phys_addr());
        self.shared.monitor.record(|obs| {
            if obs.csr_writes_before_first_free.is_none() {
                obs.csr_writes_before_first_free = Some(obs.csr_writes.len());
            }
            obs.frees += 1;
        });
        drop(region);
    }
}

impl CciDevice for SimulatedAfu {
    fn target(&self) -> Target {
        Target::Ase
    }
}

impl Drop for SimulatedAfu {
    fn drop(&mut self) {
        lock(&self.shared.host).shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("simulated AFU thread panicked");
            }
        }
        log::info!("simulated AFU stopped");
    }
}

/// Factory for [`SimulatedAfu`] handles.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAfuFactory {
    behavior: SimBehavior,
    monitor: SimMonitor,
}

impl SimulatedAfuFactory {
    /// Factory whose devices respond per `behavior`.
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            monitor: SimMonitor::default(),
        }
    }

    /// Monitor shared by every device this factory creates.
    pub fn monitor(&self) -> SimMonitor {
        self.monitor.clone()
    }
}

impl DeviceFactory for SimulatedAfuFactory {
    fn target(&self) -> Target {
        Target::Ase
    }

    fn create_device(&self) -> CciResult<Box<dyn CciDevice>> {
        Ok(Box::new(SimulatedAfu::with_monitor(
            self.behavior,
            self.monitor.clone(),
        )?))
    }
}
