// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Busy-wait handshake on device-shared status words.
//!
//! The AFU has no interrupt path to this layer. The host learns about state
//! changes only by re-reading a status word in device status memory until
//! the device makes it non-zero. Correctness relies on the device writing
//! the published data before it writes the flag.

use crate::error::{CciError, CciResult};
use crate::mmio::MmioRegion;
use std::time::{Duration, Instant};

/// Polls between two wall-clock reads under [`WaitPolicy::Deadline`].
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Which device transition is being awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// AFU identifier published in status memory.
    Ready,
    /// Kernel finished; result word valid.
    Completion,
}

impl std::fmt::Display for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

/// How long a handshake may spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Spin until the device answers, possibly forever.
    #[default]
    Unbounded,
    /// Give up after this many reads.
    Spins(u64),
    /// Give up once this much wall-clock time has passed.
    Deadline(Duration),
}

impl WaitPolicy {
    /// Returns true if the wait can end without the device answering.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Self::Unbounded)
    }
}

/// Spin on the word at `offset` until it reads non-zero; return that value.
///
/// Each iteration issues a fresh volatile load. On success an acquire fence
/// is issued, so subsequent reads observe whatever the device wrote before
/// setting the word.
///
/// # Errors
///
/// Returns [`CciError::HandshakeTimeout`] when a bounded `policy` expires.
/// With [`WaitPolicy::Unbounded`] this never returns an error, and it never
/// returns at all if the device never answers.
pub fn await_nonzero(
    region: &MmioRegion,
    offset: usize,
    handshake: Handshake,
    policy: WaitPolicy,
) -> CciResult<u32> {
    log::debug!("waiting for {} handshake at {:#x}", handshake, offset);

    match policy {
        WaitPolicy::Unbounded => loop {
            let value = region.load_u32(offset);
            if value != 0 {
                region.acquire();
                return Ok(value);
            }
            core::hint::spin_loop();
        },
        WaitPolicy::Spins(max) => {
            let start = Instant::now();
            for _ in 0..max {
                let value = region.load_u32(offset);
                if value != 0 {
                    region.acquire();
                    return Ok(value);
                }
                core::hint::spin_loop();
            }
            Err(CciError::HandshakeTimeout {
                handshake,
                polls: max,
                elapsed: start.elapsed(),
            })
        }
        WaitPolicy::Deadline(limit) => {
            let start = Instant::now();
            let mut polls = 0u64;
            loop {
                let value = region.load_u32(offset);
                polls += 1;
                if value != 0 {
                    region.acquire();
                    return Ok(value);
                }
                if polls % DEADLINE_CHECK_INTERVAL == 0 {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return Err(CciError::HandshakeTimeout {
                            handshake,
                            polls,
                            elapsed,
                        });
                    }
                }
                core::hint::spin_loop();
            }
        }
    }
}
