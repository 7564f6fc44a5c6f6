// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Phase timing.

use std::time::{Duration, Instant};

/// Measured phases of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    /// Device open, allocation, reset and register programming.
    Preprocess,
    /// Input buffer initialization. Measured but not reported.
    InputInit,
    /// Start bit through completion and result read.
    KernelExecution,
    /// Workspace release and device teardown.
    Postprocess,
}

impl Checkpoint {
    /// Label printed next to the elapsed time.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Preprocess => "one-time preprocess",
            Self::InputInit => "input initialization",
            Self::KernelExecution => "kernel execution",
            Self::Postprocess => "one-time postprocess",
        }
    }

    /// Whether this phase appears in the report.
    pub const fn is_reported(self) -> bool {
        !matches!(self, Self::InputInit)
    }

    /// Row name in the summary table.
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Preprocess => "Preprocess",
            Self::InputInit => "InputInit",
            Self::KernelExecution => "Kernel",
            Self::Postprocess => "Postprocess",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Preprocess => 0,
            Self::InputInit => 1,
            Self::KernelExecution => 2,
            Self::Postprocess => 3,
        }
    }

    const ALL: [Checkpoint; 4] = [
        Self::Preprocess,
        Self::InputInit,
        Self::KernelExecution,
        Self::Postprocess,
    ];
}

/// One closed timing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSample {
    /// Phase measured.
    pub checkpoint: Checkpoint,
    /// Time spent in the phase.
    pub elapsed: Duration,
}

impl TimingSample {
    /// Phase label.
    pub fn label(&self) -> &'static str {
        self.checkpoint.label()
    }
}

impl std::fmt::Display for TimingSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:.9} s", self.label(), self.elapsed.as_secs_f64())
    }
}

/// Single running timer; each lap closes a window and opens the next.
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Start timing now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Close the current window as `checkpoint` and restart.
    pub fn lap(&mut self, checkpoint: Checkpoint) -> TimingSample {
        let now = Instant::now();
        let sample = TimingSample {
            checkpoint,
            elapsed: now.duration_since(self.start),
        };
        self.start = now;
        sample
    }
}

/// Header line for [`PhaseStats`] rows.
pub const SUMMARY_HEADER: &str = "phase,runs,min_s,max_s,trimmed_mean_s";

/// Per-phase statistics over repeated runs.
///
/// The trimmed mean drops one fastest and one slowest sample, so ten runs
/// average the middle eight. With two or fewer samples nothing is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStats {
    /// Phase measured.
    pub checkpoint: Checkpoint,
    /// Number of samples.
    pub runs: u32,
    /// Fastest sample.
    pub min: Duration,
    /// Slowest sample.
    pub max: Duration,
    /// Sum of all samples.
    pub total: Duration,
}

impl PhaseStats {
    fn new(sample: &TimingSample) -> Self {
        Self {
            checkpoint: sample.checkpoint,
            runs: 1,
            min: sample.elapsed,
            max: sample.elapsed,
            total: sample.elapsed,
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.runs += 1;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
        self.total += elapsed;
    }

    /// Mean without the extreme samples.
    pub fn trimmed_mean(&self) -> Duration {
        if self.runs > 2 {
            (self.total - self.min - self.max) / (self.runs - 2)
        } else {
            self.total / self.runs
        }
    }
}

impl std::fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{:.9},{:.9},{:.9}",
            self.checkpoint.short_name(),
            self.runs,
            self.min.as_secs_f64(),
            self.max.as_secs_f64(),
            self.trimmed_mean().as_secs_f64()
        )
    }
}

/// Aggregate samples per phase, in checkpoint order.
pub fn summarize<'a>(samples: impl IntoIterator<Item = &'a TimingSample>) -> Vec<PhaseStats> {
    let mut phases: [Option<PhaseStats>; 4] = [None; 4];
    for sample in samples {
        let i = sample.checkpoint.index();
        if let Some(stats) = &mut phases[i] {
            stats.add(sample.elapsed);
        } else {
            phases[i] = Some(PhaseStats::new(sample));
        }
    }
    Checkpoint::ALL
        .iter()
        .filter_map(|c| phases[c.index()])
        .collect()
}
