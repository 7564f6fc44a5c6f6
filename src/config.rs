// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Immutable run configuration.

use crate::csr::cache_line_units;
use crate::error::{CciError, CciResult};
use crate::handshake::WaitPolicy;
use std::str::FromStr;

/// Smallest accepted input exponent: 16 words fill one cache line.
pub const MIN_INPUT_EXPONENT: u32 = 4;

/// Largest accepted input exponent: 2^28 words is a 1 GiB buffer.
pub const MAX_INPUT_EXPONENT: u32 = 28;

/// Highest `--log` / `--trace` level.
pub const MAX_LEVEL: u8 = 7;

/// Output buffer size: the kernel reduces to one word, padded to a line.
pub const OUTPUT_BUFFER_SIZE: usize = 64;

/// Device backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Managed-driver backend.
    Aal,
    /// AFU simulation environment.
    Ase,
    /// Direct userspace hardware access.
    Direct,
}

impl Target {
    /// Targets with a backend in this build.
    pub fn available() -> Vec<Target> {
        [Target::Aal, Target::Ase, Target::Direct]
            .into_iter()
            .filter(|t| t.is_built())
            .collect()
    }

    /// Returns true if this build carries a backend for the target.
    pub fn is_built(&self) -> bool {
        match self {
            Target::Aal => false,
            Target::Ase => cfg!(feature = "ase"),
            Target::Direct => cfg!(feature = "direct"),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aal => write!(f, "AAL"),
            Self::Ase => write!(f, "ASE"),
            Self::Direct => write!(f, "Direct"),
        }
    }
}

impl FromStr for Target {
    type Err = CciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aal" => Ok(Self::Aal),
            "ase" => Ok(Self::Ase),
            "direct" => Ok(Self::Direct),
            _ => Err(CciError::Configuration(format!(
                "Invalid value for --target : {}",
                s
            ))),
        }
    }
}

/// Benchmark dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    input_size_exponent: u32,
    loop_count: u32,
}

impl BenchmarkConfig {
    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`CciError::ArgumentParse`] if the exponent is outside
    /// [`MIN_INPUT_EXPONENT`]..=[`MAX_INPUT_EXPONENT`] or `loop_count` is 0.
    pub fn new(input_size_exponent: u32, loop_count: u32) -> CciResult<Self> {
        if !(MIN_INPUT_EXPONENT..=MAX_INPUT_EXPONENT).contains(&input_size_exponent) {
            return Err(CciError::ArgumentParse(format!(
                "log2 data size must be in {}..={}, got {}",
                MIN_INPUT_EXPONENT, MAX_INPUT_EXPONENT, input_size_exponent
            )));
        }
        if loop_count == 0 {
            return Err(CciError::ArgumentParse(
                "loop count must be positive".to_string(),
            ));
        }
        Ok(Self {
            input_size_exponent,
            loop_count,
        })
    }

    /// log2 of the element count.
    pub fn input_size_exponent(&self) -> u32 {
        self.input_size_exponent
    }

    /// Kernel loop iterations.
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Number of 32-bit input elements.
    pub fn element_count(&self) -> usize {
        1usize << self.input_size_exponent
    }

    /// Input buffer size in bytes.
    pub fn input_bytes(&self) -> usize {
        self.element_count() * std::mem::size_of::<u32>()
    }

    /// Value programmed into DATA_SIZE.
    pub fn data_size_lines(&self) -> CciResult<u32> {
        cache_line_units(self.input_bytes() as u64)
    }
}

/// Backend selection and backend-specific options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Backend to instantiate.
    pub target: Target,
    /// PCI address (e.g. `0000:5e:00.0`) for [`Target::Direct`]; discovered
    /// when absent.
    pub pci_address: Option<String>,
}

impl DeviceOptions {
    /// Options for `target` with defaults.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            pci_address: None,
        }
    }
}

/// Everything one invocation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Backend selection.
    pub device: DeviceOptions,
    /// Benchmark dimensions.
    pub benchmark: BenchmarkConfig,
    /// Log verbosity, 0..=7.
    pub log_level: u8,
    /// Trace verbosity, 0..=7.
    pub trace_level: u8,
    /// Handshake bound.
    pub wait: WaitPolicy,
    /// Number of back-to-back runs, at least 1.
    pub repeat: u32,
}

/// Parse a `--log` / `--trace` value.
///
/// Accepts an optionally signed integer in decimal, `0x` hexadecimal or
/// leading-`0` octal. The whole string must be consumed; otherwise the level
/// is 0. Results are clamped to `0..=7`.
pub fn parse_level(value: &str) -> u8 {
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return 0;
    }

    match u64::from_str_radix(body, radix) {
        Ok(_) if negative => 0,
        Ok(n) => n.min(MAX_LEVEL as u64) as u8,
        // Overflow saturates by sign.
        Err(_) if negative => 0,
        Err(_) => MAX_LEVEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", 0)]
    #[case("3", 3)]
    #[case("7", 7)]
    #[case("8", 7)]
    #[case("1000", 7)]
    #[case("-1", 0)]
    #[case("+5", 5)]
    #[case("0x5", 5)]
    #[case("0X1f", 7)]
    #[case("06", 6)]
    #[case("010", 7)]
    #[case("09", 0)]
    #[case("abc", 0)]
    #[case("5x", 0)]
    #[case("", 0)]
    #[case("-", 0)]
    #[case("0x", 0)]
    #[case("99999999999999999999999", 7)]
    #[case("-99999999999999999999999", 0)]
    fn test_parse_level(#[case] input: &str, #[case] expected: u8) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_parse_level_always_in_range() {
        for n in -50i64..50 {
            assert!(parse_level(&n.to_string()) <= MAX_LEVEL);
        }
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("ASE".parse::<Target>().unwrap(), Target::Ase);
        assert_eq!("direct".parse::<Target>().unwrap(), Target::Direct);
        assert_eq!("Aal".parse::<Target>().unwrap(), Target::Aal);
        assert!(matches!(
            "fpga".parse::<Target>(),
            Err(CciError::Configuration(_))
        ));
    }

    #[test]
    fn test_aal_never_built() {
        assert!(!Target::Aal.is_built());
        assert!(!Target::available().contains(&Target::Aal));
    }

    #[test]
    fn test_benchmark_config_derivations() {
        let cfg = BenchmarkConfig::new(10, 5).unwrap();
        assert_eq!(cfg.element_count(), 1024);
        assert_eq!(cfg.input_bytes(), 4096);
        assert_eq!(cfg.data_size_lines().unwrap(), 64);
        assert_eq!(cfg.loop_count(), 5);
    }

    #[test]
    fn test_benchmark_config_bounds() {
        assert!(BenchmarkConfig::new(MIN_INPUT_EXPONENT, 1).is_ok());
        assert!(BenchmarkConfig::new(MAX_INPUT_EXPONENT, 1).is_ok());
        assert!(matches!(
            BenchmarkConfig::new(3, 1),
            Err(CciError::ArgumentParse(_))
        ));
        assert!(matches!(
            BenchmarkConfig::new(29, 1),
            Err(CciError::ArgumentParse(_))
        ));
        assert!(matches!(
            BenchmarkConfig::new(10, 0),
            Err(CciError::ArgumentParse(_))
        ));
    }

    #[test]
    fn test_smallest_input_is_one_line() {
        let cfg = BenchmarkConfig::new(MIN_INPUT_EXPONENT, 1).unwrap();
        assert_eq!(cfg.data_size_lines().unwrap(), 1);
    }
}
