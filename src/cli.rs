// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Command-line front-end.
//!
//! ```text
//! cci-microbench --target=<TARGET> [--log=N] [--trace=N] [--timeout-ms=N]
//!                [--repeat=N] [--device=<pci address>] <log2 dataSize> <loopCount>
//! ```

use crate::config::{parse_level, BenchmarkConfig, DeviceOptions, RunConfig, Target};
use crate::error::{CciError, CciResult};
use crate::handshake::WaitPolicy;
use clap::error::ErrorKind;
use clap::{CommandFactory, FromArgMatches, Parser};
use log::LevelFilter;
use std::ffi::OsString;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cci-microbench")]
#[command(bin_name = "cci-microbench")]
#[command(version, about = "Reduction microbenchmark for CCI-attached FPGA accelerators")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[arg(long, value_name = "TARGET", help = "Device backend (case-insensitive)")]
    target: Option<String>,

    #[arg(
        long,
        value_name = "N",
        default_value = "0",
        allow_hyphen_values = true,
        value_parser = level_arg,
        help = "Log level, 0..=7"
    )]
    log: u8,

    #[arg(
        long,
        value_name = "N",
        default_value = "0",
        allow_hyphen_values = true,
        value_parser = level_arg,
        help = "Trace level, 0..=7"
    )]
    trace: u8,

    #[arg(
        long = "timeout-ms",
        value_name = "N",
        help = r#"Give up on a handshake after N milliseconds.
Without this option the benchmark waits for the device forever.
        "#
    )]
    timeout_ms: Option<u64>,

    #[arg(
        long,
        value_name = "N",
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(1..),
        help = r#"Run the benchmark N times, each on a freshly opened device.
With N > 1 a per-phase summary (min, max, trimmed mean) follows the runs.
        "#
    )]
    repeat: u32,

    #[arg(
        long = "device",
        value_name = "PCI",
        help = r#"PCI address of the accelerator for --target=Direct.
Default value is the first known accelerator under /sys/bus/pci/devices.
        "#
    )]
    device: Option<String>,

    #[arg(value_name = "log2 dataSize")]
    log2_data_size: String,

    #[arg(value_name = "loopCount")]
    loop_count: String,
}

fn level_arg(value: &str) -> Result<u8, std::convert::Infallible> {
    Ok(parse_level(value))
}

/// What the process should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run the benchmark.
    Run(RunConfig),
    /// Print help or version text and exit successfully.
    Info(String),
}

fn command() -> clap::Command {
    let targets: Vec<String> = Target::available().iter().map(|t| t.to_string()).collect();
    Cli::command().after_help(format!("<TARGET> = one of {{ {} }}", targets.join(" ")))
}

/// Parse `args` (program name first) into an [`Invocation`].
///
/// # Errors
///
/// - [`CciError::Usage`] when no arguments or positionals are missing
/// - [`CciError::ArgumentParse`] when an option or positional is malformed
/// - [`CciError::MissingTarget`], [`CciError::Configuration`] or
///   [`CciError::UnsupportedTarget`] for `--target` problems
pub fn parse_args<I, T>(args: I) -> CciResult<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(e) => return info(classify(e)),
    };
    let cli = Cli::from_arg_matches(&matches)
        .map_err(|e| CciError::ArgumentParse(e.kind().to_string()))?;
    log::debug!("parsed cli command with {cli:?}");

    let target: Target = cli
        .target
        .as_deref()
        .ok_or(CciError::MissingTarget)?
        .parse()?;
    if !target.is_built() {
        return Err(CciError::UnsupportedTarget(target));
    }

    let exponent = positional("log2 dataSize", &cli.log2_data_size)?;
    let loops = positional("loopCount", &cli.loop_count)?;

    Ok(Invocation::Run(RunConfig {
        device: DeviceOptions {
            target,
            pci_address: cli.device,
        },
        benchmark: BenchmarkConfig::new(exponent, loops)?,
        log_level: cli.log,
        trace_level: cli.trace,
        wait: cli
            .timeout_ms
            .map_or(WaitPolicy::Unbounded, |ms| {
                WaitPolicy::Deadline(Duration::from_millis(ms))
            }),
        repeat: cli.repeat,
    }))
}

enum Rejected {
    Info(String),
    Error(CciError),
}

fn classify(e: clap::Error) -> Rejected {
    let text = e.render().to_string();
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Rejected::Info(text),
        ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        | ErrorKind::MissingRequiredArgument => Rejected::Error(CciError::Usage(text)),
        _ => Rejected::Error(CciError::ArgumentParse(
            text.lines().next().unwrap_or_default().to_string(),
        )),
    }
}

fn info(rejected: Rejected) -> CciResult<Invocation> {
    match rejected {
        Rejected::Info(text) => Ok(Invocation::Info(text)),
        Rejected::Error(e) => Err(e),
    }
}

fn positional(name: &str, value: &str) -> CciResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| CciError::ArgumentParse(format!("invalid <{}> '{}'", name, value)))
}

/// Level filter for a `--log` value.
pub fn log_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 | 6 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install the process logger for `config`.
///
/// `RUST_LOG` directives override the command-line levels.
pub fn init_logging(config: &RunConfig) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_filter(config.log_level));
    if config.trace_level > 0 {
        builder.filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace);
    }
    builder.parse_env(env_logger::Env::default());
    // A second initialization (tests) keeps the first logger.
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn run_config(args: &[&str]) -> RunConfig {
        match parse_args(args.iter().copied()).unwrap() {
            Invocation::Run(config) => config,
            other => panic!("expected a run, got {:?}", other),
        }
    }

    #[test]
    fn test_full_command_line() {
        let config = run_config(&[
            "cci-microbench",
            "--target=ASE",
            "--log=5",
            "--trace=0x2",
            "--timeout-ms=250",
            "10",
            "5",
        ]);
        assert_eq!(config.device.target, Target::Ase);
        assert_eq!(config.benchmark, BenchmarkConfig::new(10, 5).unwrap());
        assert_eq!(config.log_level, 5);
        assert_eq!(config.trace_level, 2);
        assert_eq!(
            config.wait,
            WaitPolicy::Deadline(Duration::from_millis(250))
        );
        assert_eq!(config.device.pci_address, None);
    }

    #[test]
    fn test_defaults() {
        let config = run_config(&["cci-microbench", "--target", "direct", "12", "1"]);
        assert_eq!(config.device.target, Target::Direct);
        assert_eq!(config.log_level, 0);
        assert_eq!(config.trace_level, 0);
        assert_eq!(config.wait, WaitPolicy::Unbounded);
        assert_eq!(config.repeat, 1);
    }

    #[test]
    fn test_device_option() {
        let config = run_config(&[
            "cci-microbench",
            "--target=Direct",
            "--device=0000:5e:00.0",
            "10",
            "1",
        ]);
        assert_eq!(config.device.pci_address.as_deref(), Some("0000:5e:00.0"));
    }

    #[test]
    fn test_repeat_option() {
        let config = run_config(&["cci-microbench", "--target=ASE", "--repeat=10", "18", "1"]);
        assert_eq!(config.repeat, 10);
    }

    #[rstest]
    #[case("--log=-3", 0)]
    #[case("--log=12", 7)]
    #[case("--log=abc", 0)]
    #[case("--log=010", 7)]
    fn test_level_clamping(#[case] option: &str, #[case] expected: u8) {
        let config = run_config(&["cci-microbench", "--target=ASE", option, "10", "5"]);
        assert_eq!(config.log_level, expected);
    }

    #[test]
    fn test_missing_target_is_configuration_error() {
        let err = parse_args(["cci-microbench", "10", "5"]).unwrap_err();
        assert!(matches!(err, CciError::MissingTarget));
        assert_eq!(err.exit_code(), 3);
    }

    #[rstest]
    #[case("--target=fpga")]
    #[case("--target=AAL")]
    fn test_bad_target_exit_code(#[case] option: &str) {
        let err = parse_args(["cci-microbench", option, "10", "5"]).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 3);
    }

    #[rstest]
    #[case(&["cci-microbench"])]
    #[case(&["cci-microbench", "--target=ASE"])]
    #[case(&["cci-microbench", "--target=ASE", "10"])]
    fn test_missing_arguments_is_usage(#[case] args: &[&str]) {
        let err = parse_args(args.iter().copied()).unwrap_err();
        assert!(matches!(err, CciError::Usage(_)), "{:?}", err);
        assert_eq!(err.exit_code(), 1);
    }

    #[rstest]
    #[case(&["cci-microbench", "--target=ASE", "--bogus", "10", "5"])]
    #[case(&["cci-microbench", "--target=ASE", "ten", "5"])]
    #[case(&["cci-microbench", "--target=ASE", "10", "0"])]
    #[case(&["cci-microbench", "--target=ASE", "40", "5"])]
    #[case(&["cci-microbench", "--target=ASE", "--timeout-ms=soon", "10", "5"])]
    #[case(&["cci-microbench", "--target=ASE", "--repeat=0", "10", "5"])]
    #[case(&["cci-microbench", "--target=ASE", "--repeat=-2", "10", "5"])]
    fn test_scan_errors(#[case] args: &[&str]) {
        let err = parse_args(args.iter().copied()).unwrap_err();
        assert!(matches!(err, CciError::ArgumentParse(_)), "{:?}", err);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_help_and_version() {
        let help = parse_args(["cci-microbench", "--help"]).unwrap();
        match help {
            Invocation::Info(text) => assert!(text.contains("<TARGET> = one of {")),
            other => panic!("expected help, got {:?}", other),
        }
        assert!(matches!(
            parse_args(["cci-microbench", "--version"]).unwrap(),
            Invocation::Info(_)
        ));
    }

    #[test]
    fn test_help_lists_built_targets_only() {
        let help = command().render_long_help().to_string();
        assert!(!help.contains("AAL"));
        #[cfg(feature = "ase")]
        assert!(help.contains("ASE"));
    }

    #[rstest]
    #[case(0, LevelFilter::Off)]
    #[case(1, LevelFilter::Error)]
    #[case(3, LevelFilter::Error)]
    #[case(4, LevelFilter::Warn)]
    #[case(6, LevelFilter::Info)]
    #[case(7, LevelFilter::Debug)]
    fn test_log_filter(#[case] level: u8, #[case] expected: LevelFilter) {
        assert_eq!(log_filter(level), expected);
    }
}
