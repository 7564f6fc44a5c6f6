// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

use cci_microbench::cli::{init_logging, parse_args, Invocation};
use cci_microbench::timing::SUMMARY_HEADER;
use cci_microbench::{
    device_factory, run_repeated, summarize, BenchmarkHarness, CciError, HarnessEvent, RunConfig,
};
use std::process::ExitCode;

fn print_event(event: &HarnessEvent) {
    match event {
        HarnessEvent::DeviceReady(afu_id) => println!("[Start] AFU ID={}", afu_id),
        HarnessEvent::Completed { result } => println!("[Complete] final_result = {}", result),
        // `<label>: <seconds> s`, seconds as the third whitespace token.
        HarnessEvent::Checkpoint(sample) => println!("{}", sample),
    }
}

fn run(config: &RunConfig) -> Result<(), CciError> {
    let reports = run_repeated(config.repeat, || {
        Ok(BenchmarkHarness::new(config.benchmark, device_factory(&config.device)?)
            .with_wait_policy(config.wait)
            .on_event(print_event))
    })?;
    log::debug!("reports: {:?}", reports);

    if reports.len() > 1 {
        println!("{}", SUMMARY_HEADER);
        for stats in summarize(reports.iter().flat_map(|r| &r.timings)) {
            println!("{}", stats);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let config = match parse_args(std::env::args_os()) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Info(text)) => {
            print!("{}", text);
            return ExitCode::SUCCESS;
        }
        Err(CciError::Usage(text)) => {
            print!("{}", text);
            return ExitCode::from(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    init_logging(&config);
    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
