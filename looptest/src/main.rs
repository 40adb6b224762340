//! Hardware loopback self-test
//!
//! Run with the external loopback cable fitted: drives every SCSI
//! signal through both transceiver directions, sweeps all 256 data
//! values in and out, and validates the system timer. Exits non-zero
//! when anything mismatches, listing every failure by signal name.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::*;

use limpet_core::board::BoardType;
use limpet_core::bus::{self, Bus, BusMode};
use limpet_core::loopback::{run_timer_test, LoopbackTester};

#[derive(Parser)]
#[command(about = "SCSI interface loopback self-test", version, long_about = None)]
struct Args {
    /// Board/connection type (aibom|fullspec|gamernium|standard|virtual)
    #[arg(short = 'c', long, default_value = "fullspec")]
    board: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let args = Args::parse();

    info!("{} (loopback test)", limpet_core::build_version());

    let board_type = BoardType::parse(&args.board);
    if board_type == BoardType::Invalid {
        bail!("invalid board type: {}", args.board);
    }

    let mut bus =
        bus::create(BusMode::Target, board_type).context("unable to initialize the bus")?;
    info!("Connect type: {}", bus.board().name);

    let mut errors = Vec::new();

    // The bus must exist before the timer test; creating it brings the
    // system timer up
    let mut failures = run_timer_test(&mut errors);

    let mut tester = LoopbackTester::new(bus.as_mut());
    failures += tester.run_loopback_test(&mut errors);

    if failures == 0 {
        // Data sweeps only make sense once the single-pin tests pass
        failures += tester.run_data_input_test(&mut errors);
        failures += tester.run_data_output_test(&mut errors);
    }

    if errors.is_empty() {
        info!("All tests passed");
    } else {
        error!("{} failure(s):", errors.len());
        for e in &errors {
            error!("  {e}");
        }
    }

    bus.cleanup();

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
