//! SCSI bus monitor and trace capture tool
//!
//! Opens the bus in monitor mode, records every transition with
//! nanosecond timestamps and renders the capture as VCD (for GTKWave),
//! JSON (lossless raw data) and HTML (per-phase summary). A previously
//! written JSON capture can be re-imported to regenerate the other two
//! reports without hardware.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::*;

use limpet_core::board::BoardType;
use limpet_core::bus::{self, Bus, BusMode};
use limpet_core::capture::{html, json, vcd, CaptureBuffer};
use limpet_core::timer::SysTimer;

#[derive(Parser)]
#[command(
    about = "SCSI bus monitor and trace capture tool",
    version,
    long_about = None)]
struct Args {
    /// Base name of the output files; .vcd, .json and .html are
    /// appended
    #[arg(default_value = "log")]
    output: String,

    /// Capture buffer size (bus transitions)
    #[arg(short, long, default_value_t = 1_000_000)]
    buffer_size: usize,

    /// Parse this JSON capture instead of reading the GPIO pins
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Board/connection type (aibom|fullspec|gamernium|standard|virtual)
    #[arg(short = 'c', long, default_value = "fullspec")]
    board: String,
}

/// Capturing keeps up noticeably better under a real-time scheduling
/// policy; failing to get one is not fatal
fn set_realtime_priority() {
    let param = nix::libc::sched_param {
        sched_priority: unsafe { nix::libc::sched_get_priority_max(nix::libc::SCHED_FIFO) },
    };
    if unsafe { nix::libc::sched_setscheduler(0, nix::libc::SCHED_FIFO, &param) } != 0 {
        warn!("Could not enable real-time scheduling; capture may drop fast transitions");
    }
}

fn generate_reports(base: &str, buffer: &CaptureBuffer) -> Result<()> {
    let vcd_path = format!("{base}.vcd");
    let json_path = format!("{base}.json");
    let html_path = format!("{base}.html");

    info!("Generating {vcd_path}...");
    vcd::write_vcd_file(Path::new(&vcd_path), buffer.samples())?;
    info!("Generating {json_path}...");
    json::write_json_file(Path::new(&json_path), buffer.samples())?;
    info!("Generating {html_path}...");
    html::write_html_file(Path::new(&html_path), buffer.samples())?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let args = Args::parse();

    info!("{}", limpet_core::build_version());

    if let Some(input) = &args.input {
        info!("Reading input file: {}", input.display());
        let samples = json::read_json_file(input)?;
        info!("Read {} samples", samples.len());
        let buffer = CaptureBuffer::from_samples(samples);
        return generate_reports(&args.output, &buffer);
    }

    let board_type = BoardType::parse(&args.board);
    if board_type == BoardType::Invalid {
        bail!("invalid board type: {}", args.board);
    }

    let mut bus =
        bus::create(BusMode::Monitor, board_type).context("unable to initialize the bus")?;
    info!("Reading live data from the bus");
    info!("    Connection type : {}", bus.board().name);
    info!("    Data buffer size: {}", args.buffer_size);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("install signal handler")?;
    }

    set_realtime_priority();
    bus.reset();

    info!("Now collecting data... Press CTRL-C to stop.");

    let mut buffer = CaptureBuffer::new(args.buffer_size);
    let mut loop_count: u64 = 0;
    let start_us = SysTimer::monotonic_us();

    while running.load(Ordering::SeqCst) {
        loop_count += 1;
        if buffer.is_full() {
            info!("Internal data buffer is full, stopping");
            break;
        }
        buffer.push(bus.sample());
    }

    // One last sample so the final event has a visible duration
    buffer.push_terminal(bus.sample());

    let elapsed_us = SysTimer::monotonic_us() - start_us;
    info!("Stopping data collection...");
    info!(
        "Elapsed time: {elapsed_us} microseconds ({} seconds)",
        elapsed_us / 1_000_000
    );
    info!("Collected {} transitions", buffer.len());
    if loop_count > 0 {
        info!(
            "Read the bus {loop_count} times, averaging {} ns per read",
            (elapsed_us * 1000) / loop_count
        );
    }

    bus.cleanup();
    generate_reports(&args.output, &buffer)
}
