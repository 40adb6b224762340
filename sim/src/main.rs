//! Virtual SCSI bus simulator
//!
//! Owns the shared-memory bus region as primary so device emulators,
//! the monitor and tests can attach to a bus on machines without SCSI
//! hardware. With `--debug`, logs a per-signal breakdown whenever the
//! bus word changes; `--test` attaches as a client instead and walks
//! every signal and data value once.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::*;

use limpet_core::bus::{self, Bus, BusMode, Phase};
use limpet_core::sample::BusWord;
use limpet_core::shm::{self, SharedMemory};

#[derive(Parser)]
#[command(about = "Virtual SCSI bus simulator", version, long_about = None)]
struct Args {
    /// Log level (trace|debug|info|warn|error|off)
    #[arg(short = 'L', long = "log-level")]
    log_level: Option<String>,

    /// Log a per-signal breakdown of every bus word change
    #[arg(long)]
    debug: bool,

    /// Exercise every signal and data value against a running
    /// simulator, then exit
    #[arg(long)]
    test: bool,
}

fn print_differences(current: u32, previous: u32) {
    if current == previous {
        return;
    }
    let cur = BusWord(current);
    let prev = BusWord(previous);

    let mut s = format!("Bus changed: <{}> ", Phase::from_signals(current).name());
    if cur.dat() != prev.dat() {
        let _ = write!(s, "DAT({:02X}) ", cur.dat());
    }
    macro_rules! diff {
        ($name:literal, $get:ident) => {
            if cur.$get() != prev.$get() {
                let _ = write!(s, "{}({}) ", $name, u8::from(cur.$get()));
            }
        };
    }
    diff!("BSY", bsy);
    diff!("SEL", sel);
    diff!("ATN", atn);
    diff!("ACK", ack);
    diff!("RST", rst);
    diff!("MSG", msg);
    diff!("CD", cd);
    diff!("IO", io);
    diff!("REQ", req);
    diff!("ACT", act);
    debug!("{s}");
}

/// Walks every signal and all 256 data values so a person watching the
/// simulator's debug output can verify the region end to end
fn test_client() -> Result<()> {
    let sleep = Duration::from_millis(10);
    let mut bus = bus::create_virtual(BusMode::Target, false, shm::DEFAULT_REGION)
        .context("attach to the simulator bus region")?;

    info!("Exercising control signals");
    macro_rules! pulse {
        ($name:literal, $set:ident) => {
            info!(concat!("bus.", $name));
            bus.$set(true);
            std::thread::sleep(sleep);
            bus.$set(false);
            std::thread::sleep(sleep);
        };
    }
    pulse!("set_bsy", set_bsy);
    pulse!("set_sel", set_sel);
    pulse!("set_atn", set_atn);
    pulse!("set_ack", set_ack);
    pulse!("set_rst", set_rst);
    pulse!("set_msg", set_msg);
    pulse!("set_cd", set_cd);
    pulse!("set_io", set_io);
    pulse!("set_req", set_req);

    info!("Exercising data bus");
    for val in 0..=255u8 {
        bus.set_dat(val);
        std::thread::sleep(sleep);
        bus.set_dat(0);
        std::thread::sleep(sleep);
    }

    bus.cleanup();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // --debug implies debug-level output unless -L says otherwise
    let level = args.log_level.clone().unwrap_or_else(|| {
        if args.debug { "debug" } else { "info" }.to_owned()
    });
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .format_timestamp(None)
        .init();

    info!("{} (SCSI bus simulator)", limpet_core::build_version());
    if args.log_level.is_some() {
        info!("Set log level to '{level}'");
    }

    if args.test {
        return test_client();
    }

    let signals = SharedMemory::new(shm::DEFAULT_REGION, true)
        .context("create the shared bus region (is another simulator running?)")?;
    info!("Bus region {} ready", shm::DEFAULT_REGION);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("install signal handler")?;
    }

    let mut prev = signals.read();
    let mut dot_counter = 0u32;
    while running.load(Ordering::SeqCst) {
        if args.debug {
            let value = signals.read();
            print_differences(value, prev);
            prev = value;

            dot_counter += 1;
            if dot_counter > 1000 {
                print!(".");
                dot_counter = 0;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    info!("Shutting down, releasing bus region");
    Ok(())
}
