//! SCSI bus engine
//!
//! ## Bus phases and transitions
//! ```mermaid
//! stateDiagram-v2
//!     [*] --> BusFree
//!
//!     BusFree --> Arbitration : Assert BSY
//!     Arbitration --> Selection : Assert SEL
//!     Arbitration --> BusFree : Release BSY (Lose Arbitration)
//!
//!     Selection --> Command : Assert C/D, REQ
//!     Command --> DataIn : Assert I/O, REQ
//!     Command --> DataOut : Assert REQ
//!     DataIn --> Status : Assert REQ, Status Byte
//!     DataOut --> Status : Assert REQ, Status Byte
//!     Status --> MsgIn : Assert MSG, REQ
//!     MsgIn --> BusFree : Release BSY (End of Command)
//!
//!     BusFree --> Reselection : Assert BSY, SEL, I/O
//! ```
//!
//! The engine never drives these transitions on its own; phases change
//! when an external SCSI peer changes the control lines, and the engine
//! observes them through [`Bus::acquire`] and [`Phase::from_signals`].

pub mod engine;

use log::*;
use strum::IntoStaticStr;
use thiserror::Error;

use crate::board::{Board, BoardType, Level};
use crate::gpio::rpi::RpiIo;
use crate::gpio::virt::VirtualIo;
use crate::gpio::{GpioDirection, GpioPull};
use crate::sample::DataSample;
use crate::sbc;
use crate::shm;
use crate::signal::Signal;

pub use engine::ScsiEngine;

/// SCSI bus phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum Phase {
    BusFree,
    Arbitration,
    Selection,
    Reselection,
    Command,
    /// Target -> Initiator
    DataIn,
    /// Initiator -> Target
    DataOut,
    Status,
    MsgIn,
    MsgOut,
    Reserved,
}

/// Information transfer phase by MCI field `(MSG << 2) | (CD << 1) | IO`
/// (SCSI-2 6.1)
const PHASE_TABLE: [Phase; 8] = [
    Phase::DataOut,
    Phase::DataIn,
    Phase::Command,
    Phase::Status,
    Phase::Reserved,
    Phase::Reserved,
    Phase::MsgOut,
    Phase::MsgIn,
];

impl Phase {
    /// Information transfer phase for an MCI field value
    pub const fn from_mci(mci: u8) -> Self {
        PHASE_TABLE[(mci & 7) as usize]
    }

    /// Derives the bus phase from an isolated canonical pin word
    pub fn from_signals(word: u32) -> Self {
        if word & Signal::Sel.mask() != 0 {
            if word & Signal::Io.mask() != 0 {
                Self::Reselection
            } else {
                Self::Selection
            }
        } else if word & Signal::Bsy.mask() == 0 {
            Self::BusFree
        } else {
            Self::from_mci(crate::signal::mci(word))
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Bus operating mode, chosen at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BusMode {
    Target,
    Initiator,
    /// Passive observer: every line stays an input, setters are no-ops
    Monitor,
}

// Bus control timing (SCSI-2, "Fast track to SCSI")
pub const ARBITRATION_DELAY_NS: u32 = 2400;
pub const ASSERTION_PERIOD_NS: u32 = 90;
pub const BUS_CLEAR_DELAY_NS: u32 = 800;
pub const BUS_FREE_DELAY_NS: u32 = 800;
pub const BUS_SET_DELAY_NS: u32 = 1800;
pub const BUS_SETTLE_DELAY_NS: u32 = 400;
pub const CABLE_SKEW_DELAY_NS: u32 = 10;
pub const DATA_RELEASE_DELAY_NS: u32 = 400;
pub const DESKEW_DELAY_NS: u32 = 45;
pub const DISCONNECTION_DELAY_US: u32 = 200;
pub const HOLD_TIME_NS: u32 = 45;
pub const NEGATION_PERIOD_NS: u32 = 90;
pub const RESET_HOLD_TIME_US: u32 = 25;
pub const RESET_TO_SELECTION_TIME_US: u32 = 250 * 1000;
pub const SELECTION_ABORT_TIME_US: u32 = 200;
pub const SELECTION_TIMEOUT_DELAY_NS: u32 = 250 * 1000;

/// Overall bound on one REQ/ACK edge wait. Deliberately very long; the
/// far end may be a slow real device.
pub const HANDSHAKE_TIMEOUT_US: u32 = 3000 * 1000;

/// Quiet period inserted mid-transfer for devices whose firmware
/// expects one after a header prefix (e.g. some Ethernet adapters)
pub const SEND_DATA_INTER_CHUNK_US: u32 = 100;

/// Escape byte some host adapters prefix to CDBs carried over ACSI;
/// consumed and discarded during command reception
pub const ICD_ESCAPE: u8 = 0x1F;

/// Largest CDB the command handshake can receive
pub const CDB_MAX: usize = 16;

/// Passed as `delay_after_bytes` when no mid-transfer delay is wanted
pub const SEND_NO_DELAY: i32 = -1;

/// Expected CDB length from the opcode byte
pub const fn cdb_length(opcode: u8) -> usize {
    match opcode {
        0x88 | 0x8A | 0x8F | 0x91 | 0x9E | 0x9F => 16,
        0xA0 => 12,
        0x05 | 0x20..=0x7D => 10,
        _ => 6,
    }
}

/// Bus/backend initialization failures
#[derive(Debug, Error)]
pub enum InitError {
    #[error("bus backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("invalid or unspecified board type")]
    InvalidBoard,
    #[error("GPIO bus access requires root permissions")]
    NotPermitted,
}

/// The abstract SCSI bus
///
/// One long-lived instance per process, owned by a single thread.
/// Implemented by [`ScsiEngine`] over the memory-mapped GPIO backend on
/// supported boards and over the shared-memory virtual bus elsewhere.
pub trait Bus {
    fn mode(&self) -> BusMode;
    fn board(&self) -> &'static Board;

    /// Configures pulls, initial line directions and the control lines
    /// for the chosen mode and lights ENB. Idempotent in Monitor mode,
    /// where nothing is driven.
    fn init(&mut self);
    /// Returns every line to the safe idle state for the current mode
    fn reset(&mut self);
    /// Releases the bus: ENB off, transceivers and lines back to inputs
    fn cleanup(&mut self);

    /// Samples all bus pins atomically, normalized to positive logic in
    /// the canonical layout. Also refreshes the cached word returned by
    /// [`Bus::signals`].
    fn acquire(&mut self) -> u32;
    /// Most recently acquired pin word
    fn signals(&self) -> u32;
    /// Acquires and wraps the result in a timestamped sample
    fn sample(&mut self) -> DataSample;

    /// Reads a signal from the most recently acquired pin word
    fn get_signal(&self, signal: Signal) -> bool;
    /// Drives a SCSI signal, positive logic, without any of the
    /// direction-control side effects of the named setters
    fn set_signal(&mut self, signal: Signal, asserted: bool);

    fn get_bsy(&self) -> bool;
    fn get_sel(&self) -> bool;
    fn get_atn(&self) -> bool;
    fn get_ack(&self) -> bool;
    fn get_rst(&self) -> bool;
    fn get_msg(&self) -> bool;
    fn get_cd(&self) -> bool;
    fn get_req(&self) -> bool;
    fn get_dp(&self) -> bool;
    /// Reads I/O; in Initiator mode this also turns the data
    /// transceivers around to follow the transfer direction
    fn get_io(&mut self) -> bool;

    fn set_bsy(&mut self, asserted: bool);
    fn set_sel(&mut self, asserted: bool);
    fn set_atn(&mut self, asserted: bool);
    fn set_ack(&mut self, asserted: bool);
    fn set_rst(&mut self, asserted: bool);
    fn set_msg(&mut self, asserted: bool);
    fn set_cd(&mut self, asserted: bool);
    /// Drives I/O; in Target mode this also turns the data transceivers
    /// around to follow the transfer direction
    fn set_io(&mut self, asserted: bool);
    fn set_req(&mut self, asserted: bool);

    /// Acquires and extracts the data byte
    fn get_dat(&mut self) -> u8;
    /// Drives the data byte plus odd parity in one operation
    fn set_dat(&mut self, dat: u8);

    /// Busy-waits for a signal to reach the wanted state. Returns false
    /// on bus reset or after [`HANDSHAKE_TIMEOUT_US`].
    fn wait_signal(&mut self, signal: Signal, asserted: bool) -> bool;

    /// Receives a CDB from the initiator (Target mode). Returns the
    /// number of bytes received; short counts indicate a timeout or
    /// reset mid-command.
    fn command_handshake(&mut self, buf: &mut [u8; CDB_MAX]) -> usize;
    /// Receives `count` data bytes. Returns the number of bytes
    /// actually received.
    fn receive_handshake(&mut self, buf: &mut [u8], count: usize) -> usize;
    /// Sends `count` data bytes, inserting an inter-chunk delay before
    /// byte index `delay_after_bytes` (or [`SEND_NO_DELAY`]). Returns
    /// the number of bytes actually sent.
    fn send_handshake(&mut self, buf: &[u8], count: usize, delay_after_bytes: i32) -> usize;

    // Pin-level access for self-tests
    fn pin_config(&mut self, signal: Signal, direction: GpioDirection);
    fn pull_config(&mut self, signal: Signal, pull: GpioPull);
    /// Logic-aware direction change of a single SCSI line
    fn set_pin_direction(&mut self, signal: Signal, direction: GpioDirection);
    /// Drives a control (transceiver/LED) line to a raw level
    fn set_control(&mut self, signal: Signal, level: Level);
}

/// Creates a bus appropriate for this host: memory-mapped GPIO on a
/// Raspberry Pi (unless the virtual board is requested), the
/// shared-memory virtual bus everywhere else.
pub fn create(mode: BusMode, board_type: BoardType) -> Result<Box<dyn Bus>, InitError> {
    let board = board_type.board().ok_or(InitError::InvalidBoard)?;

    if sbc::is_raspberry_pi() && board_type != BoardType::Virtual {
        if !nix::unistd::Uid::effective().is_root() {
            return Err(InitError::NotPermitted);
        }
        debug!("Bus backend: GPIO, board: {}", board.name);
        let io = RpiIo::new(board)?;
        let mut bus = ScsiEngine::new(io, board, mode);
        bus.init();
        bus.reset();
        Ok(Box::new(bus))
    } else {
        debug!("Bus backend: virtual, board: {}", board.name);
        let io = VirtualIo::attach(board, shm::DEFAULT_REGION)?;
        let mut bus = ScsiEngine::new(io, board, mode);
        bus.init();
        bus.reset();
        Ok(Box::new(bus))
    }
}

/// Creates a bus over a named virtual bus region, regardless of host
/// hardware. Used by the simulator (as primary) and by tests.
pub fn create_virtual(
    mode: BusMode,
    primary: bool,
    region: &str,
) -> Result<Box<dyn Bus>, InitError> {
    let board = BoardType::Virtual.board().ok_or(InitError::InvalidBoard)?;
    let io = VirtualIo::new(board, primary, region)?;
    let mut bus = ScsiEngine::new(io, board, mode);
    bus.init();
    bus.reset();
    Ok(Box::new(bus))
}
