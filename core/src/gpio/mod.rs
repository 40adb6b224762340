//! Pin I/O backends
//!
//! Low-level pin primitives behind the bus engine: configure a line,
//! set a pull resistor, drive a level, and sample the whole bus in one
//! atomic read. Two implementations exist: memory-mapped GPIO on
//! Raspberry Pi class boards ([`rpi::RpiIo`]) and the cross-process
//! shared-memory bus ([`virt::VirtualIo`]).

pub mod rpi;
pub mod virt;

use crate::board::{Level, Pin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPull {
    None,
    Down,
    Up,
}

/// Backend contract consumed by the bus engine
///
/// `acquire` returns the canonical positive-logic pin word: the backend
/// owns the knowledge of its raw line layout and electrical polarity,
/// so normalization and repacking happen here. The read must be
/// consistent; one logical sample never mixes two points in time.
pub trait PinIo {
    /// Configures a line as input or output (raw, init-time)
    fn pin_config(&mut self, pin: Pin, direction: GpioDirection);
    /// Configures the line's pull resistor; no-op on the virtual bus
    fn pull_config(&mut self, pin: Pin, pull: GpioPull);
    /// Drives an output line to a raw electrical level
    fn pin_set(&mut self, pin: Pin, level: Level);

    /// Drives a SCSI line to an assertion state, honoring the board's
    /// signal control mode (open-collector emulation on SCSI-logic
    /// boards, direct levels on converter boards)
    fn signal_set(&mut self, pin: Pin, asserted: bool);
    /// Logic-aware direction change of a SCSI line. On SCSI-logic
    /// boards output direction is realized by `signal_set` and the
    /// output request is ignored here.
    fn signal_dir(&mut self, pin: Pin, direction: GpioDirection);

    /// Samples all lines atomically; canonical positive-logic layout
    fn acquire(&mut self) -> u32;
    /// Drives the eight data lines plus odd parity in one operation
    fn set_dat(&mut self, dat: u8);

    /// Sets the pad DC drive strength where supported
    fn drive_strength(&mut self, drive: u32);

    /// Masks interrupts for the duration of a handshake. The pair
    /// nests; only the outermost call touches the hardware.
    fn disable_irq(&mut self);
    fn enable_irq(&mut self);
}
