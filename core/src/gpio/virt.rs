//! Virtual bus backend
//!
//! Implements the pin I/O contract over the shared-memory bus region,
//! so device emulators, the monitor and integration tests can run on
//! machines without SCSI hardware. The region stores the canonical
//! positive-logic pin word directly; timing is best-effort.

use crate::board::{Board, Level, Pin};
use crate::bus::InitError;
use crate::gpio::{GpioDirection, GpioPull, PinIo};
use crate::shm::SharedMemory;
use crate::signal::{Signal, odd_parity};

pub struct VirtualIo {
    shm: SharedMemory,
    /// Canonical bit position per raw line number of the configured
    /// board, so pin-level calls land on the right signal
    line_to_canon: [Option<u32>; 32],
}

impl VirtualIo {
    /// Opens the named bus region; `primary` creates it (the simulator
    /// process does this)
    pub fn new(board: &'static Board, primary: bool, region: &str) -> Result<Self, InitError> {
        let shm = SharedMemory::new(region, primary)
            .map_err(|e| InitError::BackendUnavailable(format!("{e:#}")))?;

        let mut line_to_canon = [None; 32];
        for sig in Signal::SCSI {
            if let Some(pin) = board.signal_pin(sig) {
                line_to_canon[pin.pos() as usize] = Some(sig.pos());
            }
        }
        for sig in [Signal::Act, Signal::Enb, Signal::Ind, Signal::Tad, Signal::Dtd] {
            if let Some(pin) = board.signal_pin(sig) {
                line_to_canon[pin.pos() as usize] = Some(sig.pos());
            }
        }

        Ok(Self { shm, line_to_canon })
    }

    /// Attaches to an existing region created by the simulator
    pub fn attach(board: &'static Board, region: &str) -> Result<Self, InitError> {
        Self::new(board, false, region)
    }

    fn canon_bit(&self, pin: Pin) -> Option<u32> {
        self.line_to_canon.get(pin.pos() as usize).copied().flatten()
    }
}

impl PinIo for VirtualIo {
    fn pin_config(&mut self, _pin: Pin, _direction: GpioDirection) {}

    fn pull_config(&mut self, _pin: Pin, _pull: GpioPull) {}

    fn pin_set(&mut self, pin: Pin, level: Level) {
        let Some(bit) = self.canon_bit(pin) else {
            return;
        };
        self.shm.update(|v| {
            if level == Level::High {
                v | (1 << bit)
            } else {
                v & !(1 << bit)
            }
        });
    }

    fn signal_set(&mut self, pin: Pin, asserted: bool) {
        let Some(bit) = self.canon_bit(pin) else {
            return;
        };
        self.shm.update(|v| {
            if asserted {
                v | (1 << bit)
            } else {
                v & !(1 << bit)
            }
        });
    }

    fn signal_dir(&mut self, _pin: Pin, _direction: GpioDirection) {}

    fn acquire(&mut self) -> u32 {
        self.shm.read()
    }

    fn set_dat(&mut self, dat: u8) {
        let mut word = u32::from(dat);
        if odd_parity(dat) {
            word |= Signal::Dp.mask();
        }
        const DAT_MASK: u32 = 0xFF | Signal::Dp.mask();
        self.shm.update(|v| (v & !DAT_MASK) | word);
    }

    fn drive_strength(&mut self, _drive: u32) {}

    fn disable_irq(&mut self) {}

    fn enable_irq(&mut self) {}
}
