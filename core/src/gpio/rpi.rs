//! Memory-mapped GPIO backend for Raspberry Pi class boards
//!
//! Maps the SoC peripheral window from `/dev/mem` and drives the GPIO
//! block registers directly; the handshake hot path is one volatile
//! load for a full bus sample and at most three aligned stores for a
//! data byte. Function-select state is cached to avoid read-modify-
//! write cycles on the hardware registers.

use std::fs::{File, OpenOptions};
use std::ptr;

use log::*;
use memmap2::{MmapMut, MmapOptions};
use strum::IntoEnumIterator;

use crate::board::{Board, Level, Pin, SignalControlMode};
use crate::bus::InitError;
use crate::gpio::{GpioDirection, GpioPull, PinIo};
use crate::signal::{Signal, odd_parity};
use crate::timer::SysTimer;

// Peripheral block offsets
const GPIO_OFFSET: usize = 0x0020_0000;
const PADS_OFFSET: usize = 0x0010_0000;
const IRPT_OFFSET: usize = 0x0000_B200;
const QA7_OFFSET: usize = 0x0100_0000;

// GPIO block word indices
const GPIO_FSEL_0: usize = 0;
const GPIO_SET_0: usize = 7;
const GPIO_CLR_0: usize = 10;
const GPIO_LEV_0: usize = 13;
const GPIO_PUD: usize = 37;
const GPIO_CLK_0: usize = 38;
const GPIO_PUPPDN0: usize = 57;

// Pad control word index for GPIO 0..27
const PAD_0_27: usize = 11;

// Legacy interrupt controller word indices
const IRPT_ENB_IRQ_1: usize = 4;
const IRPT_DIS_IRQ_1: usize = 7;

// Quad-A7 core timer interrupt control for core 0
const QA7_CORE0_TINTC: usize = 16;

// GIC-400 (Pi 4)
const ARM_GICD_BASE: u64 = 0xFF84_1000;
const ARM_GICC_BASE: u64 = 0xFF84_2000;
const GICC_PMR: usize = 1;

/// Raspberry Pi generation, determined from the peripheral base address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    /// BCM2835 (Pi 1 / Zero): legacy interrupt controller
    Pi1,
    /// BCM2836/7 (Pi 2 / 3): per-core timer interrupt control
    Pi2,
    /// BCM2711 (Pi 4): GIC-400
    Pi4,
}

/// Precomputed register writes for "set data bus to byte b"
enum DatTables {
    /// SCSI-logic boards: three function-select words per byte (mask
    /// and set), flipping data lines between input and output-low
    Fsel {
        msk: Box<[[u32; 256]; 3]>,
        set: Box<[[u32; 256]; 3]>,
    },
    /// Converter boards: one CLR and one SET word per byte
    SetClr {
        clr: Box<[u32; 256]>,
        set: Box<[u32; 256]>,
    },
}

pub struct RpiIo {
    board: &'static Board,
    generation: Generation,

    _map: MmapMut,
    gpio: *mut u32,
    level: *const u32,
    pads: *mut u32,
    irpctl: *mut u32,
    qa7: *mut u32,
    _gic_map: Option<MmapMut>,
    gicc: *mut u32,

    /// Cached function-select registers
    gpfsel: [u32; 4],
    dat: DatTables,
    /// (raw line position, canonical bit position) pairs
    repack: Vec<(u32, u32)>,

    irq_depth: u32,
    saved_pmr: u32,
    saved_tint_core: usize,
    saved_tintctl: u32,
    saved_irptenb: u32,
}

// The raw pointers alias the mappings held in `_map`/`_gic_map`, which
// live exactly as long as the backend itself.
unsafe impl Send for RpiIo {}

/// Reads a big-endian address word out of the device-tree ranges file
fn dt_ranges_word(file: &str, offset: u64) -> Option<u32> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = File::open(file).ok()?;
    f.seek(SeekFrom::Start(offset)).ok()?;
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf).ok()?;
    Some(u32::from_be_bytes(buf))
}

/// SoC peripheral base address for this board
fn peripheral_base() -> u32 {
    const RANGES: &str = "/proc/device-tree/soc/ranges";
    let mut address = dt_ranges_word(RANGES, 4).unwrap_or(!0);
    if address == 0 {
        address = dt_ranges_word(RANGES, 8).unwrap_or(!0);
    }
    if address == !0 { 0x2000_0000 } else { address }
}

impl RpiIo {
    pub fn new(board: &'static Board) -> Result<Self, InitError> {
        let baseaddr = peripheral_base();
        trace!("Peripheral base address: {baseaddr:08X}");

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|e| InitError::BackendUnavailable(format!("/dev/mem: {e}")))?;

        let mut map = unsafe {
            MmapOptions::new()
                .offset(u64::from(baseaddr))
                .len(QA7_OFFSET + 0x100)
                .map_mut(&mem)
                .map_err(|e| InitError::BackendUnavailable(format!("peripheral mmap: {e}")))?
        };

        let generation = match baseaddr {
            0xFE00_0000 => Generation::Pi4,
            0x3F00_0000 => Generation::Pi2,
            _ => Generation::Pi1,
        };
        debug!("GPIO backend on {generation:?} class hardware");

        let base = map.as_mut_ptr().cast::<u32>();
        let gpio = unsafe { base.add(GPIO_OFFSET / 4) };
        let level = unsafe { gpio.add(GPIO_LEV_0) }.cast_const();
        let pads = unsafe { base.add(PADS_OFFSET / 4) };
        let irpctl = unsafe { base.add(IRPT_OFFSET / 4) };
        let qa7 = unsafe { base.add(QA7_OFFSET / 4) };

        SysTimer::init_rpi(u64::from(baseaddr))
            .map_err(|e| InitError::BackendUnavailable(format!("system timer: {e:#}")))?;

        let (gic_map, gicc) = if generation == Generation::Pi4 {
            let mut gmap = unsafe {
                MmapOptions::new()
                    .offset(ARM_GICD_BASE)
                    .len(8192)
                    .map_mut(&mem)
                    .map_err(|e| InitError::BackendUnavailable(format!("GIC mmap: {e}")))?
            };
            let gicc = unsafe {
                gmap.as_mut_ptr()
                    .cast::<u32>()
                    .add((ARM_GICC_BASE - ARM_GICD_BASE) as usize / 4)
            };
            (Some(gmap), gicc)
        } else {
            (None, ptr::null_mut())
        };

        let mut gpfsel = [0u32; 4];
        for (i, slot) in gpfsel.iter_mut().enumerate() {
            *slot = unsafe { ptr::read_volatile(gpio.add(GPIO_FSEL_0 + i).cast_const()) };
        }

        let mut io = Self {
            board,
            generation,
            _map: map,
            gpio,
            level,
            pads,
            irpctl,
            qa7,
            _gic_map: gic_map,
            gicc,
            gpfsel,
            dat: Self::make_tables(board),
            repack: Self::make_repack(board),
            irq_depth: 0,
            saved_pmr: 0,
            saved_tint_core: 0,
            saved_tintctl: 0,
            saved_irptenb: 0,
        };

        // 16 mA pads while we own the bus
        io.drive_strength(7);

        Ok(io)
    }

    /// Builds the per-byte register write tables for the data bus. The
    /// parity line is folded into bit 8 so one table store drives value
    /// and parity together.
    fn make_tables(board: &'static Board) -> DatTables {
        let pintbl: [u32; 9] = [
            board.dt0.pos(),
            board.dt1.pos(),
            board.dt2.pos(),
            board.dt3.pos(),
            board.dt4.pos(),
            board.dt5.pos(),
            board.dt6.pos(),
            board.dt7.pos(),
            board.dp.pos(),
        ];

        match board.signal_control_mode {
            SignalControlMode::ScsiLogic => {
                let mut msk = Box::new([[!0u32; 256]; 3]);
                let mut set = Box::new([[0u32; 256]; 3]);
                for i in 0..256usize {
                    let mut bits = i as u32;
                    if odd_parity(i as u8) {
                        bits |= 1 << 8;
                    }
                    for &pin in &pintbl {
                        let index = (pin / 10) as usize;
                        let shift = (pin % 10) * 3;
                        msk[index][i] &= !(0x7 << shift);
                        if bits & 1 != 0 {
                            set[index][i] |= 1 << shift;
                        }
                        bits >>= 1;
                    }
                }
                DatTables::Fsel { msk, set }
            }
            mode => {
                let mut clr = Box::new([0u32; 256]);
                let mut set = Box::new([0u32; 256]);
                for i in 0..256usize {
                    let mut bits = i as u32;
                    if odd_parity(i as u8) {
                        bits |= 1 << 8;
                    }
                    if mode == SignalControlMode::NegativeConverter {
                        bits = !bits;
                    }
                    for &pin in &pintbl {
                        if bits & 1 != 0 {
                            set[i] |= 1 << pin;
                        } else {
                            clr[i] |= 1 << pin;
                        }
                        bits >>= 1;
                    }
                }
                DatTables::SetClr { clr, set }
            }
        }
    }

    fn make_repack(board: &'static Board) -> Vec<(u32, u32)> {
        Signal::iter()
            .filter_map(|sig| {
                board
                    .signal_pin(sig)
                    .map(|pin| (pin.pos(), sig.pos()))
            })
            .collect()
    }

    fn gpio_read(&self, index: usize) -> u32 {
        unsafe { ptr::read_volatile(self.gpio.add(index).cast_const()) }
    }

    fn gpio_write(&mut self, index: usize, value: u32) {
        unsafe { ptr::write_volatile(self.gpio.add(index), value) };
    }
}

impl PinIo for RpiIo {
    fn pin_config(&mut self, pin: Pin, direction: GpioDirection) {
        let index = (pin.pos() / 10) as usize;
        let shift = (pin.pos() % 10) * 3;
        let mut data = self.gpio_read(GPIO_FSEL_0 + index) & !(0x7 << shift);
        if direction == GpioDirection::Output {
            data |= 1 << shift;
        }
        self.gpio_write(GPIO_FSEL_0 + index, data);
        self.gpfsel[index] = data;
    }

    fn pull_config(&mut self, pin: Pin, pull: GpioPull) {
        let line = pin.pos() & 0x1F;
        if self.generation == Generation::Pi4 {
            let pval = match pull {
                GpioPull::None => 0,
                GpioPull::Up => 1,
                GpioPull::Down => 2,
            };
            let index = GPIO_PUPPDN0 + (line >> 4) as usize;
            let shift = (line & 0xF) << 1;
            let mut bits = self.gpio_read(index);
            bits &= !(3 << shift);
            bits |= pval << shift;
            self.gpio_write(index, bits);
        } else {
            let pval = match pull {
                GpioPull::None => 0,
                GpioPull::Down => 1,
                GpioPull::Up => 2,
            };
            self.gpio_write(GPIO_PUD, pval);
            SysTimer::sleep_us(2);
            self.gpio_write(GPIO_CLK_0, 1 << line);
            SysTimer::sleep_us(2);
            self.gpio_write(GPIO_PUD, 0);
            self.gpio_write(GPIO_CLK_0, 0);
        }
    }

    fn pin_set(&mut self, pin: Pin, level: Level) {
        if level == Level::High {
            self.gpio_write(GPIO_SET_0, 1 << pin.pos());
        } else {
            self.gpio_write(GPIO_CLR_0, 1 << pin.pos());
        }
    }

    fn signal_set(&mut self, pin: Pin, asserted: bool) {
        match self.board.signal_control_mode {
            SignalControlMode::ScsiLogic => {
                // Open-collector emulation: assert by driving the line
                // as an output (preset low), release by reverting to
                // an input
                let index = (pin.pos() / 10) as usize;
                let shift = (pin.pos() % 10) * 3;
                let mut data = self.gpfsel[index];
                if asserted {
                    data |= 1 << shift;
                } else {
                    data &= !(0x7 << shift);
                }
                self.gpio_write(GPIO_FSEL_0 + index, data);
                self.gpfsel[index] = data;
            }
            SignalControlMode::NegativeConverter => {
                if asserted {
                    self.gpio_write(GPIO_CLR_0, 1 << pin.pos());
                } else {
                    self.gpio_write(GPIO_SET_0, 1 << pin.pos());
                }
            }
            SignalControlMode::PositiveConverter => {
                if asserted {
                    self.gpio_write(GPIO_SET_0, 1 << pin.pos());
                } else {
                    self.gpio_write(GPIO_CLR_0, 1 << pin.pos());
                }
            }
        }
    }

    fn signal_dir(&mut self, pin: Pin, direction: GpioDirection) {
        if self.board.signal_control_mode == SignalControlMode::ScsiLogic
            && direction == GpioDirection::Output
        {
            // Outputs materialize through signal_set on these boards
            return;
        }
        let index = (pin.pos() / 10) as usize;
        let shift = (pin.pos() % 10) * 3;
        let mut data = self.gpfsel[index] & !(0x7 << shift);
        if direction == GpioDirection::Output {
            data |= 1 << shift;
        }
        self.gpio_write(GPIO_FSEL_0 + index, data);
        self.gpfsel[index] = data;
    }

    fn acquire(&mut self) -> u32 {
        let mut raw = unsafe { ptr::read_volatile(self.level) };
        if self.board.signal_control_mode.inverted_input() {
            raw = !raw;
        }
        let mut out = 0;
        for &(r, c) in &self.repack {
            out |= ((raw >> r) & 1) << c;
        }
        out
    }

    fn set_dat(&mut self, dat: u8) {
        let i = dat as usize;
        match &self.dat {
            DatTables::Fsel { msk, set } => {
                let words = [
                    (msk[0][i], set[0][i]),
                    (msk[1][i], set[1][i]),
                    (msk[2][i], set[2][i]),
                ];
                for (index, (m, s)) in words.into_iter().enumerate() {
                    let fsel = (self.gpfsel[index] & m) | s;
                    if fsel != self.gpfsel[index] {
                        self.gpfsel[index] = fsel;
                        self.gpio_write(GPIO_FSEL_0 + index, fsel);
                    }
                }
            }
            DatTables::SetClr { clr, set } => {
                let (c, s) = (clr[i], set[i]);
                self.gpio_write(GPIO_CLR_0, c);
                self.gpio_write(GPIO_SET_0, s);
            }
        }
    }

    fn drive_strength(&mut self, drive: u32) {
        let data = unsafe { ptr::read_volatile(self.pads.add(PAD_0_27).cast_const()) };
        unsafe {
            ptr::write_volatile(
                self.pads.add(PAD_0_27),
                (data & 0xFFFF_FFF8) | drive | 0x5A00_0000,
            );
        }
    }

    fn disable_irq(&mut self) {
        self.irq_depth += 1;
        if self.irq_depth > 1 {
            return;
        }
        match self.generation {
            Generation::Pi4 => {
                // Mask all interrupt priorities at the GIC CPU interface
                self.saved_pmr = unsafe { ptr::read_volatile(self.gicc.add(GICC_PMR).cast_const()) };
                unsafe { ptr::write_volatile(self.gicc.add(GICC_PMR), 0) };
            }
            Generation::Pi2 => {
                let core = unsafe { nix::libc::sched_getcpu() }.max(0) as usize;
                self.saved_tint_core = core + QA7_CORE0_TINTC;
                self.saved_tintctl =
                    unsafe { ptr::read_volatile(self.qa7.add(self.saved_tint_core).cast_const()) };
                unsafe { ptr::write_volatile(self.qa7.add(self.saved_tint_core), 0) };
            }
            Generation::Pi1 => {
                self.saved_irptenb =
                    unsafe { ptr::read_volatile(self.irpctl.add(IRPT_ENB_IRQ_1).cast_const()) };
                unsafe {
                    ptr::write_volatile(self.irpctl.add(IRPT_DIS_IRQ_1), self.saved_irptenb & 0xF);
                }
            }
        }
    }

    fn enable_irq(&mut self) {
        if self.irq_depth == 0 {
            return;
        }
        self.irq_depth -= 1;
        if self.irq_depth > 0 {
            return;
        }
        match self.generation {
            Generation::Pi4 => {
                unsafe { ptr::write_volatile(self.gicc.add(GICC_PMR), self.saved_pmr) };
            }
            Generation::Pi2 => {
                unsafe {
                    ptr::write_volatile(self.qa7.add(self.saved_tint_core), self.saved_tintctl);
                }
            }
            Generation::Pi1 => {
                unsafe {
                    ptr::write_volatile(self.irpctl.add(IRPT_ENB_IRQ_1), self.saved_irptenb & 0xF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::FULLSPEC;

    #[test]
    fn fsel_tables_cover_data_pins() {
        let DatTables::Fsel { msk, set } = RpiIo::make_tables(&FULLSPEC) else {
            panic!("fullspec is a SCSI-logic board");
        };

        // 0x00: all nine lines masked to input except parity (odd
        // parity of 0x00 is 1, so DP drives)
        let dp = FULLSPEC.dp.pos();
        let dp_index = (dp / 10) as usize;
        let dp_shift = (dp % 10) * 3;
        assert_eq!(set[dp_index][0] >> dp_shift & 0x7, 1);

        // Every data pin's function-select field is cleared by the mask
        for pin in [
            FULLSPEC.dt0, FULLSPEC.dt1, FULLSPEC.dt2, FULLSPEC.dt3, FULLSPEC.dt4, FULLSPEC.dt5,
            FULLSPEC.dt6, FULLSPEC.dt7, FULLSPEC.dp,
        ] {
            let index = (pin.pos() / 10) as usize;
            let shift = (pin.pos() % 10) * 3;
            assert_eq!(msk[index][0x55] >> shift & 0x7, 0);
        }

        // 0xFF has even parity: eight data lines drive, DP does not
        for pin in [
            FULLSPEC.dt0, FULLSPEC.dt1, FULLSPEC.dt2, FULLSPEC.dt3, FULLSPEC.dt4, FULLSPEC.dt5,
            FULLSPEC.dt6, FULLSPEC.dt7,
        ] {
            let index = (pin.pos() / 10) as usize;
            let shift = (pin.pos() % 10) * 3;
            assert_eq!(set[index][0xFF] >> shift & 0x7, 1, "pin {}", pin.0);
        }
        assert_eq!(set[dp_index][0xFF] >> dp_shift & 0x7, 0);
    }

    #[test]
    fn setclr_tables_fold_parity() {
        let DatTables::SetClr { clr, set } = RpiIo::make_tables(&crate::board::AIBOM) else {
            panic!("aibom is a converter board");
        };

        for i in 0..256usize {
            let want_dp = odd_parity(i as u8);
            let dp_mask = 1u32 << crate::board::AIBOM.dp.pos();
            assert_eq!(set[i] & dp_mask != 0, want_dp, "byte {i:02X}");
            assert_eq!(clr[i] & dp_mask != 0, !want_dp, "byte {i:02X}");
            // SET and CLR never overlap
            assert_eq!(set[i] & clr[i], 0);
        }
    }

    #[test]
    fn repack_is_bijective() {
        let repack = RpiIo::make_repack(&FULLSPEC);
        let mut raw_seen = 0u64;
        let mut canon_seen = 0u64;
        for &(r, c) in &repack {
            assert_eq!(raw_seen & (1 << r), 0);
            assert_eq!(canon_seen & (1 << c), 0);
            raw_seen |= 1 << r;
            canon_seen |= 1 << c;
        }
        // 18 SCSI signals plus 5 control lines
        assert_eq!(repack.len(), 23);
    }
}
