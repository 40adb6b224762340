//! Loopback self-test
//!
//! Exercises every SCSI signal, both transceiver directions and all
//! data lines through an external loopback cable that pairs up the bus
//! signals. Also validates the system timer. Each check appends a
//! named mismatch to the caller's error list; a fully silent run means
//! the board, cable and timer all check out.

use std::io::Write;

use log::*;

use crate::bus::Bus;
use crate::gpio::{GpioDirection, GpioPull};
use crate::signal::Signal;
use crate::timer::SysTimer;

/// One cable connection: driving `signal` must read back on `echo`
/// when the `dir_ctrl` transceiver group is turned to output
#[derive(Debug, Clone, Copy)]
pub struct LoopbackConnection {
    pub signal: Signal,
    pub echo: Signal,
    pub dir_ctrl: Signal,
}

const fn conn(signal: Signal, echo: Signal, dir_ctrl: Signal) -> LoopbackConnection {
    LoopbackConnection {
        signal,
        echo,
        dir_ctrl,
    }
}

/// The loopback cable pairing. Every SCSI signal appears exactly once
/// as the driven side.
pub const LOOPBACK_CONNECTIONS: [LoopbackConnection; 18] = [
    conn(Signal::Dt0, Signal::Ack, Signal::Dtd),
    conn(Signal::Dt1, Signal::Sel, Signal::Dtd),
    conn(Signal::Dt2, Signal::Atn, Signal::Dtd),
    conn(Signal::Dt3, Signal::Rst, Signal::Dtd),
    conn(Signal::Dt4, Signal::Cd, Signal::Dtd),
    conn(Signal::Dt5, Signal::Io, Signal::Dtd),
    conn(Signal::Dt6, Signal::Msg, Signal::Dtd),
    conn(Signal::Dt7, Signal::Req, Signal::Dtd),
    conn(Signal::Dp, Signal::Bsy, Signal::Dtd),
    conn(Signal::Atn, Signal::Dt2, Signal::Ind),
    conn(Signal::Rst, Signal::Dt3, Signal::Ind),
    conn(Signal::Ack, Signal::Dt0, Signal::Ind),
    conn(Signal::Req, Signal::Dt7, Signal::Tad),
    conn(Signal::Msg, Signal::Dt6, Signal::Tad),
    conn(Signal::Cd, Signal::Dt4, Signal::Tad),
    conn(Signal::Io, Signal::Dt5, Signal::Tad),
    conn(Signal::Bsy, Signal::Dp, Signal::Tad),
    conn(Signal::Sel, Signal::Dt1, Signal::Ind),
];

/// Signals encoded onto the data byte by the data input/output tests,
/// in bit order
const DAT_ENCODE: [Signal; 8] = [
    Signal::Ack,
    Signal::Sel,
    Signal::Atn,
    Signal::Rst,
    Signal::Cd,
    Signal::Io,
    Signal::Msg,
    Signal::Req,
];

/// Settling time between a pin change and the readback
const SETTLE_US: u32 = 1000;

fn start_test(name: &str) {
    print!("Testing {name} ");
    let _ = std::io::stdout().flush();
}

fn progress() {
    print!(".");
    let _ = std::io::stdout().flush();
}

fn finish_test(name: &str, errors: usize) {
    if errors == 0 {
        println!(" {name}: OK");
    } else {
        println!(" {name}: {errors} error(s)");
    }
}

pub struct LoopbackTester<'a> {
    bus: &'a mut dyn Bus,
}

impl<'a> LoopbackTester<'a> {
    pub fn new(bus: &'a mut dyn Bus) -> Self {
        Self { bus }
    }

    /// Turns exactly one transceiver group to output; `None` flips
    /// everything to input
    fn set_output_channel(&mut self, out: Option<Signal>) {
        let board = self.bus.board();
        let tad = if out == Some(Signal::Tad) {
            board.tad_out()
        } else {
            board.tad_in()
        };
        let dtd = if out == Some(Signal::Dtd) {
            board.dtd_out()
        } else {
            board.dtd_in()
        };
        let ind = if out == Some(Signal::Ind) {
            board.ind_out()
        } else {
            board.ind_in()
        };
        self.bus.set_control(Signal::Tad, tad);
        self.bus.set_control(Signal::Dtd, dtd);
        self.bus.set_control(Signal::Ind, ind);
    }

    /// All SCSI lines to outputs (released), pulls off, direction
    /// controls ready
    fn loopback_setup(&mut self) {
        for c in LOOPBACK_CONNECTIONS {
            self.bus.pin_config(c.signal, GpioDirection::Output);
            self.bus.pull_config(c.signal, GpioPull::None);
        }
        for ctrl in [Signal::Ind, Signal::Tad, Signal::Dtd] {
            self.bus.pin_config(ctrl, GpioDirection::Output);
        }
    }

    /// Tests one cable connection end to end
    fn test_pin(
        &mut self,
        rec: LoopbackConnection,
        errors: &mut Vec<String>,
        adapter_missing: &mut bool,
    ) -> usize {
        let mut err_count = 0;

        self.set_output_channel(Some(rec.dir_ctrl));
        SysTimer::sleep_us(SETTLE_US);

        // Release every line to a known state
        for c in LOOPBACK_CONNECTIONS {
            self.bus.set_pin_direction(c.signal, GpioDirection::Input);
        }
        SysTimer::sleep_us(SETTLE_US);
        self.bus.acquire();

        // Drive the pin under test
        self.bus.set_pin_direction(rec.signal, GpioDirection::Output);
        self.bus.set_signal(rec.signal, true);
        SysTimer::sleep_us(SETTLE_US);
        self.bus.acquire();

        for c in LOOPBACK_CONNECTIONS {
            progress();
            let val = self.bus.get_signal(c.signal);
            trace!("{} is {}", c.signal.label(), u8::from(val));

            if c.signal == rec.signal {
                if !val {
                    errors.push(format!(
                        "Loopback test: commanded {} low, but it did not respond",
                        rec.signal.label()
                    ));
                    err_count += 1;
                }
            } else if c.signal == rec.echo {
                if val {
                    *adapter_missing = false;
                } else {
                    errors.push(format!(
                        "Loopback test: {} should be driven low by {}, but it did not follow",
                        c.signal.label(),
                        rec.signal.label()
                    ));
                    err_count += 1;
                }
            } else if val {
                errors.push(format!(
                    "Loopback test: {} was pulled low when it shouldn't be",
                    c.signal.label()
                ));
                err_count += 1;
            }
        }

        // All transceivers to input: the driven line must self-read,
        // the echo must drop
        self.set_output_channel(None);
        SysTimer::sleep_us(SETTLE_US);
        self.bus.acquire();

        for c in LOOPBACK_CONNECTIONS {
            progress();
            let val = self.bus.get_signal(c.signal);

            if c.signal == rec.signal {
                if !val {
                    errors.push(format!(
                        "Loopback test: commanded {} low, but it did not respond",
                        rec.signal.label()
                    ));
                    err_count += 1;
                }
            } else if val {
                errors.push(format!(
                    "Loopback test: {} was pulled low when it shouldn't be",
                    c.signal.label()
                ));
                err_count += 1;
            }
        }

        // Back to output, release the pin: everything reads high
        self.set_output_channel(Some(rec.dir_ctrl));
        SysTimer::sleep_us(SETTLE_US);
        self.bus.set_pin_direction(rec.signal, GpioDirection::Output);
        self.bus.set_signal(rec.signal, false);
        SysTimer::sleep_us(SETTLE_US);
        self.bus.acquire();

        for c in LOOPBACK_CONNECTIONS {
            progress();
            if self.bus.get_signal(c.signal) {
                errors.push(format!(
                    "Loopback test: {} was pulled low when it shouldn't be",
                    c.signal.label()
                ));
                err_count += 1;
            }
        }

        finish_test(rec.signal.label(), err_count);
        err_count
    }

    /// Drives every signal in turn and asserts the cable's reciprocal
    /// reads. Returns the total mismatch count.
    pub fn run_loopback_test(&mut self, errors: &mut Vec<String>) -> usize {
        let mut total = 0;
        let mut adapter_missing = true;

        self.loopback_setup();
        for rec in LOOPBACK_CONNECTIONS {
            start_test(rec.signal.label());
            total += self.test_pin(rec, errors, &mut adapter_missing);
        }

        if adapter_missing {
            errors.push(
                "All loop-backed signals failed. Is the loopback cable connected?".to_owned(),
            );
        }
        total
    }

    /// Cycles all 256 byte values through the initiator-side signals
    /// and reads them back off the data lines
    pub fn run_data_input_test(&mut self, errors: &mut Vec<String>) -> usize {
        let mut err_count = 0;

        for c in LOOPBACK_CONNECTIONS {
            self.bus.pin_config(c.signal, GpioDirection::Output);
            self.bus.pull_config(c.signal, GpioPull::None);
        }
        for sig in Signal::DATA {
            self.bus.pin_config(sig, GpioDirection::Input);
        }
        let board = self.bus.board();
        let (dtd, tad, ind) = (board.dtd_in(), board.tad_out(), board.ind_out());
        self.bus.set_control(Signal::Dtd, dtd);
        self.bus.set_control(Signal::Tad, tad);
        self.bus.set_control(Signal::Ind, ind);

        start_test("data inputs ");
        for val in 0..=255u8 {
            for (bit, sig) in DAT_ENCODE.iter().enumerate() {
                self.bus.set_signal(*sig, (val >> bit) & 1 != 0);
            }
            SysTimer::sleep_us(SETTLE_US);

            self.bus.acquire();
            let read = self.bus.get_dat();
            if read != val {
                errors.push(format!(
                    "DAT inputs: expected value {val} but got {read}"
                ));
                err_count += 1;
            }
            if val % 8 == 0 {
                progress();
            }
        }
        finish_test("data inputs", err_count);

        for sig in DAT_ENCODE {
            self.bus.set_signal(sig, false);
        }
        err_count
    }

    /// Drives all 256 byte values onto the data lines and reads them
    /// back through the initiator-side signals
    pub fn run_data_output_test(&mut self, errors: &mut Vec<String>) -> usize {
        let mut err_count = 0;

        for c in LOOPBACK_CONNECTIONS {
            self.bus.pin_config(c.signal, GpioDirection::Input);
            self.bus.pull_config(c.signal, GpioPull::None);
        }
        for sig in Signal::DATA {
            self.bus.pin_config(sig, GpioDirection::Output);
        }
        let board = self.bus.board();
        let (dtd, tad, ind) = (board.dtd_out(), board.tad_in(), board.ind_in());
        self.bus.set_control(Signal::Dtd, dtd);
        self.bus.set_control(Signal::Tad, tad);
        self.bus.set_control(Signal::Ind, ind);

        start_test("data outputs");
        for val in 0..=255u8 {
            self.bus.set_dat(val);
            SysTimer::sleep_us(SETTLE_US);

            self.bus.acquire();
            let mut read = 0u8;
            for (bit, sig) in DAT_ENCODE.iter().enumerate() {
                read |= u8::from(self.bus.get_signal(*sig)) << bit;
            }
            if read != val {
                errors.push(format!(
                    "DAT outputs: expected value {val} but got {read}"
                ));
                err_count += 1;
            }
            if val % 8 == 0 {
                progress();
            }
        }
        finish_test("data outputs", err_count);
        err_count
    }
}

/// Validates the system timer clocks and sleeps against wall time,
/// allowing 2% tolerance
pub fn run_timer_test(errors: &mut Vec<String>) -> usize {
    const TOLERANCE: f64 = 0.02;
    let mut err_count = 0;

    let in_tolerance = |elapsed: u64, expected: u64| {
        let lo = (expected as f64 * (1.0 - TOLERANCE)) as u64;
        let hi = (expected as f64 * (1.0 + TOLERANCE)) as u64;
        (lo..=hi).contains(&elapsed)
    };

    start_test("system timer");

    // One second of the microsecond counter
    let before = SysTimer::monotonic_us();
    for _ in 0..10 {
        SysTimer::sleep_us(100_000);
        progress();
    }
    let elapsed = SysTimer::monotonic_us() - before;
    debug!("Elapsed time: {elapsed} us");
    if in_tolerance(elapsed, 1_000_000) {
        progress();
    } else {
        errors.push(format!(
            "Timer test: expected approx 1000000 us, but measured {elapsed}"
        ));
        err_count += 1;
    }

    // 100 x 1 ms sleeps
    let before = SysTimer::monotonic_us();
    for _ in 0..100 {
        SysTimer::sleep_us(1000);
    }
    let elapsed = SysTimer::monotonic_us() - before;
    debug!("sleep_us average: {} us", elapsed / 100);
    if in_tolerance(elapsed, 100_000) {
        progress();
    } else {
        errors.push(format!(
            "sleep_us test: expected approx 100000 us, but measured {elapsed}"
        ));
        err_count += 1;
    }

    // One millisecond nanosecond sleep
    let before = SysTimer::monotonic_ns();
    SysTimer::sleep_ns(1_000_000);
    let elapsed = SysTimer::monotonic_ns() - before;
    debug!("sleep_ns: {elapsed} ns (expected ~1000000)");
    if in_tolerance(elapsed, 1_000_000) {
        progress();
    } else {
        errors.push(format!(
            "sleep_ns test: expected approx 1000000 ns, but measured {elapsed}"
        ));
        err_count += 1;
    }

    finish_test("system timer", err_count);
    err_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, FULLSPEC, Level, Pin};
    use crate::bus::{BusMode, ScsiEngine};
    use crate::gpio::PinIo;
    use crate::signal::odd_parity;

    /// Pin backend emulating the loopback cable on the full-spec
    /// board: driving a line mirrors it onto its paired line whenever
    /// the pair's transceiver group is turned to output.
    struct CableIo {
        board: &'static Board,
        driven: [bool; 32],
        tad: Level,
        ind: Level,
        dtd: Level,
    }

    impl CableIo {
        fn new(board: &'static Board) -> Self {
            Self {
                board,
                driven: [false; 32],
                tad: board.tad_in(),
                ind: board.ind_in(),
                dtd: board.dtd_in(),
            }
        }

        fn group_out(&self, dir_ctrl: Signal) -> bool {
            match dir_ctrl {
                Signal::Tad => self.tad == self.board.tad_out(),
                Signal::Ind => self.ind == self.board.ind_out(),
                Signal::Dtd => self.dtd == self.board.dtd_out(),
                _ => false,
            }
        }
    }

    impl PinIo for CableIo {
        fn pin_config(&mut self, _pin: Pin, _direction: crate::gpio::GpioDirection) {}

        fn pull_config(&mut self, _pin: Pin, _pull: crate::gpio::GpioPull) {}

        fn pin_set(&mut self, pin: Pin, level: Level) {
            if Some(pin) == self.board.tad {
                self.tad = level;
            } else if Some(pin) == self.board.ind {
                self.ind = level;
            } else if Some(pin) == self.board.dtd {
                self.dtd = level;
            } else {
                self.driven[pin.pos() as usize] = level == Level::High;
            }
        }

        fn signal_set(&mut self, pin: Pin, asserted: bool) {
            self.driven[pin.pos() as usize] = asserted;
        }

        fn signal_dir(&mut self, pin: Pin, direction: crate::gpio::GpioDirection) {
            // Input releases the line (open collector); output
            // direction materializes through signal_set
            if direction == crate::gpio::GpioDirection::Input {
                self.driven[pin.pos() as usize] = false;
            }
        }

        fn acquire(&mut self) -> u32 {
            let mut word = 0;
            for sig in Signal::SCSI {
                let pin = self.board.signal_pin(sig).unwrap();
                if self.driven[pin.pos() as usize] {
                    word |= sig.mask();
                }
            }
            // Cable propagation through enabled transceivers
            for c in LOOPBACK_CONNECTIONS {
                let pin = self.board.signal_pin(c.signal).unwrap();
                if self.driven[pin.pos() as usize] && self.group_out(c.dir_ctrl) {
                    word |= c.echo.mask();
                }
            }
            word
        }

        fn set_dat(&mut self, dat: u8) {
            let data_pins = [
                self.board.dt0,
                self.board.dt1,
                self.board.dt2,
                self.board.dt3,
                self.board.dt4,
                self.board.dt5,
                self.board.dt6,
                self.board.dt7,
            ];
            for (bit, pin) in data_pins.iter().enumerate() {
                self.driven[pin.pos() as usize] = (dat >> bit) & 1 != 0;
            }
            self.driven[self.board.dp.pos() as usize] = odd_parity(dat);
        }

        fn drive_strength(&mut self, _drive: u32) {}

        fn disable_irq(&mut self) {}

        fn enable_irq(&mut self) {}
    }

    fn cable_bus() -> ScsiEngine<CableIo> {
        let mut bus = ScsiEngine::new(CableIo::new(&FULLSPEC), &FULLSPEC, BusMode::Target);
        bus.init();
        bus
    }

    #[test]
    fn loopback_passes_on_healthy_cable() {
        let mut bus = cable_bus();
        let mut errors = Vec::new();
        let failures = LoopbackTester::new(&mut bus).run_loopback_test(&mut errors);
        assert_eq!(failures, 0, "{errors:?}");
        assert!(errors.is_empty());
    }

    #[test]
    fn loopback_reports_missing_cable() {
        struct DeadIo;
        impl PinIo for DeadIo {
            fn pin_config(&mut self, _: Pin, _: crate::gpio::GpioDirection) {}
            fn pull_config(&mut self, _: Pin, _: crate::gpio::GpioPull) {}
            fn pin_set(&mut self, _: Pin, _: Level) {}
            fn signal_set(&mut self, _: Pin, _: bool) {}
            fn signal_dir(&mut self, _: Pin, _: crate::gpio::GpioDirection) {}
            fn acquire(&mut self) -> u32 {
                0
            }
            fn set_dat(&mut self, _: u8) {}
            fn drive_strength(&mut self, _: u32) {}
            fn disable_irq(&mut self) {}
            fn enable_irq(&mut self) {}
        }

        let mut bus = ScsiEngine::new(DeadIo, &FULLSPEC, BusMode::Target);
        let mut errors = Vec::new();
        let failures = LoopbackTester::new(&mut bus).run_loopback_test(&mut errors);
        assert!(failures > 0);
        assert!(errors.iter().any(|e| e.contains("loopback cable")));
    }

    #[test]
    fn data_input_sweep() {
        let mut bus = cable_bus();
        let mut errors = Vec::new();
        let failures = LoopbackTester::new(&mut bus).run_data_input_test(&mut errors);
        assert_eq!(failures, 0, "{errors:?}");
    }

    #[test]
    fn data_output_sweep() {
        let mut bus = cable_bus();
        let mut errors = Vec::new();
        let failures = LoopbackTester::new(&mut bus).run_data_output_test(&mut errors);
        assert_eq!(failures, 0, "{errors:?}");
    }

    #[test]
    fn every_signal_driven_exactly_once() {
        let mut seen = 0u32;
        for c in LOOPBACK_CONNECTIONS {
            assert_eq!(seen & c.signal.mask(), 0, "{:?} repeated", c.signal);
            seen |= c.signal.mask();
        }
        for sig in Signal::SCSI {
            assert_ne!(seen & sig.mask(), 0, "{sig:?} never driven");
        }
    }

    #[test]
    fn timer_self_test_smoke() {
        // Host sleeps overshoot; only assert the test runs and reports
        // coherently (no panic, count matches list length)
        let mut errors = Vec::new();
        let failures = run_timer_test(&mut errors);
        assert_eq!(failures, errors.len());
    }
}
