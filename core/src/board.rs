//! Board descriptors
//!
//! One immutable table per supported interface board, mapping logical
//! SCSI signals to Broadcom GPIO lines and recording the board's
//! control-line polarities and transceiver conventions.

use strum::IntoStaticStr;

use crate::signal::Signal;

/// A Broadcom GPIO line number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin(pub u8);

impl Pin {
    /// Bit position of this line in the raw GPIO level word
    pub const fn pos(self) -> u32 {
        self.0 as u32
    }
}

/// Electrical level on a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub const fn from_bool(v: bool) -> Self {
        if v { Self::High } else { Self::Low }
    }

    pub const fn to_bool(self) -> bool {
        matches!(self, Self::High)
    }

    pub const fn invert(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// How the board's bus drivers are controlled
///
/// `ScsiLogic` boards connect the GPIO lines to the bus through
/// open-collector drivers: a line is asserted by configuring the GPIO
/// as an output driving low and released by reverting it to an input.
/// The converter variants use active transceivers with negative or
/// positive input logic and drive levels directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalControlMode {
    ScsiLogic,
    NegativeConverter,
    PositiveConverter,
}

impl SignalControlMode {
    /// Raw level words from boards in these modes read inverted with
    /// respect to positive logic
    pub const fn inverted_input(self) -> bool {
        !matches!(self, Self::PositiveConverter)
    }
}

/// Static description of one board variant
pub struct Board {
    /// Human-readable identifier, printed in startup banners
    pub name: &'static str,
    pub signal_control_mode: SignalControlMode,

    // Control signal output logic
    pub act_on: Level,
    pub enb_on: Level,
    pub ind_in: Level,
    pub tad_in: Level,
    pub dtd_in: Level,

    // Control signal pin assignment; `None` when the board lacks the
    // corresponding transceiver or LED
    pub act: Option<Pin>,
    pub enb: Option<Pin>,
    pub ind: Option<Pin>,
    pub tad: Option<Pin>,
    pub dtd: Option<Pin>,

    // SCSI signal pin assignment
    pub dt0: Pin,
    pub dt1: Pin,
    pub dt2: Pin,
    pub dt3: Pin,
    pub dt4: Pin,
    pub dt5: Pin,
    pub dt6: Pin,
    pub dt7: Pin,
    pub dp: Pin,
    pub atn: Pin,
    pub rst: Pin,
    pub ack: Pin,
    pub req: Pin,
    pub msg: Pin,
    pub cd: Pin,
    pub io: Pin,
    pub bsy: Pin,
    pub sel: Pin,
}

impl Board {
    pub const fn act_on(&self) -> Level {
        self.act_on
    }

    pub const fn act_off(&self) -> Level {
        self.act_on.invert()
    }

    pub const fn enb_on(&self) -> Level {
        self.enb_on
    }

    pub const fn enb_off(&self) -> Level {
        self.enb_on.invert()
    }

    pub const fn ind_in(&self) -> Level {
        self.ind_in
    }

    pub const fn ind_out(&self) -> Level {
        self.ind_in.invert()
    }

    pub const fn tad_in(&self) -> Level {
        self.tad_in
    }

    pub const fn tad_out(&self) -> Level {
        self.tad_in.invert()
    }

    pub const fn dtd_in(&self) -> Level {
        self.dtd_in
    }

    pub const fn dtd_out(&self) -> Level {
        self.dtd_in.invert()
    }

    /// GPIO line carrying the given logical signal. SCSI signals are
    /// always assigned; transceiver/LED lines may be absent.
    pub const fn signal_pin(&self, signal: Signal) -> Option<Pin> {
        match signal {
            Signal::Dt0 => Some(self.dt0),
            Signal::Dt1 => Some(self.dt1),
            Signal::Dt2 => Some(self.dt2),
            Signal::Dt3 => Some(self.dt3),
            Signal::Dt4 => Some(self.dt4),
            Signal::Dt5 => Some(self.dt5),
            Signal::Dt6 => Some(self.dt6),
            Signal::Dt7 => Some(self.dt7),
            Signal::Dp => Some(self.dp),
            Signal::Atn => Some(self.atn),
            Signal::Rst => Some(self.rst),
            Signal::Ack => Some(self.ack),
            Signal::Req => Some(self.req),
            Signal::Msg => Some(self.msg),
            Signal::Cd => Some(self.cd),
            Signal::Io => Some(self.io),
            Signal::Bsy => Some(self.bsy),
            Signal::Sel => Some(self.sel),
            Signal::Act => self.act,
            Signal::Enb => self.enb,
            Signal::Ind => self.ind,
            Signal::Tad => self.tad,
            Signal::Dtd => self.dtd,
        }
    }
}

/// Standard board: SCSI logic, no transceiver direction control
pub static STANDARD: Board = Board {
    name: "STANDARD",
    signal_control_mode: SignalControlMode::ScsiLogic,

    act_on: Level::High,
    enb_on: Level::High,
    ind_in: Level::Low,
    tad_in: Level::Low,
    dtd_in: Level::High,

    act: Some(Pin(4)),
    enb: Some(Pin(5)),
    ind: None,
    tad: None,
    dtd: None,

    dt0: Pin(10),
    dt1: Pin(11),
    dt2: Pin(12),
    dt3: Pin(13),
    dt4: Pin(14),
    dt5: Pin(15),
    dt6: Pin(16),
    dt7: Pin(17),
    dp: Pin(18),
    atn: Pin(19),
    rst: Pin(20),
    ack: Pin(21),
    req: Pin(22),
    msg: Pin(23),
    cd: Pin(24),
    io: Pin(25),
    bsy: Pin(26),
    sel: Pin(27),
};

/// Full-spec board: standard pin map plus per-group transceiver control
pub static FULLSPEC: Board = Board {
    name: "FULLSPEC",
    signal_control_mode: SignalControlMode::ScsiLogic,

    act_on: Level::High,
    enb_on: Level::High,
    ind_in: Level::Low,
    tad_in: Level::Low,
    dtd_in: Level::High,

    act: Some(Pin(4)),
    enb: Some(Pin(5)),
    ind: Some(Pin(6)),
    tad: Some(Pin(7)),
    dtd: Some(Pin(8)),

    dt0: Pin(10),
    dt1: Pin(11),
    dt2: Pin(12),
    dt3: Pin(13),
    dt4: Pin(14),
    dt5: Pin(15),
    dt6: Pin(16),
    dt7: Pin(17),
    dp: Pin(18),
    atn: Pin(19),
    rst: Pin(20),
    ack: Pin(21),
    req: Pin(22),
    msg: Pin(23),
    cd: Pin(24),
    io: Pin(25),
    bsy: Pin(26),
    sel: Pin(27),
};

/// AIBOM adapter: positive-logic converter, unique pin map, no
/// target-group direction control
pub static AIBOM: Board = Board {
    name: "AIBOM PRODUCTS version",
    signal_control_mode: SignalControlMode::PositiveConverter,

    act_on: Level::High,
    enb_on: Level::High,
    ind_in: Level::Low,
    tad_in: Level::Low,
    dtd_in: Level::Low,

    act: Some(Pin(4)),
    enb: Some(Pin(17)),
    ind: Some(Pin(27)),
    tad: None,
    dtd: Some(Pin(18)),

    dt0: Pin(6),
    dt1: Pin(12),
    dt2: Pin(13),
    dt3: Pin(16),
    dt4: Pin(19),
    dt5: Pin(20),
    dt6: Pin(26),
    dt7: Pin(21),
    dp: Pin(5),
    atn: Pin(22),
    rst: Pin(25),
    ack: Pin(10),
    req: Pin(7),
    msg: Pin(9),
    cd: Pin(11),
    io: Pin(23),
    bsy: Pin(24),
    sel: Pin(8),
};

/// GAMERnium.com adapter: SCSI logic, unique pin map
pub static GAMERNIUM: Board = Board {
    name: "GAMERnium.com version",
    signal_control_mode: SignalControlMode::ScsiLogic,

    act_on: Level::High,
    enb_on: Level::High,
    ind_in: Level::Low,
    tad_in: Level::Low,
    dtd_in: Level::High,

    act: Some(Pin(14)),
    enb: Some(Pin(6)),
    ind: Some(Pin(7)),
    tad: Some(Pin(8)),
    dtd: Some(Pin(5)),

    dt0: Pin(21),
    dt1: Pin(26),
    dt2: Pin(20),
    dt3: Pin(19),
    dt4: Pin(16),
    dt5: Pin(13),
    dt6: Pin(12),
    dt7: Pin(11),
    dp: Pin(25),
    atn: Pin(10),
    rst: Pin(22),
    ack: Pin(24),
    req: Pin(15),
    msg: Pin(17),
    cd: Pin(18),
    io: Pin(4),
    bsy: Pin(27),
    sel: Pin(23),
};

/// Known board variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BoardType {
    Standard,
    Fullspec,
    Aibom,
    Gamernium,
    /// Shared-memory bus; uses the full-spec pin map
    Virtual,
    Invalid,
}

impl BoardType {
    /// Parses a board/connection type by its first letter, as accepted
    /// on tool command lines. Anything unrecognized is `Invalid`; no
    /// default is assumed here.
    pub fn parse(s: &str) -> Self {
        match s.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('a') => Self::Aibom,
            Some('f') => Self::Fullspec,
            Some('g') => Self::Gamernium,
            Some('n' | 'v') => Self::Virtual,
            Some('s') => Self::Standard,
            _ => Self::Invalid,
        }
    }

    pub const fn board(self) -> Option<&'static Board> {
        match self {
            Self::Standard => Some(&STANDARD),
            Self::Fullspec | Self::Virtual => Some(&FULLSPEC),
            Self::Aibom => Some(&AIBOM),
            Self::Gamernium => Some(&GAMERNIUM),
            Self::Invalid => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_by_first_letter() {
        assert_eq!(BoardType::parse("aibom"), BoardType::Aibom);
        assert_eq!(BoardType::parse("FULLSPEC"), BoardType::Fullspec);
        assert_eq!(BoardType::parse("gamernium"), BoardType::Gamernium);
        assert_eq!(BoardType::parse("none"), BoardType::Virtual);
        assert_eq!(BoardType::parse("virtual"), BoardType::Virtual);
        assert_eq!(BoardType::parse("standard"), BoardType::Standard);
        assert_eq!(BoardType::parse("x"), BoardType::Invalid);
        assert_eq!(BoardType::parse(""), BoardType::Invalid);
    }

    #[test]
    fn virtual_uses_fullspec_map() {
        let b = BoardType::Virtual.board().unwrap();
        assert_eq!(b.name, "FULLSPEC");
        assert!(b.ind.is_some() && b.tad.is_some() && b.dtd.is_some());
    }

    #[test]
    fn invalid_has_no_board() {
        assert!(BoardType::Invalid.board().is_none());
    }

    #[test]
    fn scsi_pins_unique_per_board() {
        for board in [&STANDARD, &FULLSPEC, &AIBOM, &GAMERNIUM] {
            let mut seen = 0u64;
            for sig in Signal::SCSI {
                let pin = board.signal_pin(sig).unwrap();
                assert_eq!(seen & (1 << pin.0), 0, "{}: {sig:?}", board.name);
                seen |= 1 << pin.0;
            }
        }
    }

    #[test]
    fn polarity_helpers() {
        assert_eq!(FULLSPEC.tad_in(), Level::Low);
        assert_eq!(FULLSPEC.tad_out(), Level::High);
        assert_eq!(FULLSPEC.dtd_in(), Level::High);
        assert_eq!(FULLSPEC.dtd_out(), Level::Low);
        assert_eq!(AIBOM.dtd_in(), Level::Low);
        assert_eq!(AIBOM.dtd_out(), Level::High);
    }
}
