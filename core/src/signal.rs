//! Logical bus signals and their canonical bit positions
//!
//! Every pin word handled above the backend layer uses this layout,
//! regardless of which board produced it: positive logic (1 = asserted)
//! with the data byte in the low eight bits. Backends repack their raw
//! GPIO level words into this arrangement on acquisition, so samples,
//! traces and the phase decoder never need to know a board's pin map.

use strum::{EnumIter, IntoStaticStr};

/// A logical bus signal. The discriminant is the signal's bit position
/// in the canonical pin word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[repr(u8)]
pub enum Signal {
    Dt0 = 0,
    Dt1 = 1,
    Dt2 = 2,
    Dt3 = 3,
    Dt4 = 4,
    Dt5 = 5,
    Dt6 = 6,
    Dt7 = 7,
    /// Data parity
    Dp = 8,
    Atn = 9,
    Rst = 10,
    Ack = 11,
    Req = 12,
    Msg = 13,
    Cd = 14,
    Io = 15,
    Bsy = 16,
    Sel = 17,
    /// Activity LED
    Act = 18,
    /// Enable (application running) LED
    Enb = 19,
    /// Initiator-group transceiver direction
    Ind = 20,
    /// Target-group transceiver direction
    Tad = 21,
    /// Data-group transceiver direction
    Dtd = 22,
}

impl Signal {
    /// Bit position in the canonical pin word
    pub const fn pos(self) -> u32 {
        self as u32
    }

    /// Single-bit mask in the canonical pin word
    pub const fn mask(self) -> u32 {
        1 << self.pos()
    }

    /// The nine SCSI data lines (eight data bits plus parity)
    pub const DATA: [Self; 9] = [
        Self::Dt0,
        Self::Dt1,
        Self::Dt2,
        Self::Dt3,
        Self::Dt4,
        Self::Dt5,
        Self::Dt6,
        Self::Dt7,
        Self::Dp,
    ];

    /// All SCSI bus signals (data, parity and control), excluding the
    /// board-local transceiver/LED lines
    pub const SCSI: [Self; 18] = [
        Self::Dt0,
        Self::Dt1,
        Self::Dt2,
        Self::Dt3,
        Self::Dt4,
        Self::Dt5,
        Self::Dt6,
        Self::Dt7,
        Self::Dp,
        Self::Atn,
        Self::Rst,
        Self::Ack,
        Self::Req,
        Self::Msg,
        Self::Cd,
        Self::Io,
        Self::Bsy,
        Self::Sel,
    ];

    /// Fixed-width lowercase label, as used by the loopback tester output
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dt0 => " d0",
            Self::Dt1 => " d1",
            Self::Dt2 => " d2",
            Self::Dt3 => " d3",
            Self::Dt4 => " d4",
            Self::Dt5 => " d5",
            Self::Dt6 => " d6",
            Self::Dt7 => " d7",
            Self::Dp => " dp",
            Self::Atn => "atn",
            Self::Rst => "rst",
            Self::Ack => "ack",
            Self::Req => "req",
            Self::Msg => "msg",
            Self::Cd => " cd",
            Self::Io => " io",
            Self::Bsy => "bsy",
            Self::Sel => "sel",
            Self::Act => "act",
            Self::Enb => "enb",
            Self::Ind => "ind",
            Self::Tad => "tad",
            Self::Dtd => "dtd",
        }
    }
}

/// Mask of the phase-determining MCI bits (MSG, C/D, I/O) in the
/// canonical pin word
pub const MCI_MASK: u32 = Signal::Msg.mask() | Signal::Cd.mask() | Signal::Io.mask();

/// Extracts the 3-bit MCI field `(MSG << 2) | (CD << 1) | IO` from a
/// canonical pin word
pub const fn mci(word: u32) -> u8 {
    let msg = (word >> Signal::Msg.pos()) & 1;
    let cd = (word >> Signal::Cd.pos()) & 1;
    let io = (word >> Signal::Io.pos()) & 1;
    ((msg << 2) | (cd << 1) | io) as u8
}

/// Odd parity over a data byte: the parity line is driven such that the
/// number of asserted lines among DT0..DT7 and DP is odd
pub const fn odd_parity(dat: u8) -> bool {
    dat.count_ones() % 2 == 0
}
