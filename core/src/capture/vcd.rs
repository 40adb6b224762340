//! Value Change Dump writer
//!
//! Standard IEEE 1364 VCD at 1 ns timescale: nine 1-bit wires, the
//! 8-bit data vector and a string variable carrying the decoded bus
//! phase, so a trace opens directly in GTKWave.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::sample::DataSample;
use crate::signal::Signal;

const SYMBOL_DAT: char = '#';
const SYMBOL_PHASE: char = '=';

/// Wires in header declaration order, with their identifier codes
const WIRES: [(Signal, char); 9] = [
    (Signal::Bsy, ')'),
    (Signal::Sel, '-'),
    (Signal::Cd, '*'),
    (Signal::Io, '('),
    (Signal::Msg, '&'),
    (Signal::Req, '^'),
    (Signal::Ack, '%'),
    (Signal::Atn, '+'),
    (Signal::Rst, '$'),
];

pub fn write_vcd<W: Write>(w: &mut W, samples: &[DataSample]) -> io::Result<()> {
    writeln!(w, "$date")?;
    writeln!(w, "{}", chrono::Local::now().format("%c"))?;
    writeln!(w, "$end")?;
    writeln!(w, "$version")?;
    writeln!(w, "   {}", crate::build_version())?;
    writeln!(w, "$end")?;
    writeln!(w, "$comment")?;
    writeln!(w, "   SCSI bus capture")?;
    writeln!(w, "$end")?;
    writeln!(w, "$timescale 1 ns $end")?;

    writeln!(w, "$scope module logic $end")?;
    for (sig, sym) in WIRES {
        let name: &'static str = sig.into();
        writeln!(w, "$var wire 1 {sym} {} $end", name.to_uppercase())?;
    }
    writeln!(w, "$var wire 8 {SYMBOL_DAT} data $end")?;
    writeln!(w, "$var string 1 {SYMBOL_PHASE} phase $end")?;
    writeln!(w, "$upscope $end")?;
    writeln!(w, "$enddefinitions $end")?;

    // Initial values: everything released at t=0
    writeln!(w, "$dumpvars")?;
    for (_, sym) in WIRES {
        writeln!(w, "0{sym}")?;
    }
    writeln!(w, "b00000000 {SYMBOL_DAT}")?;
    writeln!(w, "s{} {SYMBOL_PHASE}", crate::bus::Phase::BusFree.name())?;
    writeln!(w, "$end")?;

    // The dumpvars block above is the all-zero sample
    let mut prev = DataSample::new(0, 0);
    let t0 = samples.first().map_or(0, DataSample::timestamp);

    for s in samples {
        writeln!(w, "#{}", s.timestamp() - t0)?;
        for (sig, sym) in WIRES {
            if prev.signal(sig) != s.signal(sig) {
                writeln!(w, "{}{sym}", u8::from(s.signal(sig)))?;
            }
        }
        if prev.dat() != s.dat() {
            writeln!(w, "b{:08b} {SYMBOL_DAT}", s.dat())?;
        }
        if prev.phase() != s.phase() {
            writeln!(w, "s{} {SYMBOL_PHASE}", s.phase().name())?;
        }
        prev = *s;
    }

    Ok(())
}

pub fn write_vcd_file(path: &Path, samples: &[DataSample]) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    write_vcd(&mut w, samples).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
