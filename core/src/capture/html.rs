//! HTML capture report
//!
//! A standalone page summarizing the capture one row per bus phase
//! transition. Data moved during a phase sits behind a collapsible
//! block, 16 bytes per line with index labels; Selection rows carry
//! the target ID decoded off the data bus.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::bus::Phase;
use crate::sample::DataSample;
use crate::signal::Signal;

const STYLE: &str = "\
table { border-collapse: collapse; font-family: monospace; }
th, td { border: 1px solid #999; padding: 2px 8px; vertical-align: top; }
th { background-color: #ddd; }
.collapsible { cursor: pointer; border: none; background-color: #eee; font-family: monospace; }
.content { display: none; }
";

const SCRIPT: &str = "\
var coll = document.getElementsByClassName('collapsible');
for (var i = 0; i < coll.length; i++) {
  coll[i].addEventListener('click', function() {
    var content = this.nextElementSibling;
    content.style.display = content.style.display === 'block' ? 'none' : 'block';
  });
}
";

struct PhaseRow {
    timestamp: u64,
    phase: Phase,
    selected_id: Option<u8>,
    data: Vec<u8>,
}

/// Target ID from the data bus during Selection, before the target
/// responds with BSY
fn selection_id(sample: &DataSample) -> Option<u8> {
    if sample.signal(Signal::Bsy) {
        return None;
    }
    (0..8u8).rev().find(|&id| sample.dat() & (1 << id) != 0)
}

fn rows(samples: &[DataSample]) -> Vec<PhaseRow> {
    let mut rows: Vec<PhaseRow> = Vec::new();
    let mut prev_data_valid = false;

    for s in samples {
        let phase = s.phase();
        if rows.last().is_none_or(|r| r.phase != phase) {
            rows.push(PhaseRow {
                timestamp: s.timestamp(),
                phase,
                selected_id: None,
                data: Vec::new(),
            });
        }
        let row = rows.last_mut().unwrap();
        if row.phase == Phase::Selection && row.selected_id.is_none() {
            row.selected_id = selection_id(s);
        }
        // One byte transfers per REQ/ACK handshake; latch it on the
        // edge where both are asserted so repeated values still count
        let data_valid = s.signal(Signal::Ack) && s.signal(Signal::Req);
        if data_valid && !prev_data_valid {
            row.data.push(s.dat());
        }
        prev_data_valid = data_valid;
    }
    rows
}

fn write_data_cell<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    if data.is_empty() {
        return write!(w, "--");
    }
    writeln!(w, "<button class=\"collapsible\">{} bytes</button>", data.len())?;
    writeln!(w, "<div class=\"content\"><pre>")?;
    for (i, chunk) in data.chunks(16).enumerate() {
        write!(w, "{:04X}:", i * 16)?;
        for b in chunk {
            write!(w, " {b:02X}")?;
        }
        writeln!(w)?;
    }
    writeln!(w, "</pre></div>")
}

pub fn write_html<W: Write>(w: &mut W, samples: &[DataSample]) -> io::Result<()> {
    writeln!(w, "<!DOCTYPE html>")?;
    writeln!(w, "<html>")?;
    writeln!(w, "<head>")?;
    writeln!(w, "<meta charset=\"UTF-8\">")?;
    writeln!(w, "<title>SCSI bus capture</title>")?;
    writeln!(w, "<style>\n{STYLE}</style>")?;
    writeln!(w, "</head>")?;
    writeln!(w, "<body>")?;
    writeln!(w, "<h1>SCSI bus capture</h1>")?;
    writeln!(w, "<p>{} samples</p>", samples.len())?;
    writeln!(w, "<table>")?;
    writeln!(
        w,
        "<tr><th>timestamp</th><th>phase</th><th>selected_id</th><th>data</th><th>word_count</th></tr>"
    )?;

    for row in rows(samples) {
        writeln!(w, "<tr>")?;
        writeln!(w, "<td>{}</td>", row.timestamp)?;
        writeln!(w, "<td>{}</td>", row.phase.name())?;
        match row.selected_id {
            Some(id) => writeln!(w, "<td>{id}</td>")?,
            None => writeln!(w, "<td>--</td>")?,
        }
        write!(w, "<td>")?;
        write_data_cell(w, &row.data)?;
        writeln!(w, "</td>")?;
        writeln!(w, "<td>{}</td>", row.data.len())?;
        writeln!(w, "</tr>")?;
    }

    writeln!(w, "</table>")?;
    writeln!(w, "<script>\n{SCRIPT}</script>")?;
    writeln!(w, "</body>")?;
    writeln!(w, "</html>")
}

pub fn write_html_file(path: &Path, samples: &[DataSample]) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    write_html(&mut w, samples).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(samples: &[DataSample]) -> String {
        let mut out = Vec::new();
        write_html(&mut out, samples).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn one_row_per_phase_transition() {
        let bsy = Signal::Bsy.mask();
        let cd = Signal::Cd.mask();
        let samples = [
            DataSample::new(0, 0),
            DataSample::new(bsy | cd | 0x12, 100),
            DataSample::new(bsy | cd | 0x34, 200),
            DataSample::new(bsy | cd | Signal::Io.mask(), 300),
        ];
        let out = render(&samples);
        assert_eq!(out.matches("<td>BusFree</td>").count(), 1);
        assert_eq!(out.matches("<td>Command</td>").count(), 1);
        assert_eq!(out.matches("<td>Status</td>").count(), 1);
    }

    #[test]
    fn selection_row_carries_target_id() {
        let samples = [
            DataSample::new(Signal::Sel.mask() | (1 << 3), 0),
            DataSample::new(Signal::Sel.mask() | Signal::Bsy.mask() | (1 << 3), 50),
        ];
        let out = render(&samples);
        assert!(out.contains("<td>Selection</td>"));
        assert!(out.contains("<td>3</td>"));
    }

    /// One REQ/ACK handshake carrying `dat`: the edge sample with both
    /// lines asserted, then the release
    fn handshake(dat: u8, t: u64) -> [DataSample; 2] {
        let bsy = Signal::Bsy.mask();
        [
            DataSample::new(
                bsy | Signal::Req.mask() | Signal::Ack.mask() | u32::from(dat),
                t,
            ),
            DataSample::new(bsy | u32::from(dat), t + 10),
        ]
    }

    #[test]
    fn data_groups_sixteen_per_line() {
        let samples: Vec<DataSample> = (0..20u8)
            .flat_map(|i| handshake(i, u64::from(i) * 100))
            .collect();
        let out = render(&samples);
        assert!(out.contains("0000: 00 01 02"));
        assert!(out.contains("0010: 10 11 12 13"));
        assert!(out.contains("<button class=\"collapsible\">20 bytes</button>"));
    }

    #[test]
    fn repeated_bytes_are_counted_per_handshake() {
        // Two consecutive 0x00 transfers must show up as two bytes,
        // not collapse into one
        let samples: Vec<DataSample> = [0x00u8, 0x00, 0x12]
            .iter()
            .enumerate()
            .flat_map(|(i, &b)| handshake(b, i as u64 * 100))
            .collect();
        let out = render(&samples);
        assert!(out.contains("<button class=\"collapsible\">3 bytes</button>"));
        assert!(out.contains("0000: 00 00 12"));
        assert!(out.contains("<td>3</td>"));
    }
}
