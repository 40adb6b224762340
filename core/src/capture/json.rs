//! JSON trace format
//!
//! One object per captured sample:
//! `{"id":"<n>","timestamp":"0x<16 hex>","data":"0x<8 hex>"}`.
//! Reading a trace back yields an element-wise identical buffer, so
//! VCD and HTML reports can be regenerated without hardware.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sample::DataSample;

#[derive(Serialize, Deserialize)]
struct TraceRecord {
    id: String,
    timestamp: String,
    data: String,
}

pub fn write_json<W: Write>(w: &mut W, samples: &[DataSample]) -> io::Result<()> {
    writeln!(w, "[")?;
    for (i, s) in samples.iter().enumerate() {
        let sep = if i + 1 == samples.len() { "" } else { "," };
        writeln!(
            w,
            "{{\"id\":\"{i}\",\"timestamp\":\"0x{:016X}\",\"data\":\"0x{:08X}\"}}{sep}",
            s.timestamp(),
            s.raw(),
        )?;
    }
    writeln!(w, "]")
}

pub fn read_json<R: Read>(r: R) -> Result<Vec<DataSample>> {
    let records: Vec<TraceRecord> = serde_json::from_reader(r).context("parse JSON trace")?;
    records
        .iter()
        .map(|rec| {
            let timestamp = u64::from_str_radix(rec.timestamp.trim_start_matches("0x"), 16)
                .with_context(|| format!("sample {}: timestamp {}", rec.id, rec.timestamp))?;
            let raw = u32::from_str_radix(rec.data.trim_start_matches("0x"), 16)
                .with_context(|| format!("sample {}: data {}", rec.id, rec.data))?;
            Ok(DataSample::new(raw, timestamp))
        })
        .collect()
}

pub fn write_json_file(path: &Path, samples: &[DataSample]) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    write_json(&mut w, samples).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read_json_file(path: &Path) -> Result<Vec<DataSample>> {
    let r = BufReader::new(File::open(path).with_context(|| format!("open {}", path.display()))?);
    read_json(r)
}
