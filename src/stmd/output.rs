// SPDX-License-Identifier: AGPL-3.0-only

//! Append-only diagnostic streams.
//!
//! Three per-walker files under the configured output directory:
//!
//! | File | Contents per emission |
//! |------|-----------------------|
//! | `WT.<w>.d` | ladder: `i E_i Ŷ·T₀ Ŷ totCi`, blank-line pair terminated |
//! | `WH.<w>.d` | window/cumulative histograms with f |
//! | `WHP.<w>.d` | production histograms (stages ≥ 3 only) |
//!
//! Streams are best-effort: the engine reports but does not abort on a
//! failed write, per the error-handling contract. Files are truncated at
//! engine init and appended to for the rest of the run.

use crate::stmd::table::TemperatureTable;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Open handles to one walker's WT/WH/WHP streams.
#[derive(Debug)]
pub struct DiagnosticStreams {
    wt: BufWriter<File>,
    wh: BufWriter<File>,
    whp: BufWriter<File>,
}

impl DiagnosticStreams {
    /// Create (truncating) the three stream files for `walker` under
    /// `out_dir`.
    ///
    /// # Errors
    ///
    /// Propagates directory-creation and file-creation failures; unlike
    /// later writes, failing to open the streams at init is fatal.
    pub fn create(out_dir: &Path, walker: usize) -> io::Result<Self> {
        std::fs::create_dir_all(out_dir)?;
        let open = |prefix: &str| -> io::Result<BufWriter<File>> {
            let path = out_dir.join(format!("{prefix}.{walker}.d"));
            Ok(BufWriter::new(File::create(path)?))
        };
        Ok(Self {
            wt: open("WT")?,
            wh: open("WH")?,
            whp: open("WHP")?,
        })
    }

    /// Append one ladder emission to `WT.<w>.d`.
    ///
    /// # Errors
    ///
    /// Propagates stream-write failures (caller treats them as
    /// best-effort).
    pub fn emit_temperature(
        &mut self,
        table: &TemperatureTable,
        kinetic_temp: f64,
        total_updates: u64,
    ) -> io::Result<()> {
        for (i, &y) in table.ladder().iter().enumerate() {
            writeln!(
                self.wt,
                "{i} {:.6} {:.6} {:.6} {total_updates}",
                table.energy_at(i),
                y * kinetic_temp,
                y,
            )?;
        }
        writeln!(self.wt)?;
        writeln!(self.wt)?;
        self.wt.flush()
    }

    /// Append one histogram emission to `WH.<w>.d`.
    ///
    /// # Errors
    ///
    /// Propagates stream-write failures.
    pub fn emit_histogram(
        &mut self,
        table: &TemperatureTable,
        count_h: u64,
        total_updates: u64,
        f: f64,
    ) -> io::Result<()> {
        for i in 0..table.n_bins() {
            writeln!(
                self.wh,
                "{i} {:.6} {} {} {:.6} {count_h} {total_updates} {f:.6}",
                table.energy_at(i),
                table.hist()[i],
                table.hist_total()[i],
                table.ladder()[i],
            )?;
        }
        writeln!(self.wh)?;
        writeln!(self.wh)?;
        self.wh.flush()
    }

    /// Append one production-histogram emission to `WHP.<w>.d`.
    ///
    /// # Errors
    ///
    /// Propagates stream-write failures.
    pub fn emit_production(
        &mut self,
        table: &TemperatureTable,
        count_h: u64,
        count_ph: u64,
        f: f64,
    ) -> io::Result<()> {
        for i in 0..table.n_bins() {
            writeln!(
                self.whp,
                "{i} {:.6} {} {} {} {:.6} {count_h} {count_ph} {f:.6}",
                table.energy_at(i),
                table.hist()[i],
                table.hist_production()[i],
                table.hist_total()[i],
                table.ladder()[i],
            )?;
        }
        writeln!(self.whp)?;
        writeln!(self.whp)?;
        self.whp.flush()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny_table() -> TemperatureTable {
        let mut t = TemperatureTable::new(0.0, 4.0, 1.0, 0.5, 2.0);
        t.record(2, true);
        t
    }

    #[test]
    fn stream_files_are_created() {
        let dir = TempDir::new().unwrap();
        let _streams = DiagnosticStreams::create(dir.path(), 3).unwrap();
        for prefix in ["WT", "WH", "WHP"] {
            assert!(dir.path().join(format!("{prefix}.3.d")).exists());
        }
    }

    #[test]
    fn temperature_emission_layout() {
        let dir = TempDir::new().unwrap();
        let mut s = DiagnosticStreams::create(dir.path(), 0).unwrap();
        let t = tiny_table();
        s.emit_temperature(&t, 300.0, 7).unwrap();
        let text = std::fs::read_to_string(dir.path().join("WT.0.d")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // 5 bins + the blank-line pair (trailing newline not counted).
        assert_eq!(lines.len(), 7);
        assert!(lines[5].is_empty() && lines[6].is_empty());
        let first: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(first[0], "0");
        assert_eq!(first[4], "7");
        // Unscaled column is Ŷ·T₀ = 2.0·300.
        assert_eq!(first[2], "600.000000");
    }

    #[test]
    fn histogram_emission_carries_counts_and_f() {
        let dir = TempDir::new().unwrap();
        let mut s = DiagnosticStreams::create(dir.path(), 0).unwrap();
        let t = tiny_table();
        s.emit_histogram(&t, 1, 1, 1.0202).unwrap();
        let text = std::fs::read_to_string(dir.path().join("WH.0.d")).unwrap();
        let row: Vec<&str> = text.lines().nth(2).unwrap().split_whitespace().collect();
        // bin 2: Hist=1, Htot=1.
        assert_eq!(row[2], "1");
        assert_eq!(row[3], "1");
        assert_eq!(row[7], "1.020200");
    }

    #[test]
    fn production_emission_has_both_phase_counts() {
        let dir = TempDir::new().unwrap();
        let mut s = DiagnosticStreams::create(dir.path(), 0).unwrap();
        let t = tiny_table();
        s.emit_production(&t, 4, 2, 1.0001).unwrap();
        let text = std::fs::read_to_string(dir.path().join("WHP.0.d")).unwrap();
        let row: Vec<&str> = text.lines().nth(2).unwrap().split_whitespace().collect();
        assert_eq!(row[2], "1"); // Hist
        assert_eq!(row[3], "1"); // PROH
        assert_eq!(row[6], "4"); // CountH
        assert_eq!(row[7], "2"); // CountPH
    }
}
