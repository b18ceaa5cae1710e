// SPDX-License-Identifier: AGPL-3.0-only

//! Restart blob: `oREST.<walker>.d`.
//!
//! Whitespace-separated ASCII doubles in a fixed order:
//!
//! ```text
//! STG f CountH SWf SWfold SWchk Count totCi CountPH T1 T2 CTmin CTmax
//! Ŷ[0..N)  Htot[0..N)  PROH[0..N)
//! ```
//!
//! 13 scalars plus 3N array entries. The reader accepts any whitespace
//! layout (compatible with blobs written by the original lineage); the
//! writer emits one scalar per line and one line per array, and rewrites
//! atomically via a temp file so a crash mid-checkpoint cannot truncate
//! the previous blob.
//!
//! The window histogram and its step counter are deliberately absent: a
//! resumed run restarts its flatness window from empty.

use crate::error::RestmdError;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// Number of scalar fields preceding the three arrays.
const SCALARS: usize = 13;

/// Everything the engine persists across a shutdown.
#[derive(Clone, Debug, PartialEq)]
pub struct RestartBlob {
    /// Schedule stage 1–4.
    pub stage: u8,
    /// Learning-rate multiplier.
    pub f: f64,
    /// Steps since the last window reset (persisted, restored as zero by
    /// the window-reset contract; kept in the layout for compatibility).
    pub count_h: u64,
    /// Flatness transition counter.
    pub sw_f: u64,
    /// Previous flatness counter value.
    pub sw_f_old: u64,
    /// Ticks since the last f-reduction.
    pub sw_chk: u64,
    /// Last processed step index.
    pub count: u64,
    /// Total table updates applied over the run.
    pub total_updates: u64,
    /// Production-phase step count.
    pub count_ph: u64,
    /// Scaled ladder floor.
    pub t1: f64,
    /// Scaled ladder ceiling.
    pub t2: f64,
    /// Scaled lower flatness cutoff.
    pub ct_min: f64,
    /// Scaled upper flatness cutoff.
    pub ct_max: f64,
    /// Statistical temperature ladder.
    pub ladder: Vec<f64>,
    /// Cumulative histogram.
    pub hist_total: Vec<u64>,
    /// Production histogram.
    pub hist_production: Vec<u64>,
}

/// Path of walker `walker`'s blob under `out_dir`.
#[must_use]
pub fn blob_path(out_dir: &Path, walker: usize) -> PathBuf {
    out_dir.join(format!("oREST.{walker}.d"))
}

impl RestartBlob {
    /// Serialize and atomically replace `oREST.<walker>.d`.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures; the previous blob survives them.
    pub fn write(&self, out_dir: &Path, walker: usize) -> io::Result<()> {
        let mut text = String::new();
        let _ = writeln!(text, "{}", self.stage);
        // Shortest-round-trip float formatting keeps the reload
        // bit-identical to the persisted state.
        let _ = writeln!(text, "{}", self.f);
        for v in [
            self.count_h,
            self.sw_f,
            self.sw_f_old,
            self.sw_chk,
            self.count,
            self.total_updates,
            self.count_ph,
        ] {
            let _ = writeln!(text, "{v}");
        }
        for v in [self.t1, self.t2, self.ct_min, self.ct_max] {
            let _ = writeln!(text, "{v}");
        }
        for row in [&self.ladder] {
            for y in row.iter() {
                let _ = write!(text, "{y} ");
            }
            text.push('\n');
        }
        for row in [&self.hist_total, &self.hist_production] {
            for h in row.iter() {
                let _ = write!(text, "{h} ");
            }
            text.push('\n');
        }

        std::fs::create_dir_all(out_dir)?;
        let target = blob_path(out_dir, walker);
        let tmp = out_dir.join(format!("oREST.{walker}.d.tmp"));
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, target)
    }

    /// Load and validate walker `walker`'s blob for a table of `n_bins`
    /// bins.
    ///
    /// # Errors
    ///
    /// - [`RestmdError::RestartMissing`] when the file does not exist.
    /// - [`RestmdError::RestartTruncated`] when fewer than 3N + 13 values
    ///   parse.
    /// - [`RestmdError::RestartInvalid`] when a parsed value is out of
    ///   domain (stage outside 1–4, f below unity).
    pub fn read(out_dir: &Path, walker: usize, n_bins: usize) -> Result<Self, RestmdError> {
        let path = blob_path(out_dir, walker);
        let shown = path.to_string_lossy().into_owned();
        let text = std::fs::read_to_string(&path)
            .map_err(|_| RestmdError::RestartMissing(shown.clone()))?;

        let values: Vec<f64> = text
            .split_whitespace()
            .map_while(|tok| tok.parse::<f64>().ok())
            .collect();
        let needed = SCALARS + 3 * n_bins;
        if values.len() < needed {
            return Err(RestmdError::RestartTruncated {
                path: shown,
                expected: needed,
                found: values.len(),
            });
        }

        let stage = values[0] as i64;
        if !(1..=4).contains(&stage) {
            return Err(RestmdError::RestartInvalid {
                path: shown,
                reason: format!("stage {stage} outside 1..=4"),
            });
        }
        let f = values[1];
        if f < 1.0 {
            return Err(RestmdError::RestartInvalid {
                path: shown,
                reason: format!("f-value {f} is less than unity"),
            });
        }

        let ints = |v: f64| v.max(0.0) as u64;
        let arrays = &values[SCALARS..];
        Ok(Self {
            stage: stage as u8,
            f,
            count_h: ints(values[2]),
            sw_f: ints(values[3]),
            sw_f_old: ints(values[4]),
            sw_chk: ints(values[5]),
            count: ints(values[6]),
            total_updates: ints(values[7]),
            count_ph: ints(values[8]),
            t1: values[9],
            t2: values[10],
            ct_min: values[11],
            ct_max: values[12],
            ladder: arrays[..n_bins].to_vec(),
            hist_total: arrays[n_bins..2 * n_bins].iter().map(|&v| ints(v)).collect(),
            hist_production: arrays[2 * n_bins..3 * n_bins].iter().map(|&v| ints(v)).collect(),
        })
    }
}
