// SPDX-License-Identifier: AGPL-3.0-only

//! STMD run configuration.
//!
//! Mirrors the option set of the host-engine fix command:
//!
//! ```text
//! RSTFRQ f_style init_f final_f Tlo Thi Emin Emax binsize TSC1 TSC2 ST restart out_dir
//! ```
//!
//! Every field is validated at construction; a bad value is fatal with a
//! message naming the field. The ladder-edge cutoff and flatness tolerance
//! were hardcoded in the original lineage and are surfaced here with
//! defaults from [`crate::tolerances`].

use crate::error::RestmdError;
use crate::tolerances;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Learning-rate reduction scheme applied in stages 2 and 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FReduction {
    /// No reduction: simulate at the initial f only.
    None,
    /// Halve ln f whenever the window histogram goes flat.
    Hchk,
    /// Unconditional f ← √f every TSC2 steps.
    Sqrt,
    /// f ← f − 0.1·f while far from unity, then √f.
    ConstantF,
    /// df ← 0.99·df every TSC2 steps (no window reset).
    ConstantDf,
}

impl FromStr for FReduction {
    type Err = RestmdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "hchk" => Ok(Self::Hchk),
            "sqrt" => Ok(Self::Sqrt),
            "constant_f" => Ok(Self::ConstantF),
            "constant_df" => Ok(Self::ConstantDf),
            other => Err(RestmdError::Config {
                field: "f_style",
                reason: format!(
                    "unknown scheme `{other}` \
                     (expected none|hchk|sqrt|constant_f|constant_df)"
                ),
            }),
        }
    }
}

/// Full input set for one STMD walker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct StmdConfig {
    /// Step interval for restart rewrite and diagnostic flush.
    pub rst_frq: u64,
    /// Stage-2/3 f-reduction scheme.
    pub f_style: FReduction,
    /// Initial ln f per 2Δ; the starting f is exp(2Δ·`init_f`).
    pub init_f: f64,
    /// Stage-2 → 3 ln f target (dFval3); the 3 → 4 target is a tenth of it.
    pub final_f: f64,
    /// Unscaled ladder floor in Kelvin.
    pub t_lo: f64,
    /// Unscaled ladder ceiling in Kelvin.
    pub t_hi: f64,
    /// Lower edge of the potential-energy window.
    pub e_min: f64,
    /// Upper edge of the potential-energy window.
    pub e_max: f64,
    /// Energy bin width Δ.
    pub bin_width: f64,
    /// DIG-phase maintenance period (steps).
    pub tsc1: u64,
    /// LEARN/CONVERGE f-update period (steps).
    pub tsc2: u64,
    /// Reference kinetic temperature T₀; must equal the host thermostat
    /// target.
    pub kinetic_temp: f64,
    /// Resume from the persisted restart blob instead of a fresh ladder.
    pub restart: bool,
    /// Destination directory for the WT/WH/WHP/oREST streams.
    pub out_dir: PathBuf,
    /// Kelvin margin excluded from each ladder end by the flatness check.
    pub edge_cut: f64,
    /// Relative flatness tolerance for the hchk scheme.
    pub flatness_tol: f64,
}

impl StmdConfig {
    /// Parse the `restart` yes/no input flag.
    ///
    /// # Errors
    ///
    /// [`RestmdError::Config`] on anything but `"yes"` or `"no"`.
    pub fn parse_restart_flag(s: &str) -> Result<bool, RestmdError> {
        match s {
            "yes" => Ok(true),
            "no" => Ok(false),
            other => Err(RestmdError::Config {
                field: "restart",
                reason: format!("expected yes|no, got `{other}`"),
            }),
        }
    }

    /// Check every field against its admissible range.
    ///
    /// # Errors
    ///
    /// [`RestmdError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), RestmdError> {
        if self.init_f > tolerances::INIT_F_CEIL {
            return Err(RestmdError::Config {
                field: "init_f",
                reason: format!("initial deltaF {} too large (max 1)", self.init_f),
            });
        }
        if self.final_f < tolerances::FINAL_F_FLOOR {
            return Err(RestmdError::Config {
                field: "final_f",
                reason: format!(
                    "final deltaF {} too small (min {}): the update scheme \
                     would be static and trap the walker",
                    self.final_f,
                    tolerances::FINAL_F_FLOOR
                ),
            });
        }
        if self.init_f <= 0.0 || self.init_f < self.final_f {
            return Err(RestmdError::Config {
                field: "init_f",
                reason: format!(
                    "initial deltaF {} must be positive and at least final_f {}",
                    self.init_f, self.final_f
                ),
            });
        }
        if self.bin_width <= 0.0 {
            return Err(RestmdError::Config {
                field: "bin_width",
                reason: format!("bin width {} must be positive", self.bin_width),
            });
        }
        if self.e_max <= self.e_min {
            return Err(RestmdError::Config {
                field: "e_max",
                reason: format!("energy window [{}, {}] is empty", self.e_min, self.e_max),
            });
        }
        if self.n_bins() < 3 {
            return Err(RestmdError::Config {
                field: "bin_width",
                reason: format!(
                    "window [{}, {}] at Δ= {} has {} bins; need at least 3 \
                     so an interior bin exists",
                    self.e_min,
                    self.e_max,
                    self.bin_width,
                    self.n_bins()
                ),
            });
        }
        if self.t_lo <= 0.0 || self.t_hi <= self.t_lo {
            return Err(RestmdError::Config {
                field: "t_lo",
                reason: format!(
                    "ladder endpoints [{}, {}] must satisfy 0 < Tlo < Thi",
                    self.t_lo, self.t_hi
                ),
            });
        }
        if self.kinetic_temp <= 0.0 {
            return Err(RestmdError::Config {
                field: "kinetic_temp",
                reason: format!("reference temperature {} must be positive", self.kinetic_temp),
            });
        }
        if self.rst_frq == 0 || self.tsc1 == 0 || self.tsc2 == 0 {
            return Err(RestmdError::Config {
                field: "rst_frq",
                reason: "RSTFRQ, TSC1 and TSC2 must all be nonzero".into(),
            });
        }
        if self.flatness_tol <= 0.0 {
            return Err(RestmdError::Config {
                field: "flatness_tol",
                reason: format!("flatness tolerance {} must be positive", self.flatness_tol),
            });
        }
        Ok(())
    }

    /// Number of energy bins N = round(Emax/Δ) − round(Emin/Δ) + 1.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        let lo = (self.e_min / self.bin_width).round() as i64;
        let hi = (self.e_max / self.bin_width).round() as i64;
        (hi - lo + 1).max(0) as usize
    }

    /// Scaled ladder floor T₁ = `T_lo`/T₀.
    #[must_use]
    pub fn t1(&self) -> f64 {
        self.t_lo / self.kinetic_temp
    }

    /// Scaled ladder ceiling T₂ = `T_hi`/T₀.
    #[must_use]
    pub fn t2(&self) -> f64 {
        self.t_hi / self.kinetic_temp
    }

    /// Scaled lower flatness cutoff (`T_lo` + `edge_cut`)/T₀.
    #[must_use]
    pub fn ct_min(&self) -> f64 {
        (self.t_lo + self.edge_cut) / self.kinetic_temp
    }

    /// Scaled upper flatness cutoff (`T_hi` − `edge_cut`)/T₀.
    #[must_use]
    pub fn ct_max(&self) -> f64 {
        (self.t_hi - self.edge_cut) / self.kinetic_temp
    }

    /// Starting multiplicative learning rate f = exp(2Δ·`init_f`).
    #[must_use]
    pub fn initial_f(&self) -> f64 {
        (2.0 * self.bin_width * self.init_f).exp()
    }

    /// f threshold promoting stage 2 → 3 (pfinFval).
    #[must_use]
    pub fn learn_threshold(&self) -> f64 {
        (2.0 * self.bin_width * self.final_f).exp()
    }

    /// f threshold promoting stage 3 → 4 (finFval).
    #[must_use]
    pub fn converge_threshold(&self) -> f64 {
        (2.0 * self.bin_width * self.final_f / tolerances::CONVERGE_TIGHTEN).exp()
    }

    /// df = ln(f)/(2Δ) for the current bin width.
    #[must_use]
    pub fn df_of(&self, f: f64) -> f64 {
        f.ln() * 0.5 / self.bin_width
    }

    /// Serialize the config snapshot next to the diagnostic streams.
    /// Returns the path written.
    ///
    /// # Errors
    ///
    /// Propagates filesystem and serialization failures.
    pub fn save_json(&self, walker: usize) -> std::io::Result<String> {
        std::fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join(format!("stmd_config.{walker}.json"));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Small synthetic-well configuration exercised by the demo binary
    /// and the integration tests: a 101-bin window with a 300 K reference.
    pub fn synthetic_well(out_dir: &Path) -> Self {
        Self {
            rst_frq: 10_000,
            f_style: FReduction::Sqrt,
            init_f: 0.05,
            final_f: 1e-4,
            t_lo: 250.0,
            t_hi: 600.0,
            e_min: -100.0,
            e_max: 100.0,
            bin_width: 2.0,
            tsc1: 100,
            tsc2: 500,
            kinetic_temp: 300.0,
            restart: false,
            out_dir: out_dir.to_path_buf(),
            edge_cut: tolerances::LADDER_EDGE_CUT_K,
            flatness_tol: tolerances::FLATNESS_TOL,
        }
    }
}
