// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for STMD configuration, restart, and runtime checks.
//!
//! Every variant is fatal: the algorithm has no partial-recovery mode, so
//! callers are expected to abort the run with the `Display` message. The
//! enum exists so hosts can pattern-match on the failure mode (bad input
//! vs. missing restart vs. runtime domain violation) rather than parsing
//! opaque strings.

use std::fmt;

/// Errors arising from STMD setup, restart, or per-step updates.
#[derive(Debug)]
pub enum RestmdError {
    /// A configuration field failed validation at construction.
    Config {
        /// Name of the offending input field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Restart was requested but the blob does not exist.
    RestartMissing(String),

    /// The restart blob holds fewer values than the table requires.
    RestartTruncated {
        /// Path of the offending blob.
        path: String,
        /// Number of doubles the layout requires (3N + 13).
        expected: usize,
        /// Number of parseable doubles actually found.
        found: usize,
    },

    /// The restart blob parsed but holds an inadmissible value.
    RestartInvalid {
        /// Path of the offending blob.
        path: String,
        /// What was inadmissible.
        reason: String,
    },

    /// Sampled potential energy fell outside the energy window, or its bin
    /// landed on the boundary where the neighbor update is undefined.
    EnergyOutOfRange {
        /// The sampled potential energy.
        potential: f64,
        /// Energy bin width.
        bin_width: f64,
        /// The offending bin index (may be negative).
        index: i64,
    },

    /// A diagnostic stream could not be created, or the restart blob
    /// could not be rewritten at a checkpoint.
    Checkpoint(String),

    /// The learning-rate schedule drove f below unity.
    ScheduleUnderflow {
        /// The offending f value.
        f: f64,
    },

    /// The host integrator is not velocity-Verlet.
    IntegratorUnsupported(String),
}

impl fmt::Display for RestmdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { field, reason } => {
                write!(f, "STMD: invalid value for `{field}`: {reason}")
            }
            Self::RestartMissing(path) => {
                write!(f, "STMD: restart file {path} does not exist")
            }
            Self::RestartTruncated {
                path,
                expected,
                found,
            } => write!(
                f,
                "STMD: restart file {path} is an invalid format \
                 (need {expected} values, found {found})"
            ),
            Self::RestartInvalid { path, reason } => {
                write!(f, "STMD: restart file {path} is inadmissible: {reason}")
            }
            Self::EnergyOutOfRange {
                potential,
                bin_width,
                index,
            } => write!(
                f,
                "STMD: sampled potential energy out of range: \
                 U= {potential} bin= {bin_width} i= {index}"
            ),
            Self::Checkpoint(msg) => {
                write!(f, "STMD: cannot write restart/diagnostic file: {msg}")
            }
            Self::ScheduleUnderflow { f: fval } => {
                write!(f, "STMD: f-value {fval} is less than unity")
            }
            Self::IntegratorUnsupported(style) => {
                write!(f, "STMD: currently expecting run_style verlet, got {style}")
            }
        }
    }
}

impl std::error::Error for RestmdError {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn display_config_names_field() {
        let err = RestmdError::Config {
            field: "init_f",
            reason: "0.2 exceeds 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("init_f"));
        assert!(msg.contains("exceeds 1"));
    }

    #[test]
    fn display_out_of_range_records_offenders() {
        let err = RestmdError::EnergyOutOfRange {
            potential: -1203.5,
            bin_width: 2.0,
            index: -3,
        };
        let msg = err.to_string();
        assert!(msg.contains("-1203.5"));
        assert!(msg.contains("i= -3"));
    }

    #[test]
    fn display_truncated_restart_counts() {
        let err = RestmdError::RestartTruncated {
            path: "out/oREST.0.d".into(),
            expected: 73,
            found: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("oREST.0.d"));
        assert!(msg.contains("73"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn error_trait_object() {
        let err = RestmdError::ScheduleUnderflow { f: 0.98 };
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("less than unity"));
    }
}
