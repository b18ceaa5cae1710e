// SPDX-License-Identifier: AGPL-3.0-only

// Clippy pedantic/nursery + physics-specific allows are in [lints.clippy]
// in Cargo.toml. Library code must propagate errors, not panic:
#![deny(clippy::expect_used, clippy::unwrap_used)]
#![warn(missing_docs)]

//! reSTMD — Statistical Temperature Molecular Dynamics for a host MD engine
//!
//! Implements the STMD force modifier of Kim, Straub & Keyes
//! (J. Chem. Phys. 124, 064107, 2006): an adaptive estimate of the
//! microcanonical statistical temperature T(U) on an energy grid, used to
//! rescale forces each step so the walker samples a flat energy histogram.
//! The replica-exchange layer (RESTMD, Kim, Keyes & Straub, J. Phys. Chem.
//! B 116, 8646, 2012) couples several STMD walkers at overlapping energy
//! windows through a stage-gated Metropolis swap rule.
//!
//! The host integrator is an external collaborator: it computes forces and
//! the potential energy U, calls [`stmd::engine::StmdEngine::on_step`], and
//! multiplies every in-group force by the returned Γ(U). Equations of
//! motion, potentials, thermostats, and MPI transport live on the host side.
//!
//! # Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `tolerances` | centralized, justified thresholds (flatness, clamps, f floor) |
//! | `error` | typed fatal errors; nothing here is retried |
//! | `host` | host-engine contract: Verlet gate, force scaling, swap hooks |
//! | `stmd` | temperature table, four-stage engine, restart blob, streams |
//! | `rxc` | replica-exchange coordinator and roots-collective seam |
//!
//! # License
//!
//! AGPL-3.0 — see LICENSE in repository root.

/// Typed fatal errors for configuration, restart, and runtime domain checks.
pub mod error;
/// Host-engine contract: integrator gate, force scaling, exchange hooks.
pub mod host;
/// Replica-exchange coordinator (RESTMD tempering layer).
pub mod rxc;
/// STMD core: temperature table, stage machine, restart, diagnostics.
pub mod stmd;
/// Centralized, justified thresholds. No ad-hoc magic numbers.
pub mod tolerances;

pub use error::RestmdError;
pub use stmd::config::{FReduction, StmdConfig};
pub use stmd::engine::{Stage, StmdEngine};
pub use stmd::table::TemperatureTable;
