// SPDX-License-Identifier: AGPL-3.0-only

//! RESTMD tempering layer.
//!
//! Walkers run independent STMD engines over overlapping energy windows;
//! every `nevery` steps adjacent pairs are offered a configuration swap
//! under a stage-gated Metropolis rule built from both walkers' local
//! statistical temperatures.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `coordinator` | pairing, acceptance rule, decision log |
//! | `transport` | roots-only collective seam + in-process loopback |

/// Pairing, acceptance rule, and decision log.
pub mod coordinator;
/// Roots-only collective seam and the in-process loopback.
pub mod transport;

pub use coordinator::{
    ExchangeCoordinator, ExchangePolicy, SwapDecision, SwapVerdict, WalkerSummary,
};
pub use transport::{run_attempt, LoopbackRoots, RootsExchange};
