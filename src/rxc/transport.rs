// SPDX-License-Identifier: AGPL-3.0-only

//! Roots-only collective seam.
//!
//! The exchange protocol needs exactly two collectives: an allgather of
//! the per-walker summaries across the partition roots, and a broadcast
//! of each pair's decision back to both partners. MPI transport is the
//! host's concern; this module fixes the trait the host implements and
//! ships [`LoopbackRoots`] for universes whose walkers share a process
//! (tests, the demo binary).

use crate::error::RestmdError;
use crate::rxc::coordinator::{ExchangeCoordinator, SwapDecision, WalkerSummary};

/// The two collectives of the exchange protocol.
pub trait RootsExchange {
    /// Gather every walker's summary, ordered by walker slot. Blocks
    /// until all roots have contributed; exchange is a global barrier.
    ///
    /// # Errors
    ///
    /// Transport-level failures are fatal to the run.
    fn allgather(&mut self, local: &WalkerSummary) -> Result<Vec<WalkerSummary>, RestmdError>;

    /// Deliver one pair's decision to both partners.
    ///
    /// # Errors
    ///
    /// Transport-level failures are fatal to the run.
    fn broadcast_decision(&mut self, decision: &SwapDecision) -> Result<(), RestmdError>;
}

/// In-process universe: every walker root lives in this process, so the
/// allgather is just the staged summary set and decision broadcasts are
/// no-ops.
#[derive(Debug, Default)]
pub struct LoopbackRoots {
    staged: Vec<WalkerSummary>,
}

impl LoopbackRoots {
    /// Empty universe; stage summaries before each attempt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staged summary set for the coming attempt.
    pub fn stage(&mut self, summaries: Vec<WalkerSummary>) {
        self.staged = summaries;
        self.staged.sort_by_key(|s| s.walker);
    }
}

impl RootsExchange for LoopbackRoots {
    fn allgather(&mut self, local: &WalkerSummary) -> Result<Vec<WalkerSummary>, RestmdError> {
        debug_assert!(
            self.staged.iter().any(|s| s.walker == local.walker),
            "caller's summary must be staged"
        );
        Ok(self.staged.clone())
    }

    fn broadcast_decision(&mut self, _decision: &SwapDecision) -> Result<(), RestmdError> {
        Ok(())
    }
}

/// One full exchange round as seen from a walker root: gather all
/// summaries, evaluate every pair, and fan the decisions back out.
///
/// All roots run this with identical seeds and identical gathered data,
/// so every walker agrees on the outcome of every pair.
///
/// # Errors
///
/// Propagates transport failures.
pub fn run_attempt(
    coordinator: &mut ExchangeCoordinator,
    transport: &mut dyn RootsExchange,
    local: &WalkerSummary,
) -> Result<Vec<SwapDecision>, RestmdError> {
    let summaries = transport.allgather(local)?;
    let decisions = coordinator.attempt(&summaries);
    for decision in &decisions {
        transport.broadcast_decision(decision)?;
    }
    Ok(decisions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::rxc::coordinator::ExchangePolicy;

    fn summary(walker: usize, potential: f64) -> WalkerSummary {
        WalkerSummary {
            walker,
            kinetic_temp: 300.0,
            stat_temp: 450.0,
            potential,
            stage: 2,
            e_min: -100.0,
            e_max: 100.0,
            bin_width: 2.0,
            ladder: vec![1.5; 101],
        }
    }

    #[test]
    fn loopback_orders_by_walker_slot() {
        let mut roots = LoopbackRoots::new();
        roots.stage(vec![summary(2, 0.0), summary(0, -4.0), summary(1, 4.0)]);
        let all = roots.allgather(&summary(0, -4.0)).unwrap();
        let order: Vec<_> = all.iter().map(|s| s.walker).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn run_attempt_returns_pair_decisions() {
        let mut coord = ExchangeCoordinator::new(ExchangePolicy::default());
        let mut roots = LoopbackRoots::new();
        let local = summary(0, -4.0);
        roots.stage(vec![local.clone(), summary(1, 4.0), summary(2, 8.0)]);
        let decisions = run_attempt(&mut coord, &mut roots, &local).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].pair, (0, 1));
    }
}
