// SPDX-License-Identifier: AGPL-3.0-only

//! Replica-exchange coordinator.
//!
//! Every attempt partitions the walkers into adjacent pairs — alternating
//! even/odd start by default, or drawn from a seeded RNG — and evaluates,
//! per pair, a Metropolis rule on the walkers' local statistical
//! temperatures at their current energies:
//!
//! ```text
//! Δ = (1/T_a(U_a) − 1/T_b(U_b)) · (U_a − U_b) / k_B
//! ```
//!
//! A pair is admissible only when each walker's energy lies inside the
//! *other's* window (the bin lookup must stay valid after the swap) and
//! both walkers have passed the stage gate; a walker still digging causes
//! an automatic reject. On accept the host migrates the configurations;
//! the STMD state (table, f, stage, histograms) stays bound to the walker
//! slot, and velocities are rescaled by √(T_new/T_old) of the slots'
//! reference kinetic temperatures.
//!
//! Given the swap and Boltzmann seeds the decision sequence is
//! deterministic: the Boltzmann RNG is consumed only on Δ < 0.

use crate::host::HostHooks;
use crate::stmd::table::local_temperature;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-walker state gathered across the roots communicator before each
/// attempt.
#[derive(Clone, Debug)]
pub struct WalkerSummary {
    /// Walker slot index.
    pub walker: usize,
    /// Slot-bound reference kinetic temperature T₀.
    pub kinetic_temp: f64,
    /// Latest unscaled statistical temperature T(U)·T₀.
    pub stat_temp: f64,
    /// Latest sampled potential energy.
    pub potential: f64,
    /// Schedule stage 1–4.
    pub stage: u8,
    /// Lower edge of the walker's energy window.
    pub e_min: f64,
    /// Upper edge of the walker's energy window.
    pub e_max: f64,
    /// Energy bin width Δ.
    pub bin_width: f64,
    /// The walker's Ŷ ladder over its window.
    pub ladder: Vec<f64>,
}

impl WalkerSummary {
    /// True when `u` can be binned inside this walker's window.
    #[must_use]
    pub fn admits(&self, u: f64) -> bool {
        let idx = (u / self.bin_width).round() as i64 - (self.e_min / self.bin_width).round() as i64;
        idx >= 1 && idx <= self.ladder.len() as i64 - 2
    }

    /// Unscaled statistical temperature at `u`, interpolated from this
    /// walker's own ladder. `None` outside the window interior.
    #[must_use]
    pub fn stat_temp_at(&self, u: f64) -> Option<f64> {
        if !self.admits(u) {
            return None;
        }
        let idx = ((u / self.bin_width).round() as i64
            - (self.e_min / self.bin_width).round() as i64) as usize;
        Some(local_temperature(&self.ladder, self.bin_width, u, idx) * self.kinetic_temp)
    }
}

/// Exchange schedule and seeds.
#[derive(Clone, Copy, Debug)]
pub struct ExchangePolicy {
    /// MD-step interval between attempts.
    pub nevery: u64,
    /// 0 alternates pair parity each attempt; nonzero seeds an RNG draw.
    pub seed_swap: u64,
    /// Seed for the Metropolis comparison draws.
    pub seed_boltz: u64,
    /// Minimum stage both partners must have reached (EX gate).
    pub stage_gate: u8,
    /// Boltzmann constant in the host's energy/temperature units.
    pub boltzmann: f64,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            nevery: 1_000,
            seed_swap: 0,
            seed_boltz: 20_120_116,
            stage_gate: 2,
            boltzmann: 1.0,
        }
    }
}

/// Outcome of one candidate pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SwapVerdict {
    /// Swap admitted and the Metropolis draw passed.
    Accepted {
        /// The Metropolis exponent.
        delta: f64,
        /// Velocity rescale for the lower walker's incoming configuration.
        vel_scale_lo: f64,
        /// Velocity rescale for the higher walker's incoming configuration.
        vel_scale_hi: f64,
    },
    /// Admitted but the Metropolis draw failed.
    RejectedMetropolis {
        /// The Metropolis exponent.
        delta: f64,
    },
    /// A walker's energy falls outside its partner's window.
    RejectedWindow,
    /// A partner has not reached the stage gate.
    RejectedStage,
}

/// One pair's decision within an attempt.
#[derive(Clone, Debug)]
pub struct SwapDecision {
    /// Attempt ordinal (0-based).
    pub attempt: u64,
    /// The paired walker slots (lower, higher).
    pub pair: (usize, usize),
    /// What happened.
    pub verdict: SwapVerdict,
}

impl SwapDecision {
    /// Whether the configurations migrate.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self.verdict, SwapVerdict::Accepted { .. })
    }
}

/// Drives the periodic exchange attempts for one universe of walkers.
#[derive(Debug)]
pub struct ExchangeCoordinator {
    policy: ExchangePolicy,
    rng_swap: Option<StdRng>,
    rng_boltz: StdRng,
    attempts: u64,
    accepted: u64,
}

impl ExchangeCoordinator {
    /// Build a coordinator; a nonzero swap seed switches the pair parity
    /// from alternation to reproducible random draws.
    #[must_use]
    pub fn new(policy: ExchangePolicy) -> Self {
        let rng_swap = (policy.seed_swap != 0).then(|| StdRng::seed_from_u64(policy.seed_swap));
        Self {
            rng_swap,
            rng_boltz: StdRng::seed_from_u64(policy.seed_boltz),
            policy,
            attempts: 0,
            accepted: 0,
        }
    }

    /// The configured policy.
    #[must_use]
    pub const fn policy(&self) -> &ExchangePolicy {
        &self.policy
    }

    /// Whether `step` is an exchange step.
    #[must_use]
    pub const fn due(&self, step: u64) -> bool {
        step > 0 && step % self.policy.nevery == 0
    }

    /// Attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Pairs accepted so far.
    #[must_use]
    pub const fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Run one attempt over the gathered summaries (ordered by walker
    /// slot) and return the per-pair decisions.
    pub fn attempt(&mut self, summaries: &[WalkerSummary]) -> Vec<SwapDecision> {
        let parity = match self.rng_swap.as_mut() {
            Some(rng) => rng.gen_range(0..2usize),
            None => (self.attempts % 2) as usize,
        };
        let attempt = self.attempts;
        self.attempts += 1;

        let mut decisions = Vec::new();
        let mut lo = parity;
        while lo + 1 < summaries.len() {
            let verdict = self.evaluate(&summaries[lo], &summaries[lo + 1]);
            if matches!(verdict, SwapVerdict::Accepted { .. }) {
                self.accepted += 1;
            }
            decisions.push(SwapDecision {
                attempt,
                pair: (summaries[lo].walker, summaries[lo + 1].walker),
                verdict,
            });
            lo += 2;
        }
        decisions
    }

    /// Evaluate one candidate pair. Window admissibility and the stage
    /// gate come before any Metropolis arithmetic, so gated rejects never
    /// advance the Boltzmann RNG.
    fn evaluate(&mut self, a: &WalkerSummary, b: &WalkerSummary) -> SwapVerdict {
        if !b.admits(a.potential) || !a.admits(b.potential) {
            return SwapVerdict::RejectedWindow;
        }
        if a.stage < self.policy.stage_gate || b.stage < self.policy.stage_gate {
            return SwapVerdict::RejectedStage;
        }

        let (Some(t_a), Some(t_b)) = (a.stat_temp_at(a.potential), b.stat_temp_at(b.potential))
        else {
            return SwapVerdict::RejectedWindow;
        };
        let delta = (1.0 / t_a - 1.0 / t_b) * (a.potential - b.potential) / self.policy.boltzmann;

        let accept = delta >= 0.0 || self.rng_boltz.gen::<f64>() < delta.exp();
        if accept {
            SwapVerdict::Accepted {
                delta,
                vel_scale_lo: (a.kinetic_temp / b.kinetic_temp).sqrt(),
                vel_scale_hi: (b.kinetic_temp / a.kinetic_temp).sqrt(),
            }
        } else {
            SwapVerdict::RejectedMetropolis { delta }
        }
    }

    /// Apply accepted decisions through the host: migrate configurations
    /// and rescale the incoming velocities.
    pub fn apply(decisions: &[SwapDecision], host: &mut dyn HostHooks) {
        for d in decisions {
            if let SwapVerdict::Accepted {
                vel_scale_lo,
                vel_scale_hi,
                ..
            } = d.verdict
            {
                host.swap_configurations(d.pair.0, d.pair.1);
                host.rescale_velocities(d.pair.0, vel_scale_lo);
                host.rescale_velocities(d.pair.1, vel_scale_hi);
            }
        }
    }

    /// One status line per attempt, in the tempering log style.
    pub fn print_status(&self, decisions: &[SwapDecision]) {
        let accepted = decisions.iter().filter(|d| d.accepted()).count();
        println!(
            "RESTMD: attempt {}  pairs= {}  accepted= {}  lifetime acc= {}/{}",
            self.attempts.saturating_sub(1),
            decisions.len(),
            accepted,
            self.accepted,
            self.attempts,
        );
    }
}
