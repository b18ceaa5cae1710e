// SPDX-License-Identifier: AGPL-3.0-only

//! Energy-bin temperature table.
//!
//! Discretizes the potential-energy window [`E_min`, `E_max`] into equal
//! bins of width Δ and stores, per bin, the running estimate Ŷ of the
//! statistical temperature in units of the reference kinetic temperature
//! T₀, plus three histograms: the current flatness window, the cumulative
//! run total, and the production-phase counts.
//!
//! The multiplicative update law acts on the *neighbors* of the sampled
//! bin, which is why a sample whose bin lands on index 0 or N−1 is a
//! domain error: the rule would reach outside the table.

use crate::error::RestmdError;

/// Linear interpolation of the statistical temperature inside bin `i`.
///
/// `e` is the offset of `u` from the bin center; the ladder is sampled
/// toward whichever neighbor the offset points at. Requires
/// `1 <= i <= ladder.len() - 2`.
pub(crate) fn local_temperature(ladder: &[f64], bin_width: f64, u: f64, i: usize) -> f64 {
    debug_assert!(i >= 1 && i + 1 < ladder.len());
    let e = u - (u / bin_width).round() * bin_width;
    if e > 0.0 {
        let lam = (ladder[i + 1] - ladder[i]) / bin_width;
        lam.mul_add(e, ladder[i])
    } else if e < 0.0 {
        let lam = (ladder[i] - ladder[i - 1]) / bin_width;
        lam.mul_add(e, ladder[i])
    } else {
        ladder[i]
    }
}

/// Per-bin statistical temperature estimates and sampling histograms.
#[derive(Clone, Debug)]
pub struct TemperatureTable {
    bin_width: f64,
    e_min: f64,
    bin_min_idx: i64,
    t_floor: f64,
    t_ceil: f64,
    ladder: Vec<f64>,
    hist: Vec<u64>,
    hist_total: Vec<u64>,
    hist_production: Vec<u64>,
    /// Set once bin 0 has been clamped to the ladder floor; the stage-1
    /// promotion check reads this instead of relying on bit-exact equality.
    floor_clamped: bool,
}

impl TemperatureTable {
    /// Allocate a table over [`e_min`, `e_max`] with bins of width
    /// `bin_width`. Every Ŷ starts at the scaled ceiling `t_ceil`; all
    /// histograms start empty.
    #[must_use]
    pub fn new(e_min: f64, e_max: f64, bin_width: f64, t_floor: f64, t_ceil: f64) -> Self {
        let bin_min_idx = (e_min / bin_width).round() as i64;
        let bin_max_idx = (e_max / bin_width).round() as i64;
        let n = (bin_max_idx - bin_min_idx + 1).max(0) as usize;
        Self {
            bin_width,
            e_min,
            bin_min_idx,
            t_floor,
            t_ceil,
            ladder: vec![t_ceil; n],
            hist: vec![0; n],
            hist_total: vec![0; n],
            hist_production: vec![0; n],
            floor_clamped: false,
        }
    }

    /// Number of energy bins N.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.ladder.len()
    }

    /// Energy bin width Δ.
    #[must_use]
    pub const fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Grid index of the window's lowest bin, `round(E_min/Δ)`.
    #[must_use]
    pub const fn bin_min_idx(&self) -> i64 {
        self.bin_min_idx
    }

    /// Grid index of the window's highest bin.
    #[must_use]
    pub fn bin_max_idx(&self) -> i64 {
        self.bin_min_idx + self.ladder.len() as i64 - 1
    }

    /// Label energy of bin `i` for the diagnostic streams.
    #[must_use]
    pub fn energy_at(&self, i: usize) -> f64 {
        (i as f64).mul_add(self.bin_width, self.e_min)
    }

    /// Scaled ladder floor T₁ = `T_lo`/T₀.
    #[must_use]
    pub const fn t_floor(&self) -> f64 {
        self.t_floor
    }

    /// Scaled ladder ceiling T₂ = `T_hi`/T₀.
    #[must_use]
    pub const fn t_ceil(&self) -> f64 {
        self.t_ceil
    }

    /// The Ŷ ladder (statistical temperature over T₀, one entry per bin).
    #[must_use]
    pub fn ladder(&self) -> &[f64] {
        &self.ladder
    }

    /// Current-window histogram.
    #[must_use]
    pub fn hist(&self) -> &[u64] {
        &self.hist
    }

    /// Cumulative histogram over the whole run. Never reset.
    #[must_use]
    pub fn hist_total(&self) -> &[u64] {
        &self.hist_total
    }

    /// Production-phase histogram (stages ≥ 3 only).
    #[must_use]
    pub fn hist_production(&self) -> &[u64] {
        &self.hist_production
    }

    /// True once bin 0 has been clamped to the floor.
    #[must_use]
    pub const fn floor_clamped(&self) -> bool {
        self.floor_clamped
    }

    /// Map a sampled potential energy to its bin index.
    ///
    /// The strict interior requirement `1 <= i <= N−2` exists because
    /// [`Self::update`] touches `i−1` and `i+1`.
    ///
    /// # Errors
    ///
    /// [`RestmdError::EnergyOutOfRange`] when the sample falls outside the
    /// window or on either boundary bin.
    pub fn bin_of(&self, u: f64) -> Result<usize, RestmdError> {
        let idx = (u / self.bin_width).round() as i64 - self.bin_min_idx;
        if idx < 1 || idx > self.ladder.len() as i64 - 2 {
            return Err(RestmdError::EnergyOutOfRange {
                potential: u,
                bin_width: self.bin_width,
                index: idx,
            });
        }
        Ok(idx as usize)
    }

    /// Apply the STMD multiplicative rule around the sampled bin `i`,
    /// leaving Ŷ\[i\] itself untouched.
    ///
    /// The bin visited from above is nudged up, the one visited from below
    /// is nudged down; at flat-histogram equilibrium the ladder equals the
    /// microcanonical T(U). Both touched bins are clamped back into
    /// [T₁, T₂].
    pub fn update(&mut self, i: usize, df: f64) {
        let hi = self.ladder[i + 1];
        let lo = self.ladder[i - 1];
        self.ladder[i + 1] = hi / df.mul_add(-hi, 1.0);
        self.ladder[i - 1] = lo / df.mul_add(lo, 1.0);

        if self.ladder[i - 1] < self.t_floor {
            self.ladder[i - 1] = self.t_floor;
            if i == 1 {
                self.floor_clamped = true;
            }
        }
        if self.ladder[i + 1] > self.t_ceil {
            self.ladder[i + 1] = self.t_ceil;
        }
    }

    /// Γ(U) and the interpolated local statistical temperature at `u`
    /// inside bin `i`. Γ = 1 / `T_local` is the per-step force scale.
    #[must_use]
    pub fn gamma(&self, u: f64, i: usize) -> (f64, f64) {
        let t_local = local_temperature(&self.ladder, self.bin_width, u, i);
        (1.0 / t_local, t_local)
    }

    /// Count a visit to bin `i` in the window and cumulative histograms,
    /// and in the production histogram when `production` holds.
    pub fn record(&mut self, i: usize, production: bool) {
        self.hist[i] += 1;
        self.hist_total[i] += 1;
        if production {
            self.hist_production[i] += 1;
        }
    }

    /// Zero the window histogram. The cumulative and production
    /// histograms are untouched.
    pub fn reset_window(&mut self) {
        self.hist.fill(0);
    }

    /// Flatten the cold prefix of the ladder: every bin below the argmin
    /// (ties: smallest index) is pulled down to the minimum.
    ///
    /// Idempotent; running it again changes nothing until new updates
    /// move the ladder.
    pub fn dig(&mut self) {
        let mut keep_min = self.ladder[0];
        let mut n_keep_min = 0;
        for (i, &y) in self.ladder.iter().enumerate() {
            if y < keep_min {
                keep_min = y;
                n_keep_min = i;
            }
        }
        for y in &mut self.ladder[..n_keep_min] {
            *y = keep_min;
        }
    }

    /// Flatness of the window histogram over bins whose Ŷ lies strictly
    /// inside (`ct_min`, `ct_max`).
    ///
    /// Returns `None` when no bin qualifies, otherwise whether every
    /// qualifying bin sits within `tol` relative deviation of the mean.
    /// An all-zero qualifying histogram reads as flat: equal counts of
    /// zero carry no deviation signal.
    #[must_use]
    pub fn flatness(&self, ct_min: f64, ct_max: f64, tol: f64) -> Option<bool> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (h, &y) in self.hist.iter().zip(&self.ladder) {
            if y > ct_min && y < ct_max {
                sum += *h as f64;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        let mean = sum / count as f64;
        if mean == 0.0 {
            return Some(true);
        }
        let flat = self
            .hist
            .iter()
            .zip(&self.ladder)
            .filter(|(_, &y)| y > ct_min && y < ct_max)
            .all(|(&h, _)| ((h as f64 - mean) / mean).abs() <= tol);
        Some(flat)
    }

    /// Normalized window-visit probabilities. Recomputed on demand; an
    /// empty window yields all zeros.
    #[must_use]
    pub fn prob(&self) -> Vec<f64> {
        let total: u64 = self.hist.iter().sum();
        if total == 0 {
            return vec![0.0; self.hist.len()];
        }
        self.hist
            .iter()
            .map(|&h| h as f64 / total as f64)
            .collect()
    }

    /// Overwrite ladder, cumulative, and production histograms from a
    /// restart blob, along with the scaled ladder bounds it recorded.
    /// The window histogram stays empty by the restart contract.
    pub(crate) fn restore(
        &mut self,
        t_floor: f64,
        t_ceil: f64,
        ladder: Vec<f64>,
        hist_total: Vec<u64>,
        hist_production: Vec<u64>,
    ) {
        self.t_floor = t_floor;
        self.t_ceil = t_ceil;
        self.ladder = ladder;
        self.hist_total = hist_total;
        self.hist_production = hist_production;
        self.hist = vec![0; self.ladder.len()];
        self.floor_clamped = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn five_bin_table() -> TemperatureTable {
        // N = 5, Δ = 1, window [0, 4], ladder at ceiling 2.0, floor 0.5.
        TemperatureTable::new(0.0, 4.0, 1.0, 0.5, 2.0)
    }

    #[test]
    fn bin_count_from_window() {
        let t = five_bin_table();
        assert_eq!(t.n_bins(), 5);
        assert_eq!(t.bin_min_idx(), 0);
        assert_eq!(t.bin_max_idx(), 4);
    }

    #[test]
    fn bin_of_interior_and_boundaries() {
        let t = five_bin_table();
        assert_eq!(t.bin_of(2.0).unwrap(), 2);
        assert_eq!(t.bin_of(1.2).unwrap(), 1);
        // Boundary bins are rejected: the update needs both neighbors.
        assert!(t.bin_of(0.0).is_err());
        assert!(t.bin_of(4.0).is_err());
        assert!(t.bin_of(-7.0).is_err());
        assert!(t.bin_of(11.0).is_err());
    }

    #[test]
    fn single_bin_ping() {
        // df = 0.01, ladder at 2.0, so df·Y = 0.02 on both neighbors.
        let mut t = five_bin_table();
        let i = t.bin_of(2.0).unwrap();
        assert_eq!(i, 2);
        t.update(i, 0.01);
        assert!((t.ladder()[1] - 2.0 / 1.02).abs() < 1e-14);
        assert!((t.ladder()[3] - 2.0 / 0.98).abs() < 1e-14);
        assert!((t.ladder()[2] - 2.0).abs() < f64::EPSILON);
        let (gamma, t_local) = t.gamma(2.0, i);
        assert!((t_local - 2.0).abs() < f64::EPSILON);
        assert!((gamma - 0.5).abs() < f64::EPSILON);
        t.record(i, false);
        assert_eq!(t.hist()[2], 1);
        assert_eq!(t.hist_total()[2], 1);
        assert_eq!(t.hist_production()[2], 0);
    }

    #[test]
    fn ceiling_clamp_never_exceeded() {
        // Drive bin 3 from below 10_000 times; it must stay <= T2. The
        // floor side is symmetric.
        let mut t = five_bin_table();
        for _ in 0..10_000 {
            t.update(2, 0.01);
            for &y in t.ladder() {
                assert!(y <= 2.0 + 1e-15, "ladder exceeded ceiling: {y}");
                assert!(y >= 0.5 - 1e-15, "ladder broke floor: {y}");
            }
        }
        assert!((t.ladder()[3] - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn floor_clamp_sets_sentinel_on_bin_zero() {
        let mut t = five_bin_table();
        assert!(!t.floor_clamped());
        // Huge df forces the downhill neighbor straight through the floor.
        for _ in 0..2_000 {
            t.update(1, 0.05);
        }
        assert!(t.floor_clamped());
        assert!((t.ladder()[0] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn gamma_interpolates_toward_sampled_side() {
        let mut t = five_bin_table();
        t.update(2, 0.01); // ladder[1] < 2, ladder[3] > 2 before clamp
        let (_, t_plus) = t.gamma(2.25, 2);
        let (_, t_minus) = t.gamma(1.75, 2);
        assert!(t_plus > t.ladder()[2] - 1e-15);
        assert!(t_minus < t.ladder()[2] + 1e-15);
    }

    #[test]
    fn gamma_continuous_at_bin_center() {
        let mut t = five_bin_table();
        t.update(2, 0.01);
        let (g0, _) = t.gamma(2.0, 2);
        let (g_eps_up, _) = t.gamma(2.0 + 1e-9, 2);
        let (g_eps_dn, _) = t.gamma(2.0 - 1e-9, 2);
        assert!((g0 - g_eps_up).abs() < 1e-8);
        assert!((g0 - g_eps_dn).abs() < 1e-8);
    }

    #[test]
    fn gamma_inverts_temperature_when_frozen() {
        // With df = 0 the ladder never moves and Γ·T_local ≡ 1 exactly.
        let t = five_bin_table();
        for u in [1.1, 1.9, 2.0, 2.4, 2.9] {
            let i = t.bin_of(u).unwrap();
            let (gamma, t_local) = t.gamma(u, i);
            assert!((gamma * t_local - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn dig_pulls_prefix_to_minimum() {
        let mut t = five_bin_table();
        t.restore(0.5, 2.0, vec![2.0, 1.8, 1.4, 1.9, 2.0], vec![0; 5], vec![0; 5]);
        t.dig();
        assert_eq!(t.ladder(), &[1.4, 1.4, 1.4, 1.9, 2.0]);
    }

    #[test]
    fn dig_tie_takes_smallest_index() {
        let mut t = five_bin_table();
        t.restore(0.5, 2.0, vec![2.0, 1.4, 1.8, 1.4, 2.0], vec![0; 5], vec![0; 5]);
        t.dig();
        // argmin ties resolve to bin 1; bins above it are untouched.
        assert_eq!(t.ladder(), &[1.4, 1.4, 1.8, 1.4, 2.0]);
    }

    #[test]
    fn dig_is_idempotent() {
        let mut t = five_bin_table();
        t.restore(0.5, 2.0, vec![2.0, 1.8, 1.4, 1.9, 2.0], vec![0; 5], vec![0; 5]);
        t.dig();
        let once = t.ladder().to_vec();
        t.dig();
        assert_eq!(t.ladder(), &once[..]);
    }

    #[test]
    fn flatness_requires_qualifying_bins() {
        let t = five_bin_table();
        // Ladder sits at the ceiling; a cutoff band below it excludes all.
        assert_eq!(t.flatness(0.6, 1.9, 0.2), None);
    }

    #[test]
    fn flatness_detects_outlier_bin() {
        let mut t = five_bin_table();
        t.restore(0.5, 2.0, vec![1.0; 5], vec![0; 5], vec![0; 5]);
        for _ in 0..10 {
            t.record(1, false);
            t.record(2, false);
            t.record(3, false);
        }
        assert_eq!(t.flatness(0.6, 1.9, 0.2), Some(true));
        // Push one bin 50% over the mean.
        for _ in 0..7 {
            t.record(2, false);
        }
        assert_eq!(t.flatness(0.6, 1.9, 0.2), Some(false));
    }

    #[test]
    fn flatness_of_empty_window_is_flat() {
        let mut t = five_bin_table();
        t.restore(0.5, 2.0, vec![1.0; 5], vec![0; 5], vec![0; 5]);
        assert_eq!(t.flatness(0.6, 1.9, 0.2), Some(true));
    }

    #[test]
    fn prob_normalizes_window_counts() {
        let mut t = five_bin_table();
        t.record(1, false);
        t.record(2, false);
        t.record(2, false);
        t.record(3, false);
        let p = t.prob();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-15);
        assert!((p[2] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn prob_of_empty_window_is_zero() {
        let t = five_bin_table();
        assert!(t.prob().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn reset_window_preserves_cumulative() {
        let mut t = five_bin_table();
        t.record(2, true);
        t.reset_window();
        assert_eq!(t.hist()[2], 0);
        assert_eq!(t.hist_total()[2], 1);
        assert_eq!(t.hist_production()[2], 1);
    }
}
