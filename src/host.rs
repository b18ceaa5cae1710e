// SPDX-License-Identifier: AGPL-3.0-only

//! Host-engine contract.
//!
//! The MD integrator owns positions, velocities, forces, and the MPI
//! layout. Per step it must (a) compute forces and the potential energy,
//! (b) call [`crate::StmdEngine::on_step`], and (c) multiply every
//! in-group force by the returned Γ — [`scale_forces`] does the multiply
//! data-parallel over atoms, which needs no locking because each atom is
//! owned by exactly one rank. Before the next step the host re-computes
//! the potential energy.
//!
//! Every `nevery` steps the host additionally runs the exchange attempt
//! and, on accept, performs the configuration swap and velocity rescale
//! through [`HostHooks`].

use crate::error::RestmdError;
use rayon::prelude::*;

/// Reject any integrator that is not velocity-Verlet. The STMD force
/// rescale is defined per whole-step force evaluation; multi-timescale
/// integrators would scale partial force contributions.
///
/// # Errors
///
/// [`RestmdError::IntegratorUnsupported`] for any other style string.
pub fn require_verlet(style: &str) -> Result<(), RestmdError> {
    if style.contains("verlet") {
        Ok(())
    } else {
        Err(RestmdError::IntegratorUnsupported(style.to_string()))
    }
}

/// Multiply every force vector by Γ.
pub fn scale_forces(forces: &mut [[f64; 3]], gamma: f64) {
    forces.par_iter_mut().for_each(|f| {
        f[0] *= gamma;
        f[1] *= gamma;
        f[2] *= gamma;
    });
}

/// Multiply the forces of masked-in atoms by Γ, leaving the rest alone.
pub fn scale_forces_masked(forces: &mut [[f64; 3]], in_group: &[bool], gamma: f64) {
    forces
        .par_iter_mut()
        .zip(in_group.par_iter())
        .for_each(|(f, &m)| {
            if m {
                f[0] *= gamma;
                f[1] *= gamma;
                f[2] *= gamma;
            }
        });
}

/// Exchange-time operations only the host can perform.
///
/// Configurations (positions, velocities, box) migrate between the paired
/// partitions; the STMD state stays bound to the walker slot.
pub trait HostHooks {
    /// Swap the full simulation state of walkers `a` and `b`.
    fn swap_configurations(&mut self, a: usize, b: usize);

    /// Rescale walker `walker`'s velocities by `factor` =
    /// √(`T_new`/`T_old`).
    fn rescale_velocities(&mut self, walker: usize, factor: f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn verlet_styles_pass_the_gate() {
        require_verlet("verlet").unwrap();
        require_verlet("verlet/split").unwrap();
    }

    #[test]
    fn respa_is_rejected() {
        let err = require_verlet("respa").unwrap_err();
        assert!(err.to_string().contains("verlet"));
    }

    #[test]
    fn forces_scale_uniformly() {
        let mut f = vec![[1.0, -2.0, 4.0]; 257];
        scale_forces(&mut f, 0.5);
        for row in &f {
            assert_eq!(row, &[0.5, -1.0, 2.0]);
        }
    }

    #[test]
    fn masked_scaling_skips_out_of_group_atoms() {
        let mut f = vec![[2.0, 2.0, 2.0]; 4];
        let mask = vec![true, false, true, false];
        scale_forces_masked(&mut f, &mask, 0.25);
        assert_eq!(f[0], [0.5, 0.5, 0.5]);
        assert_eq!(f[1], [2.0, 2.0, 2.0]);
        assert_eq!(f[2], [0.5, 0.5, 0.5]);
        assert_eq!(f[3], [2.0, 2.0, 2.0]);
    }
}
