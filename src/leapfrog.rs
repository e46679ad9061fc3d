//! Leapfrog integration of Hamiltonian dynamics with unit mass matrix.
//!
//! The potential is the target's energy `U = -log π`, so the velocity moves along
//! `-∇U`. Both functions update `position` and `velocity` in place.

use nalgebra::DVector;

use crate::error::Result;
use crate::target::LogPost;

/// Runs `n_steps` leapfrog steps of size `step_size`.
///
/// A half velocity step opens and closes the trajectory; the intermediate
/// half steps are merged into full steps between position updates.
pub fn leapfrog(
    position: &mut DVector<f64>,
    velocity: &mut DVector<f64>,
    target: &LogPost,
    step_size: f64,
    n_steps: usize,
) -> Result<()> {
    velocity.axpy(-0.5 * step_size, &target.gradient_energy(position)?, 1.0);
    for i in 0..n_steps {
        position.axpy(step_size, &*velocity, 1.0);
        if i + 1 < n_steps {
            velocity.axpy(-step_size, &target.gradient_energy(position)?, 1.0);
        }
    }
    velocity.axpy(-0.5 * step_size, &target.gradient_energy(position)?, 1.0);
    Ok(())
}

/// Integrates backwards in time, undoing [`leapfrog`] with the same arguments.
pub fn inverse_leapfrog(
    position: &mut DVector<f64>,
    velocity: &mut DVector<f64>,
    target: &LogPost,
    step_size: f64,
    n_steps: usize,
) -> Result<()> {
    velocity.neg_mut();
    leapfrog(position, velocity, target, step_size, n_steps)?;
    velocity.neg_mut();
    Ok(())
}
