//! Hamiltonian Monte Carlo with a unit mass matrix.
//!
//! Each transition refreshes the velocity from `N(0, I)`, integrates the
//! dynamics with [`leapfrog`] for `n_leapfrog` steps of size `step_size`, and
//! accepts the end point with probability `min(1, exp(H(current) - H(proposal)))`
//! where `H(x, v) = -log π(x) + ½‖v‖²`.
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use regen_mcmc::core::{ChainConfig, MarkovChain};
//! use regen_mcmc::distributions::Gaussian;
//! use regen_mcmc::hmc::HMC;
//! use regen_mcmc::target::LogPost;
//!
//! let target = LogPost::differentiable(2, DMatrix::zeros(0, 0), Gaussian::standard(2)).unwrap();
//! let mut sampler = HMC::new(target, DVector::zeros(2), ChainConfig::new(100, 1, 500))
//!     .unwrap()
//!     .with_step_size(0.3)
//!     .unwrap()
//!     .with_seed(42)
//!     .unwrap();
//! sampler.run().unwrap();
//! assert_eq!(sampler.samples().unwrap().len(), 500);
//! ```

use log::{debug, warn};
use nalgebra::DVector;

use crate::core::{Chain, ChainConfig, MarkovChain};
use crate::error::{invalid, precondition, Result};
use crate::leapfrog::leapfrog;
use crate::target::LogPost;

pub const DEFAULT_STEP_SIZE: f64 = 0.01;
pub const DEFAULT_N_LEAPFROG: usize = 100;

const ADAPT_START: f64 = 2.0;
const ADAPT_DECREMENT: f64 = 0.01;
const ADAPT_FLOOR: f64 = 0.015;
const ADAPT_N_LEAPFROG: usize = 100;
const ADAPT_PROBE: usize = 1000;
const ADAPT_TARGET_RATE: f64 = 0.65;

/// A Hamiltonian Monte Carlo kernel.
#[derive(Debug, Clone)]
pub struct HMC {
    chain: Chain,
    step_size: f64,
    n_leapfrog: usize,
    velocity: DVector<f64>,
    velocity_proposal: DVector<f64>,
}

impl HMC {
    /// Creates a sampler with step size 0.01 and 100 leapfrog steps.
    ///
    /// Fails with `PreconditionViolation` when `target` has no gradient.
    pub fn new(target: LogPost, initial_state: DVector<f64>, config: ChainConfig) -> Result<Self> {
        require_gradient(&target)?;
        let dim = target.dim();
        Ok(Self {
            chain: Chain::new(target, initial_state, config)?,
            step_size: DEFAULT_STEP_SIZE,
            n_leapfrog: DEFAULT_N_LEAPFROG,
            velocity: DVector::zeros(dim),
            velocity_proposal: DVector::zeros(dim),
        })
    }

    /// Fails with `PreconditionViolation` once the chain has drawn a random
    /// number.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.chain.set_seed(seed)?;
        Ok(self)
    }

    pub fn with_step_size(mut self, step_size: f64) -> Result<Self> {
        self.set_step_size(step_size)?;
        Ok(self)
    }

    pub fn with_n_leapfrog(mut self, n_leapfrog: usize) -> Result<Self> {
        self.set_n_leapfrog(n_leapfrog)?;
        Ok(self)
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn set_step_size(&mut self, step_size: f64) -> Result<()> {
        if !(step_size > 0.0 && step_size.is_finite()) {
            return Err(invalid(format!(
                "leapfrog step size must be positive and finite, got {step_size}"
            )));
        }
        self.step_size = step_size;
        Ok(())
    }

    pub fn n_leapfrog(&self) -> usize {
        self.n_leapfrog
    }

    pub fn set_n_leapfrog(&mut self, n_leapfrog: usize) -> Result<()> {
        if n_leapfrog == 0 {
            return Err(invalid("number of leapfrog steps must be at least 1"));
        }
        self.n_leapfrog = n_leapfrog;
        Ok(())
    }

    /// Replaces the target. The new target must provide a gradient.
    pub fn set_target(&mut self, target: LogPost) -> Result<()> {
        require_gradient(&target)?;
        self.chain.set_target(target)
    }

    /// Moves accepted during the last run, burn-in included.
    pub fn n_accepts(&self) -> u64 {
        self.chain.n_accepted()
    }

    /**
    Searches for a step size with acceptance rate above 0.65.

    Starting from `ε = 2.0` with 100 leapfrog steps, each probe applies the
    kernel 1000 times and lowers `ε` by 0.01 until the rate exceeds 0.65 or `ε`
    reaches 0.015. The caller's leapfrog count is restored afterwards, also when
    a probe fails. Adaptation moves the chain but does not count towards the
    acceptance statistics of a run.
    */
    pub fn adapt_step_size(&mut self) -> Result<f64> {
        let n_leapfrog = self.n_leapfrog;
        self.n_leapfrog = ADAPT_N_LEAPFROG;
        let found = self.search_step_size();
        self.n_leapfrog = n_leapfrog;
        let (step_size, rate) = found?;
        if rate > ADAPT_TARGET_RATE {
            debug!("HMC step size adapted to {step_size:.3} (p(accept)≈{rate:.2})");
        } else {
            warn!(
                "HMC step size reached its floor {step_size:.3} with p(accept)≈{rate:.2} <= {ADAPT_TARGET_RATE}"
            );
        }
        Ok(step_size)
    }

    fn search_step_size(&mut self) -> Result<(f64, f64)> {
        self.step_size = ADAPT_START;
        let mut rate = 0.0;
        while self.step_size > ADAPT_FLOOR {
            let mut accepts = 0usize;
            for _ in 0..ADAPT_PROBE {
                if self.apply_kernel()? {
                    accepts += 1;
                }
            }
            rate = accepts as f64 / ADAPT_PROBE as f64;
            if rate > ADAPT_TARGET_RATE {
                break;
            }
            self.step_size -= ADAPT_DECREMENT;
        }
        Ok((self.step_size, rate))
    }

    fn hamiltonian(&self, state: &DVector<f64>, velocity: &DVector<f64>) -> f64 {
        self.chain.target.energy(state) + 0.5 * velocity.norm_squared()
    }
}

fn require_gradient(target: &LogPost) -> Result<()> {
    if !target.has_gradient() {
        return Err(precondition("HMC needs the gradient of the log-density"));
    }
    Ok(())
}

impl MarkovChain for HMC {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    fn label(&self) -> &'static str {
        "HMC"
    }

    fn apply_kernel(&mut self) -> Result<bool> {
        self.velocity = self.chain.draw_standard_normal();
        self.velocity_proposal.copy_from(&self.velocity);

        let chain = &mut self.chain;
        chain.proposal.copy_from(&chain.current);
        leapfrog(
            &mut chain.proposal,
            &mut self.velocity_proposal,
            &chain.target,
            self.step_size,
            self.n_leapfrog,
        )?;

        let log_accept = self.hamiltonian(&self.chain.current, &self.velocity)
            - self.hamiltonian(&self.chain.proposal, &self.velocity_proposal);
        Ok(self.chain.metropolis_step(log_accept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use crate::error::McmcError;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    const SEED: u64 = 42;

    fn standard_target(dim: usize) -> LogPost {
        LogPost::differentiable(dim, DMatrix::zeros(0, 0), Gaussian::standard(dim)).unwrap()
    }

    #[test]
    fn requires_gradient() {
        let target = LogPost::new(1, DMatrix::zeros(0, 0), Gaussian::standard(1)).unwrap();
        let err = HMC::new(target.clone(), DVector::zeros(1), ChainConfig::default()).unwrap_err();
        assert!(matches!(err, McmcError::PreconditionViolation(_)));

        let mut sampler =
            HMC::new(standard_target(1), DVector::zeros(1), ChainConfig::default()).unwrap();
        assert!(sampler.set_target(target).is_err());
    }

    #[test]
    fn tuning_parameters_are_validated() {
        let mut sampler =
            HMC::new(standard_target(2), DVector::zeros(2), ChainConfig::default()).unwrap();
        assert_eq!(sampler.step_size(), DEFAULT_STEP_SIZE);
        assert_eq!(sampler.n_leapfrog(), DEFAULT_N_LEAPFROG);
        assert!(sampler.set_step_size(0.0).is_err());
        assert!(sampler.set_step_size(f64::NAN).is_err());
        assert!(sampler.set_n_leapfrog(0).is_err());
        sampler.set_step_size(0.2).unwrap();
        sampler.set_n_leapfrog(7).unwrap();
        assert_eq!((sampler.step_size(), sampler.n_leapfrog()), (0.2, 7));
    }

    #[test]
    fn small_steps_are_almost_always_accepted() {
        let mut sampler =
            HMC::new(standard_target(3), DVector::zeros(3), ChainConfig::new(0, 1, 500))
                .unwrap()
                .with_step_size(0.01)
                .unwrap()
                .with_n_leapfrog(10)
                .unwrap()
                .with_seed(SEED)
                .unwrap();
        sampler.run().unwrap();
        assert!(sampler.acceptance_rate() > 0.99);
        assert_eq!(sampler.n_accepts(), sampler.chain().n_accepted());
    }

    #[test]
    fn same_seed_same_chain() {
        let build = || {
            HMC::new(standard_target(2), DVector::zeros(2), ChainConfig::new(10, 2, 50))
                .unwrap()
                .with_step_size(0.4)
                .unwrap()
                .with_n_leapfrog(5)
                .unwrap()
                .with_seed(SEED)
                .unwrap()
        };
        let (mut a, mut b) = (build(), build());
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.samples().unwrap(), b.samples().unwrap());
    }

    #[test]
    fn adaptation_stops_at_first_step_size_above_target_rate() {
        let mut sampler = HMC::new(standard_target(1), DVector::zeros(1), ChainConfig::new(0, 1, 10))
            .unwrap()
            .with_n_leapfrog(3)
            .unwrap()
            .with_seed(SEED)
            .unwrap();
        let mut replay = sampler.clone();

        let eps = sampler.adapt_step_size().unwrap();
        assert!(eps < ADAPT_START, "step size was never decreased");
        assert!(eps > ADAPT_FLOOR);
        assert_eq!(sampler.n_leapfrog(), 3);
        assert_eq!(sampler.step_size(), eps);
        assert_eq!(sampler.chain().n_proposed(), 0);

        // Probe every step size from 2.0 down to `eps` on an identical chain.
        let n_probes = ((ADAPT_START - eps) / ADAPT_DECREMENT).round() as usize + 1;
        replay.n_leapfrog = ADAPT_N_LEAPFROG;
        replay.step_size = ADAPT_START;
        let mut rates = Vec::with_capacity(n_probes);
        for i in 0..n_probes {
            if i > 0 {
                replay.step_size -= ADAPT_DECREMENT;
            }
            let accepts = (0..ADAPT_PROBE)
                .filter(|_| replay.apply_kernel().unwrap())
                .count();
            rates.push(accepts as f64 / ADAPT_PROBE as f64);
        }
        assert_eq!(replay.step_size, eps);
        let (last, earlier) = rates.split_last().unwrap();
        assert!(*last > ADAPT_TARGET_RATE, "final probe rate {last}");
        assert!(
            earlier.iter().all(|r| *r <= ADAPT_TARGET_RATE),
            "search skipped an accepting step size: {earlier:?}"
        );
        assert_eq!(replay.chain().current_state(), sampler.chain().current_state());
    }

    #[test]
    fn adaptation_gives_up_at_the_floor() {
        // Leapfrog is unstable for ε > 2σ, so no probe above the floor accepts.
        const VAR: f64 = 0.005 * 0.005;
        let target = LogPost::new(1, DMatrix::zeros(0, 0), |x: &DVector<f64>, _: &DMatrix<f64>| {
            -0.5 * x[0] * x[0] / VAR
        })
        .unwrap()
        .with_gradient(|x: &DVector<f64>, _: &DMatrix<f64>| -x / VAR);
        let mut sampler = HMC::new(target, DVector::zeros(1), ChainConfig::new(0, 1, 10))
            .unwrap()
            .with_n_leapfrog(7)
            .unwrap()
            .with_seed(SEED)
            .unwrap();
        let eps = sampler.adapt_step_size().unwrap();
        // Every probe from 2.0 down was tried; the last decrement crosses the floor.
        assert!(eps <= ADAPT_FLOOR && eps > ADAPT_FLOOR - ADAPT_DECREMENT - 1e-9, "step size {eps}");
        assert_eq!(sampler.step_size(), eps);
        assert_eq!(sampler.n_leapfrog(), 7);
        assert_eq!(sampler.chain().n_proposed(), 0);
    }

    #[test]
    fn moment_estimates_on_standard_normal() {
        let mut sampler =
            HMC::new(standard_target(1), DVector::zeros(1), ChainConfig::new(1000, 1, 20_000))
                .unwrap()
                .with_step_size(0.5)
                .unwrap()
                .with_n_leapfrog(3)
                .unwrap()
                .with_seed(SEED)
                .unwrap();
        let (mean, second) = sampler.generate_moment_estimates(20_000).unwrap();
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(second[0], 1.0, epsilon = 0.08);
    }
}
