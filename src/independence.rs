/*!
Independence Metropolis-Hastings sampler.

Proposals come from a fixed Gaussian `q = N(μ, Σ)` that does not depend on the
current state, so the acceptance ratio carries the Hastings correction

```text
log α = [log π(y) + log q(x)] - [log π(x) + log q(y)]
```

`log q` is evaluated up to its normalizing constant, which cancels.
*/

use nalgebra::{DMatrix, DVector};

use crate::core::{Chain, ChainConfig, MarkovChain};
use crate::distributions::cholesky;
use crate::error::{invalid, Result};
use crate::target::LogPost;

/// An independence sampler with a Gaussian proposal.
#[derive(Debug, Clone)]
pub struct IndependenceSampler {
    chain: Chain,
    proposal_mean: DVector<f64>,
    proposal_cov: DMatrix<f64>,
    proposal_precision: DMatrix<f64>,
    proposal_chol: DMatrix<f64>,
}

impl IndependenceSampler {
    /// Fails with `InvalidConfiguration` when the proposal does not match the
    /// target dimension or `proposal_cov` is not symmetric positive-definite.
    pub fn new(
        target: LogPost,
        initial_state: DVector<f64>,
        config: ChainConfig,
        proposal_mean: DVector<f64>,
        proposal_cov: DMatrix<f64>,
    ) -> Result<Self> {
        let dim = target.dim();
        let mut sampler = Self {
            chain: Chain::new(target, initial_state, config)?,
            proposal_mean: DVector::zeros(dim),
            proposal_cov: DMatrix::identity(dim, dim),
            proposal_precision: DMatrix::identity(dim, dim),
            proposal_chol: DMatrix::identity(dim, dim),
        };
        sampler.set_proposal(proposal_mean, proposal_cov)?;
        Ok(sampler)
    }

    /// Fails with `PreconditionViolation` once the chain has drawn a random
    /// number.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.chain.set_seed(seed)?;
        Ok(self)
    }

    pub fn set_proposal(&mut self, mean: DVector<f64>, cov: DMatrix<f64>) -> Result<()> {
        let dim = self.chain.dim();
        if mean.len() != dim || cov.shape() != (dim, dim) {
            return Err(invalid(format!(
                "proposal has mean of length {} and covariance {}x{}, target dimension is {dim}",
                mean.len(),
                cov.nrows(),
                cov.ncols()
            )));
        }
        let chol = cholesky(&cov)?;
        self.proposal_chol = chol.l();
        self.proposal_precision = chol.inverse();
        self.proposal_mean = mean;
        self.proposal_cov = cov;
        Ok(())
    }

    pub fn set_target(&mut self, target: LogPost) -> Result<()> {
        self.chain.set_target(target)
    }

    pub fn proposal_mean(&self) -> &DVector<f64> {
        &self.proposal_mean
    }

    pub fn proposal_cov(&self) -> &DMatrix<f64> {
        &self.proposal_cov
    }

    /// `-½ (x - μ)ᵗ Σ⁻¹ (x - μ)`.
    pub fn log_proposal_density(&self, x: &DVector<f64>) -> f64 {
        let centred = x - &self.proposal_mean;
        -0.5 * centred.dot(&(&self.proposal_precision * &centred))
    }

    fn draw_proposal(&mut self) {
        let z = self.chain.draw_standard_normal();
        self.chain.proposal = &self.proposal_mean + &self.proposal_chol * z;
    }
}

impl MarkovChain for IndependenceSampler {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    fn label(&self) -> &'static str {
        "IS-MH"
    }

    fn apply_kernel(&mut self) -> Result<bool> {
        self.draw_proposal();
        let target = &self.chain.target;
        let log_accept = target.log_density(&self.chain.proposal)
            + self.log_proposal_density(&self.chain.current)
            - target.log_density(&self.chain.current)
            - self.log_proposal_density(&self.chain.proposal);
        Ok(self.chain.metropolis_step(log_accept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use crate::error::McmcError;
    use approx::assert_abs_diff_eq;

    const SEED: u64 = 42;

    fn standard_target() -> LogPost {
        LogPost::new(1, DMatrix::zeros(0, 0), Gaussian::standard(1)).unwrap()
    }

    fn shifted_sampler(n_samples: usize) -> IndependenceSampler {
        IndependenceSampler::new(
            standard_target(),
            DVector::zeros(1),
            ChainConfig::new(1000, 1, n_samples),
            DVector::from_element(1, 2.0),
            DMatrix::from_element(1, 1, 4.0),
        )
        .unwrap()
        .with_seed(SEED)
        .unwrap()
    }

    /// Same proposal, Hastings correction dropped.
    struct Uncorrected(IndependenceSampler);

    impl MarkovChain for Uncorrected {
        fn chain(&self) -> &Chain {
            &self.0.chain
        }

        fn chain_mut(&mut self) -> &mut Chain {
            &mut self.0.chain
        }

        fn apply_kernel(&mut self) -> Result<bool> {
            self.0.draw_proposal();
            let chain = &mut self.0.chain;
            let log_accept =
                chain.target.log_density(&chain.proposal) - chain.target.log_density(&chain.current);
            Ok(chain.metropolis_step(log_accept))
        }
    }

    #[test]
    fn proposal_density_is_quadratic_form() {
        let sampler = IndependenceSampler::new(
            LogPost::new(2, DMatrix::zeros(0, 0), Gaussian::standard(2)).unwrap(),
            DVector::zeros(2),
            ChainConfig::default(),
            DVector::from_vec(vec![1.0, -1.0]),
            DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
        )
        .unwrap();
        let x = DVector::from_vec(vec![0.3, 0.2]);
        let gauss = Gaussian::new(
            DVector::from_vec(vec![1.0, -1.0]),
            DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
        )
        .unwrap();
        assert_abs_diff_eq!(
            sampler.log_proposal_density(&x),
            gauss.unnormalized_log_density(&x),
            epsilon = 1e-12
        );
    }

    #[test]
    fn invalid_proposals_are_rejected() {
        let bad_cov = IndependenceSampler::new(
            standard_target(),
            DVector::zeros(1),
            ChainConfig::default(),
            DVector::zeros(1),
            DMatrix::from_element(1, 1, -1.0),
        );
        assert!(matches!(bad_cov, Err(McmcError::InvalidConfiguration(_))));
        let bad_dim = IndependenceSampler::new(
            standard_target(),
            DVector::zeros(1),
            ChainConfig::default(),
            DVector::zeros(2),
            DMatrix::identity(2, 2),
        );
        assert!(bad_dim.is_err());
    }

    #[test]
    fn hastings_correction_removes_proposal_bias() {
        let mut corrected = shifted_sampler(30_000);
        corrected.run().unwrap();
        let (mean, second) = corrected.estimate_moments().unwrap();
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 0.07);
        assert_abs_diff_eq!(second[0], 1.0, epsilon = 0.1);

        // Without the correction the chain targets π·q, a Gaussian with mean 0.4.
        let mut uncorrected = Uncorrected(shifted_sampler(30_000));
        uncorrected.run().unwrap();
        let (biased_mean, _) = uncorrected.estimate_moments().unwrap();
        assert!(biased_mean[0] > 0.3, "uncorrected mean {}", biased_mean[0]);
    }
}
