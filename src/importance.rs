//! Importance sampling estimate of a normalizing constant.
//!
//! Draws `x ~ q` from a normalized [`RegenDist`] and weights each draw by
//! `w = exp(log π(x) - log q(x))`. The mean weight is an unbiased estimate of
//! `Z = ∫ π(x) dx` for the unnormalized target `π`.

use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::error::{invalid, Result};
use crate::regen::RegenDist;
use crate::target::LogPost;

/// Importance sampler over a fixed proposal.
#[derive(Debug, Clone)]
pub struct ImportanceSampler {
    target: LogPost,
    proposal: RegenDist,
    rng: SmallRng,
    samples: Vec<DVector<f64>>,
    weights: Vec<f64>,
}

impl ImportanceSampler {
    /// Fails with `InvalidConfiguration` when the dimensions differ.
    pub fn new(target: LogPost, proposal: RegenDist) -> Result<Self> {
        if target.dim() != proposal.dim() {
            return Err(invalid(format!(
                "target has dimension {}, proposal has dimension {}",
                target.dim(),
                proposal.dim()
            )));
        }
        Ok(Self {
            target,
            proposal,
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
            samples: Vec::new(),
            weights: Vec::new(),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Appends `n` weighted draws.
    pub fn generate(&mut self, n: usize) {
        self.samples.reserve(n);
        self.weights.reserve(n);
        for _ in 0..n {
            let x = self.proposal.sample(&mut self.rng);
            let log_weight = self.target.log_density(&x) - self.proposal.log_density(&x);
            self.samples.push(x);
            self.weights.push(log_weight.exp());
        }
    }

    /// Mean importance weight; zero before any draw.
    pub fn estimate_normalizing_constant(&self) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        self.weights.iter().sum::<f64>() / self.weights.len() as f64
    }

    pub fn samples(&self) -> &[DVector<f64>] {
        &self.samples
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn dim(&self) -> usize {
        self.target.dim()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.weights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    #[test]
    fn exact_when_proposal_matches_target() {
        // Target 3·N(0,1) so every weight equals 3.
        let target = LogPost::new(1, DMatrix::zeros(0, 0), |x: &DVector<f64>, _: &DMatrix<f64>| {
            3.0_f64.ln() - 0.5 * x[0] * x[0] - 0.5 * (2.0 * std::f64::consts::PI).ln()
        })
        .unwrap();
        let mut sampler = ImportanceSampler::new(target, RegenDist::standard_gaussian(1).unwrap())
            .unwrap()
            .set_seed(42);
        assert_eq!(sampler.estimate_normalizing_constant(), 0.0);
        sampler.generate(50);
        assert_eq!(sampler.n_samples(), 50);
        assert_eq!(sampler.weights().len(), 50);
        assert!(sampler.weights().iter().all(|w| (w - 3.0).abs() < 1e-12));
        assert_abs_diff_eq!(sampler.estimate_normalizing_constant(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn dimensions_must_agree() {
        let target = LogPost::new(2, DMatrix::zeros(0, 0), |_: &DVector<f64>, _: &DMatrix<f64>| 0.0).unwrap();
        assert!(ImportanceSampler::new(target, RegenDist::standard_gaussian(1).unwrap()).is_err());
    }

    #[test]
    fn generate_appends() {
        let target = LogPost::new(1, DMatrix::zeros(0, 0), |x: &DVector<f64>, _: &DMatrix<f64>| {
            -0.5 * x[0] * x[0]
        })
        .unwrap();
        let mut sampler = ImportanceSampler::new(target, RegenDist::standard_gaussian(1).unwrap())
            .unwrap()
            .set_seed(1);
        sampler.generate(10);
        sampler.generate(5);
        assert_eq!(sampler.samples().len(), 15);
        sampler.clear();
        assert_eq!(sampler.estimate_normalizing_constant(), 0.0);
    }
}
