/*!
Rejection sampling from an unnormalized target under a scaled proposal
envelope.

With log rejection constant `C` such that `π(x) ≤ exp(C) q(x)` everywhere, a
proposal `x ~ q` is accepted with probability `exp(log π(x) - log q(x) - C)`.

- [`RejectionSampler::generate`] treats a ratio above one as a fatal
  [`McmcError::EnvelopeViolation`].
- [`RejectionSampler::adapt_generate`] instead raises `C` to just above the
  offending ratio, discards every sample accepted so far and starts counting
  again. It does not terminate when no finite `C` bounds the ratio, for
  example when the proposal has lighter tails than the target.
*/

use log::warn;
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::error::{invalid, McmcError, Result};
use crate::regen::RegenDist;
use crate::target::LogPost;

/// Margin added to the offending log ratio when the envelope is enlarged.
pub const ENVELOPE_MARGIN: f64 = 0.01;

/// Rejection sampler with a [`RegenDist`] proposal.
#[derive(Debug, Clone)]
pub struct RejectionSampler {
    target: LogPost,
    proposal: RegenDist,
    log_rejection_constant: f64,
    rng: SmallRng,
    samples: Vec<DVector<f64>>,
    n_proposed: u64,
}

impl RejectionSampler {
    /// Fails with `InvalidConfiguration` when the dimensions differ.
    pub fn new(target: LogPost, proposal: RegenDist, log_rejection_constant: f64) -> Result<Self> {
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
            log_rejection_constant,
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
            samples: Vec::new(),
            n_proposed: 0,
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    fn log_ratio(&self, x: &DVector<f64>) -> f64 {
        self.target.log_density(x) - self.proposal.log_density(x) - self.log_rejection_constant
    }

    /// Appends `n` accepted samples.
    ///
    /// Fails with `EnvelopeViolation` at the first proposal whose acceptance
    /// ratio exceeds one or is NaN; samples accepted before it are kept.
    pub fn generate(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            loop {
                let x = self.proposal.sample(&mut self.rng);
                self.n_proposed += 1;
                let log_ratio = self.log_ratio(&x);
                if !(log_ratio <= 0.0) {
                    return Err(McmcError::EnvelopeViolation { log_ratio });
                }
                if self.rng.gen::<f64>().ln() < log_ratio {
                    self.samples.push(x);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Appends `n` accepted samples, enlarging the rejection constant whenever
    /// the envelope is violated. Each enlargement discards the samples
    /// accepted so far, including those of earlier calls.
    pub fn adapt_generate(&mut self, n: usize) {
        let mut accepted = 0;
        while accepted < n {
            let x = self.proposal.sample(&mut self.rng);
            self.n_proposed += 1;
            let mut log_ratio = self.log_ratio(&x);
            if log_ratio > 0.0 {
                let enlarged = self.log_rejection_constant + log_ratio + ENVELOPE_MARGIN;
                warn!(
                    "rejection envelope violated; log rejection constant raised from {:.4} to {:.4}, discarding {} samples",
                    self.log_rejection_constant,
                    enlarged,
                    self.samples.len()
                );
                self.log_rejection_constant = enlarged;
                log_ratio = -ENVELOPE_MARGIN;
                self.samples.clear();
                accepted = 0;
            }
            if self.rng.gen::<f64>().ln() < log_ratio {
                self.samples.push(x);
                accepted += 1;
            }
        }
    }

    pub fn samples(&self) -> &[DVector<f64>] {
        &self.samples
    }

    pub fn log_rejection_constant(&self) -> f64 {
        self.log_rejection_constant
    }

    /// Proposals drawn so far, accepted or not.
    pub fn n_proposed(&self) -> u64 {
        self.n_proposed
    }

    pub fn dim(&self) -> usize {
        self.target.dim()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
