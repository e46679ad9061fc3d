//! Random Walk Metropolis with an isotropic Gaussian proposal.
//!
//! The proposal `current + σ ε` with `ε ~ N(0, I)` is symmetric, so the
//! acceptance ratio is the plain density ratio.

use log::debug;
use nalgebra::DVector;

use crate::core::{Chain, ChainConfig, MarkovChain};
use crate::error::{invalid, Result};
use crate::target::LogPost;

pub const DEFAULT_PROPOSAL_SD: f64 = 1.0;

/// Acceptance rate the scale adaptation aims for.
pub const OPTIMAL_ACCEPT_RATE: f64 = 0.234;

const ADAPT_ROUNDS: usize = 100;
const ADAPT_ROUND_LEN: usize = 100;

/// A Random Walk Metropolis kernel.
#[derive(Debug, Clone)]
pub struct RandomWalkMetropolis {
    chain: Chain,
    proposal_sd: f64,
}

impl RandomWalkMetropolis {
    /// Creates a sampler with proposal standard deviation 1.
    pub fn new(target: LogPost, initial_state: DVector<f64>, config: ChainConfig) -> Result<Self> {
        Ok(Self {
            chain: Chain::new(target, initial_state, config)?,
            proposal_sd: DEFAULT_PROPOSAL_SD,
        })
    }

    /// Fails with `PreconditionViolation` once the chain has drawn a random
    /// number.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.chain.set_seed(seed)?;
        Ok(self)
    }

    pub fn with_proposal_sd(mut self, proposal_sd: f64) -> Result<Self> {
        self.set_proposal_sd(proposal_sd)?;
        Ok(self)
    }

    pub fn proposal_sd(&self) -> f64 {
        self.proposal_sd
    }

    pub fn set_proposal_sd(&mut self, proposal_sd: f64) -> Result<()> {
        if !(proposal_sd > 0.0 && proposal_sd.is_finite()) {
            return Err(invalid(format!(
                "proposal standard deviation must be positive and finite, got {proposal_sd}"
            )));
        }
        self.proposal_sd = proposal_sd;
        Ok(())
    }

    pub fn set_target(&mut self, target: LogPost) -> Result<()> {
        self.chain.set_target(target)
    }

    /// Tunes the proposal scale towards 23.4% acceptance.
    ///
    /// Runs 100 rounds of 100 kernel applications; after each round
    /// `σ ← exp(log σ + accepted/100 - 0.234)`. Returns the tuned σ.
    pub fn adapt_proposal_scale(&mut self) -> Result<f64> {
        for _ in 0..ADAPT_ROUNDS {
            let mut accepts = 0usize;
            for _ in 0..ADAPT_ROUND_LEN {
                if self.apply_kernel()? {
                    accepts += 1;
                }
            }
            let rate = accepts as f64 / ADAPT_ROUND_LEN as f64;
            self.proposal_sd = (self.proposal_sd.ln() + rate - OPTIMAL_ACCEPT_RATE).exp();
        }
        debug!("RWM proposal scale adapted to {:.4}", self.proposal_sd);
        Ok(self.proposal_sd)
    }
}

impl MarkovChain for RandomWalkMetropolis {
    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    fn label(&self) -> &'static str {
        "RWM"
    }

    fn apply_kernel(&mut self) -> Result<bool> {
        let noise = self.chain.draw_standard_normal();
        let chain = &mut self.chain;
        chain.proposal.copy_from(&chain.current);
        chain.proposal.axpy(self.proposal_sd, &noise, 1.0);
        let log_accept =
            chain.target.log_density(&chain.proposal) - chain.target.log_density(&chain.current);
        Ok(chain.metropolis_step(log_accept))
    }
}
