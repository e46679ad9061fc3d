/*!
Thermodynamic integration along the geometric path between two densities.

For a reference `q0` with known normalizing constant `z0` and a target `q1`,

```text
log q_θ = (1 - θ) log q0 + θ log q1,     log(z1 / z0) = ∫₀¹ E_θ[log q1 - log q0] dθ
```

The integral is approximated by the mean of the expectations at
`θ = 1/n1, 2/n1, …, 1`, each estimated from `n2` Random Walk Metropolis draws.
The chain starts at the origin, tunes its proposal scale and burns in `n2`
steps at the first `θ` only, then carries its state over to each following `θ`.
*/

use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::core::{ChainConfig, MarkovChain};
use crate::distributions::Density;
use crate::error::{invalid, Result};
use crate::rwm::{RandomWalkMetropolis, DEFAULT_PROPOSAL_SD};
use crate::target::LogPost;

/// `(1 - θ) log q0 + θ log q1`.
#[derive(Debug, Clone)]
struct TemperedDensity {
    q0: LogPost,
    q1: LogPost,
    theta: f64,
}

impl Density for TemperedDensity {
    fn log_density(&self, state: &DVector<f64>, _data: &DMatrix<f64>) -> f64 {
        if self.theta >= 1.0 {
            self.q1.log_density(state)
        } else {
            (1.0 - self.theta) * self.q0.log_density(state) + self.theta * self.q1.log_density(state)
        }
    }
}

/// Path-sampling estimator of the normalizing constant of `q1`.
#[derive(Debug, Clone)]
pub struct ThermodynamicIntegrator {
    q0: LogPost,
    q1: LogPost,
    z0: f64,
    n1: usize,
    n2: usize,
    rng: SmallRng,
    proposal_sd: f64,
    expectations: Vec<f64>,
}

impl ThermodynamicIntegrator {
    /// `n1` is the number of grid points in `(0, 1]`, `n2` the number of draws
    /// per grid point.
    pub fn new(q0: LogPost, q1: LogPost, z0: f64, n1: usize, n2: usize) -> Result<Self> {
        if q0.dim() != q1.dim() {
            return Err(invalid(format!(
                "reference has dimension {}, target has dimension {}",
                q0.dim(),
                q1.dim()
            )));
        }
        if !(z0 > 0.0 && z0.is_finite()) {
            return Err(invalid(format!(
                "reference normalizing constant must be positive, got {z0}"
            )));
        }
        let mut integrator = Self {
            q0,
            q1,
            z0,
            n1: 1,
            n2: 1,
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
            proposal_sd: DEFAULT_PROPOSAL_SD,
            expectations: Vec::new(),
        };
        integrator.set_n1(n1)?;
        integrator.set_n2(n2)?;
        Ok(integrator)
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn set_n1(&mut self, n1: usize) -> Result<()> {
        if n1 == 0 {
            return Err(invalid("the temperature grid needs at least one point"));
        }
        self.n1 = n1;
        Ok(())
    }

    pub fn set_n2(&mut self, n2: usize) -> Result<()> {
        if n2 == 0 {
            return Err(invalid("each temperature needs at least one draw"));
        }
        self.n2 = n2;
        Ok(())
    }

    pub fn n1(&self) -> usize {
        self.n1
    }

    pub fn n2(&self) -> usize {
        self.n2
    }

    /// Proposal scale used by the chain; updated by every estimate.
    pub fn proposal_sd(&self) -> f64 {
        self.proposal_sd
    }

    /// `E_θ[log q1 - log q0]` for each grid point of the last estimate.
    pub fn expectations(&self) -> &[f64] {
        &self.expectations
    }

    fn tempered(&self, theta: f64) -> Result<LogPost> {
        let density = TemperedDensity {
            q0: self.q0.clone(),
            q1: self.q1.clone(),
            theta,
        };
        LogPost::new(self.q0.dim(), DMatrix::zeros(0, 0), density)
    }

    /// Returns `z0 · exp(mean_θ E_θ[log q1 - log q0])`.
    pub fn estimate_normalizing_constant(&mut self) -> Result<f64> {
        let dim = self.q0.dim();
        let n1 = self.n1 as f64;
        let seed = self.rng.gen::<u64>();

        let mut chain = RandomWalkMetropolis::new(
            self.tempered(1.0 / n1)?,
            DVector::zeros(dim),
            ChainConfig::new(self.n2, 1, self.n2),
        )?
        .with_proposal_sd(self.proposal_sd)?
        .with_seed(seed)?;
        self.proposal_sd = chain.adapt_proposal_scale()?;

        let (q0, q1) = (self.q0.clone(), self.q1.clone());
        let log_ratio = |x: &DVector<f64>| q1.log_density(x) - q0.log_density(x);

        let mut expectations = Vec::with_capacity(self.n1);
        expectations.push(chain.estimate_expectation(&log_ratio)?);
        chain.chain_mut().set_burn(0);
        for i in 2..=self.n1 {
            chain.set_target(self.tempered(i as f64 / n1)?)?;
            expectations.push(chain.estimate_expectation(&log_ratio)?);
        }

        let mean = expectations.iter().sum::<f64>() / expectations.len() as f64;
        self.expectations = expectations;
        Ok(self.z0 * mean.exp())
    }
}
