/*!
# regen-mcmc

Markov Chain Monte Carlo kernels and normalizing-constant estimators for
unnormalized densities.

- [`target::LogPost`]: a log-density with optional gradient, Laplacian and
  Hessian, and an optional Laplace-approximation whitening.
- [`core::Chain`] and [`core::MarkovChain`]: state, schedule and the shared
  run loops.
- Kernels: [`rwm::RandomWalkMetropolis`], [`independence::IndependenceSampler`]
  and [`hmc::HMC`] (with the integrator in [`leapfrog`]).
- Estimators: [`importance::ImportanceSampler`],
  [`rejection::RejectionSampler`] and
  [`thermo::ThermodynamicIntegrator`], built on [`regen::RegenDist`].

```rust
use nalgebra::{DMatrix, DVector};
use regen_mcmc::core::{ChainConfig, MarkovChain};
use regen_mcmc::rwm::RandomWalkMetropolis;
use regen_mcmc::target::LogPost;

let banana = |x: &DVector<f64>, _: &DMatrix<f64>| {
    -0.5 * (x[0] * x[0] / 4.0 + (x[1] - 0.5 * x[0] * x[0]).powi(2))
};
let target = LogPost::new(2, DMatrix::zeros(0, 0), banana).unwrap();
let mut sampler = RandomWalkMetropolis::new(target, DVector::zeros(2), ChainConfig::new(500, 2, 1000))
    .unwrap()
    .with_seed(42)
    .unwrap();
sampler.adapt_proposal_scale().unwrap();
sampler.run().unwrap();
let (mean, _second_moment) = sampler.estimate_moments().unwrap();
assert_eq!(mean.len(), 2);
```
*/

pub mod core;
pub mod distributions;
pub mod error;
pub mod hmc;
pub mod importance;
pub mod independence;
pub mod leapfrog;
pub mod regen;
pub mod rejection;
pub mod rwm;
pub mod stats;
pub mod target;
pub mod thermo;

pub use crate::core::{Chain, ChainConfig, MarkovChain};
pub use crate::error::{McmcError, Result};
pub use crate::target::LogPost;
