//! Self-contained auxiliary distributions for the importance and rejection
//! samplers.
//!
//! A [`RegenDist`] pairs a normalized log-density with a sampler, both reading
//! their parameters from a data matrix. The Gaussian constructors use the packed
//! `[mean | L]` layout of [`Gaussian::packed`].

use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use std::fmt;
use std::sync::Arc;

use crate::distributions::{Density, Gaussian};
use crate::error::{invalid, Result};

/// Log-density callback of a [`RegenDist`].
pub type RegenLogDensity = dyn Fn(&DVector<f64>, &DMatrix<f64>) -> f64 + Send + Sync;

/// Sampling callback of a [`RegenDist`].
pub type RegenSampler = dyn Fn(&mut SmallRng, &DMatrix<f64>) -> DVector<f64> + Send + Sync;

/// A distribution that can be both evaluated and sampled.
///
/// Clones own their data; the callbacks are immutable and shared.
#[derive(Clone)]
pub struct RegenDist {
    dim: usize,
    data: DMatrix<f64>,
    log_density: Arc<RegenLogDensity>,
    sampler: Arc<RegenSampler>,
}

impl fmt::Debug for RegenDist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegenDist")
            .field("dim", &self.dim)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl RegenDist {
    pub fn new<L, S>(dim: usize, data: DMatrix<f64>, log_density: L, sampler: S) -> Result<Self>
    where
        L: Fn(&DVector<f64>, &DMatrix<f64>) -> f64 + Send + Sync + 'static,
        S: Fn(&mut SmallRng, &DMatrix<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        if dim == 0 {
            return Err(invalid("distribution dimension must be positive"));
        }
        Ok(Self {
            dim,
            data,
            log_density: Arc::new(log_density),
            sampler: Arc::new(sampler),
        })
    }

    /// `N(mean, cov)`.
    pub fn gaussian(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self> {
        let gauss = Gaussian::new(mean, cov)?;
        Self::new(
            gauss.dim(),
            gauss.packed(),
            |x: &DVector<f64>, data: &DMatrix<f64>| match Gaussian::from_packed(data) {
                Ok(g) => g.log_density(x, data),
                Err(_) => f64::NAN,
            },
            |rng: &mut SmallRng, data: &DMatrix<f64>| match Gaussian::from_packed(data) {
                Ok(g) => g.sample(rng),
                Err(_) => DVector::from_element(data.nrows(), f64::NAN),
            },
        )
    }

    /// `N(0, I)` in `dim` dimensions.
    pub fn standard_gaussian(dim: usize) -> Result<Self> {
        Self::gaussian(DVector::zeros(dim), DMatrix::identity(dim, dim))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Replaces the parameters read by both callbacks.
    pub fn set_data(&mut self, data: DMatrix<f64>) {
        self.data = data;
    }

    pub fn log_density(&self, x: &DVector<f64>) -> f64 {
        (self.log_density)(x, &self.data)
    }

    pub fn energy(&self, x: &DVector<f64>) -> f64 {
        -self.log_density(x)
    }

    pub fn sample(&self, rng: &mut SmallRng) -> DVector<f64> {
        (self.sampler)(rng, &self.data)
    }
}
