/*!
# Target densities

[`LogPost`] is the object every kernel and estimator queries. It bundles the
dimension, a block of fixed data, the log-density and whichever derivative
capabilities the caller supplied, and an optional affine reparameterization.

## Reparameterization

Given the mean `m` and covariance `Σ` of a Laplace approximation of the target,
[`LogPost::configure_reparameterization`] decomposes `Σ = V Λ Vᵗ` and builds the
whitening matrix `W = V Λ^½`. From then on every query is made in whitened
coordinates `s`, related to the original coordinates by `x = m + W s`:

- log-density: `log π(m + W s)`
- gradient: `Wᵗ ∇log π(m + W s)`
- Laplacian: `Σᵢ wᵢᵗ H(m + W s) wᵢ` over the columns `wᵢ` of `W`

The Laplacian under reparameterization needs the full Hessian, which is
supplied through [`LogPost::configure_reparameterization_with_hessian`].

```rust
use nalgebra::{DMatrix, DVector};
use regen_mcmc::distributions::Gaussian;
use regen_mcmc::target::LogPost;

let cov = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]);
let gauss = Gaussian::new(DVector::from_vec(vec![1.0, 2.0]), cov.clone()).unwrap();
let mut target = LogPost::differentiable(2, DMatrix::zeros(0, 0), gauss).unwrap();
target
    .configure_reparameterization(&DVector::from_vec(vec![1.0, 2.0]), &cov)
    .unwrap();

// In whitened coordinates the target is a standard normal centred at zero.
let grad = target.gradient_log_density(&DVector::zeros(2)).unwrap();
assert!(grad.norm() < 1e-12);
```
*/

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::fmt;
use std::sync::Arc;

use crate::distributions::{
    cholesky, Density, DifferentiableDensity, Gradient, Hessian, Laplacian,
    TwiceDifferentiableDensity,
};
use crate::error::{invalid, precondition, Result};

#[derive(Debug, Clone)]
struct Whitening {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    matrix: DMatrix<f64>,
}

/// A (possibly reparameterized) log posterior density.
///
/// Cloning is cheap: clones share the callbacks and the data.
#[derive(Clone)]
pub struct LogPost {
    dim: usize,
    data: Arc<DMatrix<f64>>,
    density: Arc<dyn Density>,
    gradient: Option<Arc<dyn Gradient>>,
    laplacian: Option<Arc<dyn Laplacian>>,
    hessian: Option<Arc<dyn Hessian>>,
    whitening: Option<Whitening>,
}

impl fmt::Debug for LogPost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPost")
            .field("dim", &self.dim)
            .field("data_shape", &self.data.shape())
            .field("gradient", &self.gradient.is_some())
            .field("laplacian", &self.laplacian.is_some())
            .field("hessian", &self.hessian.is_some())
            .field("whitening", &self.whitening)
            .finish()
    }
}

impl LogPost {
    /// Creates a target from a log-density alone.
    ///
    /// Fails with `InvalidConfiguration` when `dim` is zero.
    pub fn new<D: Density + 'static>(dim: usize, data: DMatrix<f64>, density: D) -> Result<Self> {
        if dim == 0 {
            return Err(invalid("target dimension must be positive"));
        }
        Ok(Self {
            dim,
            data: Arc::new(data),
            density: Arc::new(density),
            gradient: None,
            laplacian: None,
            hessian: None,
            whitening: None,
        })
    }

    /// Creates a target whose density also supplies its gradient.
    pub fn differentiable<D: DifferentiableDensity + 'static>(
        dim: usize,
        data: DMatrix<f64>,
        density: D,
    ) -> Result<Self> {
        let shared = Arc::new(density);
        let mut target = Self::new_shared(dim, data, shared.clone())?;
        target.gradient = Some(shared);
        Ok(target)
    }

    /// Creates a target whose density supplies its gradient and Laplacian.
    pub fn twice_differentiable<D: TwiceDifferentiableDensity + 'static>(
        dim: usize,
        data: DMatrix<f64>,
        density: D,
    ) -> Result<Self> {
        let shared = Arc::new(density);
        let mut target = Self::new_shared(dim, data, shared.clone())?;
        target.gradient = Some(shared.clone());
        target.laplacian = Some(shared);
        Ok(target)
    }

    fn new_shared(dim: usize, data: DMatrix<f64>, density: Arc<dyn Density>) -> Result<Self> {
        if dim == 0 {
            return Err(invalid("target dimension must be positive"));
        }
        Ok(Self {
            dim,
            data: Arc::new(data),
            density,
            gradient: None,
            laplacian: None,
            hessian: None,
            whitening: None,
        })
    }

    /// Builder form of [`LogPost::set_gradient`].
    pub fn with_gradient<G: Gradient + 'static>(mut self, gradient: G) -> Self {
        self.set_gradient(gradient);
        self
    }

    /// Builder form of [`LogPost::set_laplacian`].
    pub fn with_laplacian<L: Laplacian + 'static>(mut self, laplacian: L) -> Self {
        self.set_laplacian(laplacian);
        self
    }

    pub fn set_gradient<G: Gradient + 'static>(&mut self, gradient: G) {
        self.gradient = Some(Arc::new(gradient));
    }

    pub fn set_laplacian<L: Laplacian + 'static>(&mut self, laplacian: L) {
        self.laplacian = Some(Arc::new(laplacian));
    }

    /// Replaces the fixed data passed to every callback.
    pub fn set_data(&mut self, data: DMatrix<f64>) {
        self.data = Arc::new(data);
    }

    /**
    Switches the target to whitened coordinates derived from a Laplace
    approximation `N(mean, covariance)`.

    Fails with `InvalidConfiguration` when the shapes do not match the target
    dimension or when `covariance` is not symmetric positive-definite.
    */
    pub fn configure_reparameterization(
        &mut self,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> Result<()> {
        if mean.len() != self.dim {
            return Err(invalid(format!(
                "reparameterization mean has dimension {}, target has {}",
                mean.len(),
                self.dim
            )));
        }
        if covariance.shape() != (self.dim, self.dim) {
            return Err(invalid(format!(
                "reparameterization covariance is {}x{}, expected {}x{}",
                covariance.nrows(),
                covariance.ncols(),
                self.dim,
                self.dim
            )));
        }
        cholesky(covariance)?;

        let eigen = SymmetricEigen::new(covariance.clone());
        let mut matrix = eigen.eigenvectors;
        for (mut column, lambda) in matrix.column_iter_mut().zip(eigen.eigenvalues.iter()) {
            column *= lambda.sqrt();
        }

        self.whitening = Some(Whitening {
            mean: mean.clone(),
            covariance: covariance.clone(),
            matrix,
        });
        Ok(())
    }

    /// As [`LogPost::configure_reparameterization`], also registering the
    /// Hessian needed for Laplacian queries in whitened coordinates.
    pub fn configure_reparameterization_with_hessian<H: Hessian + 'static>(
        &mut self,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        hessian: H,
    ) -> Result<()> {
        self.configure_reparameterization(mean, covariance)?;
        self.hessian = Some(Arc::new(hessian));
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    pub fn has_laplacian(&self) -> bool {
        self.laplacian.is_some()
    }

    pub fn has_hessian(&self) -> bool {
        self.hessian.is_some()
    }

    pub fn is_reparameterized(&self) -> bool {
        self.whitening.is_some()
    }

    /// The whitening matrix `W = V Λ^½`, if reparameterized.
    pub fn whitening_matrix(&self) -> Option<&DMatrix<f64>> {
        self.whitening.as_ref().map(|w| &w.matrix)
    }

    pub fn reparameterization_mean(&self) -> Option<&DVector<f64>> {
        self.whitening.as_ref().map(|w| &w.mean)
    }

    pub fn reparameterization_covariance(&self) -> Option<&DMatrix<f64>> {
        self.whitening.as_ref().map(|w| &w.covariance)
    }

    /// Maps a state to the coordinates the callbacks see (`m + W s` when
    /// reparameterized, the state itself otherwise).
    pub fn to_original(&self, state: &DVector<f64>) -> DVector<f64> {
        match &self.whitening {
            Some(w) => &w.mean + &w.matrix * state,
            None => state.clone(),
        }
    }

    pub fn log_density(&self, state: &DVector<f64>) -> f64 {
        debug_assert_eq!(state.len(), self.dim);
        match &self.whitening {
            Some(_) => self
                .density
                .log_density(&self.to_original(state), &self.data),
            None => self.density.log_density(state, &self.data),
        }
    }

    /// Potential energy, `-log π(state)`.
    pub fn energy(&self, state: &DVector<f64>) -> f64 {
        -self.log_density(state)
    }

    /// Fails with `PreconditionViolation` when no gradient was supplied.
    pub fn gradient_log_density(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        let gradient = self
            .gradient
            .as_ref()
            .ok_or_else(|| precondition("gradient of the log-density was not supplied"))?;
        match &self.whitening {
            Some(w) => {
                let grad = gradient.grad_log_density(&self.to_original(state), &self.data);
                Ok(w.matrix.tr_mul(&grad))
            }
            None => Ok(gradient.grad_log_density(state, &self.data)),
        }
    }

    pub fn gradient_energy(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(-self.gradient_log_density(state)?)
    }

    /// Fails with `PreconditionViolation` when the Laplacian (or, for a
    /// reparameterized target, the Hessian) was not supplied.
    pub fn laplacian_log_density(&self, state: &DVector<f64>) -> Result<f64> {
        match &self.whitening {
            Some(w) => {
                let hessian = self.hessian.as_ref().ok_or_else(|| {
                    precondition("Laplacian of a reparameterized target needs the Hessian")
                })?;
                let h = hessian.hessian_log_density(&self.to_original(state), &self.data);
                Ok(w.matrix
                    .column_iter()
                    .map(|col| col.dot(&(&h * col)))
                    .sum())
            }
            None => {
                let laplacian = self
                    .laplacian
                    .as_ref()
                    .ok_or_else(|| precondition("Laplacian of the log-density was not supplied"))?;
                Ok(laplacian.laplacian_log_density(state, &self.data))
            }
        }
    }

    pub fn laplacian_energy(&self, state: &DVector<f64>) -> Result<f64> {
        Ok(-self.laplacian_log_density(state)?)
    }
}
