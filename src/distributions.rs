/*!
Capability traits for target densities, plus the multivariate Gaussian used as
the default reference and proposal distribution.

A density is a pure function of a state vector and a block of fixed data. The
gradient, Laplacian and Hessian of the log-density are separate capabilities so
that a target only has to provide what the chosen sampler needs:

- [`Density`]: the (unnormalized) log-density.
- [`Gradient`]: its gradient with respect to the state (needed by HMC).
- [`Laplacian`]: the trace of its Hessian.
- [`Hessian`]: the full Hessian (needed for the Laplacian of a reparameterized
  target).

[`DifferentiableDensity`] and [`TwiceDifferentiableDensity`] bundle these for
types that provide several capabilities at once. Plain closures with the right
signature implement the single-capability traits directly.

# Examples

```rust
use nalgebra::{DMatrix, DVector};
use regen_mcmc::distributions::{Density, Gaussian, Gradient};

let gauss = Gaussian::new(
    DVector::from_vec(vec![0.0, 1.0]),
    DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 2.0]),
)
.unwrap();
let x = DVector::from_vec(vec![0.5, -0.5]);
let no_data = DMatrix::zeros(0, 0);
let lp = gauss.log_density(&x, &no_data);
let grad = gauss.grad_log_density(&x, &no_data);
assert!(lp.is_finite());
assert_eq!(grad.len(), 2);

// A closure is a density too.
let banana = |x: &DVector<f64>, _data: &DMatrix<f64>| -0.5 * (x[0] * x[0] + (x[1] - x[0] * x[0]).powi(2));
assert_eq!(banana.log_density(&DVector::zeros(2), &no_data), 0.0);
```
*/

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::error::{invalid, Result};

/// Log-density of a target, up to an additive constant.
pub trait Density: Send + Sync {
    /// Returns the log-density at `state` given the fixed `data`.
    fn log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> f64;
}

/// Gradient of the log-density with respect to the state.
pub trait Gradient: Send + Sync {
    /// Returns a vector with the same dimension as `state`.
    fn grad_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> DVector<f64>;
}

/// Laplacian (trace of the Hessian) of the log-density.
pub trait Laplacian: Send + Sync {
    fn laplacian_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> f64;
}

/// Hessian of the log-density with respect to the state.
pub trait Hessian: Send + Sync {
    /// Returns a square matrix with side equal to the dimension of `state`.
    fn hessian_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> DMatrix<f64>;
}

/// A density that also provides its gradient.
pub trait DifferentiableDensity: Density + Gradient {}

impl<T: Density + Gradient> DifferentiableDensity for T {}

/// A density that provides its gradient and its Laplacian.
pub trait TwiceDifferentiableDensity: DifferentiableDensity + Laplacian {}

impl<T: DifferentiableDensity + Laplacian> TwiceDifferentiableDensity for T {}

impl<F> Density for F
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> f64 + Send + Sync,
{
    fn log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> f64 {
        self(state, data)
    }
}

impl<F> Gradient for F
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> DVector<f64> + Send + Sync,
{
    fn grad_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> DVector<f64> {
        self(state, data)
    }
}

impl<F> Laplacian for F
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> f64 + Send + Sync,
{
    fn laplacian_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> f64 {
        self(state, data)
    }
}

impl<F> Hessian for F
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> DMatrix<f64> + Send + Sync,
{
    fn hessian_log_density(&self, state: &DVector<f64>, data: &DMatrix<f64>) -> DMatrix<f64> {
        self(state, data)
    }
}

/**
A multivariate Gaussian parameterized by its mean and the lower-triangular
Cholesky factor `L` of its covariance (`Σ = L Lᵗ`).

The packed form used by [`crate::regen::RegenDist`] concatenates the two
horizontally: column 0 holds the mean and columns `1..=d` hold `L`.

As a [`Density`] the Gaussian ignores the `data` argument and evaluates the
fully normalized log-density.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: DVector<f64>,
    chol: DMatrix<f64>,
}

impl Gaussian {
    /// Creates a Gaussian from a mean and a symmetric positive-definite
    /// covariance matrix.
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self> {
        let chol = cholesky_lower(&cov)?;
        if mean.len() != chol.nrows() {
            return Err(invalid(format!(
                "mean has dimension {} but covariance is {}x{}",
                mean.len(),
                cov.nrows(),
                cov.ncols()
            )));
        }
        Ok(Self { mean, chol })
    }

    /// The standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: DVector::zeros(dim),
            chol: DMatrix::identity(dim, dim),
        }
    }

    /// Unpacks the `[mean | L]` layout.
    pub fn from_packed(mean_chol: &DMatrix<f64>) -> Result<Self> {
        let d = mean_chol.nrows();
        if d == 0 || mean_chol.ncols() != d + 1 {
            return Err(invalid(format!(
                "packed Gaussian parameters must be d x (d + 1), got {}x{}",
                d,
                mean_chol.ncols()
            )));
        }
        Ok(Self {
            mean: mean_chol.column(0).into_owned(),
            chol: mean_chol.columns(1, d).lower_triangle(),
        })
    }

    /// Packs the parameters as `[mean | L]`.
    pub fn packed(&self) -> DMatrix<f64> {
        let d = self.dim();
        let mut out = DMatrix::zeros(d, d + 1);
        out.column_mut(0).copy_from(&self.mean);
        out.columns_mut(1, d).copy_from(&self.chol);
        out
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Lower-triangular Cholesky factor of the covariance.
    pub fn chol(&self) -> &DMatrix<f64> {
        &self.chol
    }

    pub fn covariance(&self) -> DMatrix<f64> {
        &self.chol * self.chol.transpose()
    }

    /// `L⁻¹ (x - μ)`, the whitened residual.
    fn whiten(&self, state: &DVector<f64>) -> DVector<f64> {
        let residual = state - &self.mean;
        self.chol
            .solve_lower_triangular(&residual)
            .unwrap_or_else(|| DVector::from_element(residual.len(), f64::NAN))
    }

    /// Log-density without the normalizing constant: `-½ (x-μ)ᵗ Σ⁻¹ (x-μ)`.
    pub fn unnormalized_log_density(&self, state: &DVector<f64>) -> f64 {
        -0.5 * self.whiten(state).norm_squared()
    }

    /// Logarithm of the normalizing constant, `½ d log 2π + ½ log det Σ`.
    pub fn log_normalizer(&self) -> f64 {
        let d = self.dim() as f64;
        let half_log_det: f64 = self.chol.diagonal().iter().map(|l| l.abs().ln()).sum();
        0.5 * d * (2.0 * PI).ln() + half_log_det
    }

    /// Precision matrix `Σ⁻¹ = L⁻ᵗ L⁻¹`.
    pub fn precision(&self) -> DMatrix<f64> {
        let d = self.dim();
        let l_inv = self
            .chol
            .solve_lower_triangular(&DMatrix::identity(d, d))
            .unwrap_or_else(|| DMatrix::from_element(d, d, f64::NAN));
        l_inv.transpose() * l_inv
    }

    /// Draws `μ + L z` with `z ~ N(0, I)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z: DVector<f64> = DVector::from_fn(self.dim(), |_, _| rng.sample(StandardNormal));
        &self.chol * z + &self.mean
    }
}

impl Density for Gaussian {
    fn log_density(&self, state: &DVector<f64>, _data: &DMatrix<f64>) -> f64 {
        self.unnormalized_log_density(state) - self.log_normalizer()
    }
}

impl Gradient for Gaussian {
    fn grad_log_density(&self, state: &DVector<f64>, _data: &DMatrix<f64>) -> DVector<f64> {
        let w = self.whiten(state);
        let grad = self
            .chol
            .tr_solve_lower_triangular(&w)
            .unwrap_or_else(|| DVector::from_element(w.len(), f64::NAN));
        -grad
    }
}

impl Laplacian for Gaussian {
    fn laplacian_log_density(&self, _state: &DVector<f64>, _data: &DMatrix<f64>) -> f64 {
        -self.precision().trace()
    }
}

impl Hessian for Gaussian {
    fn hessian_log_density(&self, _state: &DVector<f64>, _data: &DMatrix<f64>) -> DMatrix<f64> {
        -self.precision()
    }
}

/// Returns `true` when `m` is square and symmetric up to a relative tolerance.
pub(crate) fn is_symmetric(m: &DMatrix<f64>) -> bool {
    if !m.is_square() {
        return false;
    }
    let scale = m.amax().max(1.0);
    (m - m.transpose()).amax() <= 1e-10 * scale
}

/// Lower Cholesky factor of a symmetric positive-definite matrix.
pub(crate) fn cholesky_lower(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    cholesky(m).map(|c| c.l())
}

pub(crate) fn cholesky(m: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>> {
    if m.nrows() == 0 {
        return Err(invalid("covariance matrix is empty"));
    }
    if !is_symmetric(m) {
        return Err(invalid("covariance matrix is not symmetric"));
    }
    Cholesky::new(m.clone()).ok_or_else(|| invalid("covariance matrix is not positive-definite"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn no_data() -> DMatrix<f64> {
        DMatrix::zeros(0, 0)
    }

    fn correlated() -> Gaussian {
        Gaussian::new(
            DVector::from_vec(vec![1.0, -2.0]),
            DMatrix::from_row_slice(2, 2, &[2.0, 0.6, 0.6, 1.0]),
        )
        .unwrap()
    }

    #[test]
    fn standard_normal_density_at_one() {
        let gauss = Gaussian::standard(1);
        let p = gauss
            .log_density(&DVector::from_vec(vec![1.0]), &no_data())
            .exp();
        assert_abs_diff_eq!(p, 0.24197072451914337, epsilon = 1e-12);
    }

    #[test]
    fn log_density_matches_closed_form() {
        let gauss = correlated();
        let x = DVector::from_vec(vec![0.3, -1.1]);
        let cov = gauss.covariance();
        let prec = cov.clone().try_inverse().unwrap();
        let r = &x - gauss.mean();
        let quad = (r.transpose() * prec * &r)[(0, 0)];
        let expected = -0.5 * quad - (2.0 * PI).ln() - 0.5 * cov.determinant().ln();
        assert_abs_diff_eq!(gauss.log_density(&x, &no_data()), expected, epsilon = 1e-12);
    }

    #[test]
    fn gradient_and_laplacian_match_precision() {
        let gauss = correlated();
        let x = DVector::from_vec(vec![2.0, 0.5]);
        let prec = gauss.covariance().try_inverse().unwrap();
        let expected = -(&prec * (&x - gauss.mean()));
        assert_abs_diff_eq!(gauss.grad_log_density(&x, &no_data()), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(
            gauss.laplacian_log_density(&x, &no_data()),
            -prec.trace(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(gauss.hessian_log_density(&x, &no_data()), -prec, epsilon = 1e-12);
    }

    #[test]
    fn packed_layout_round_trips() {
        let gauss = correlated();
        let packed = gauss.packed();
        assert_eq!(packed.shape(), (2, 3));
        assert_eq!(packed.column(0).into_owned(), *gauss.mean());
        assert_eq!(Gaussian::from_packed(&packed).unwrap(), gauss);
        assert!(Gaussian::from_packed(&DMatrix::zeros(2, 2)).is_err());
    }

    #[test]
    fn rejects_indefinite_covariance() {
        let err = Gaussian::new(
            DVector::zeros(2),
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]),
        );
        assert!(err.is_err());
        let asym = Gaussian::new(
            DVector::zeros(2),
            DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 1.0]),
        );
        assert!(asym.is_err());
    }

    #[test]
    fn samples_have_requested_moments() {
        let gauss = correlated();
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 50_000;
        let draws: Vec<DVector<f64>> = (0..n).map(|_| gauss.sample(&mut rng)).collect();
        let mean = draws.iter().fold(DVector::zeros(2), |acc, x| acc + x) / n as f64;
        let cov = draws.iter().fold(DMatrix::zeros(2, 2), |acc, x| {
            let r = x - &mean;
            acc + &r * r.transpose()
        }) / (n as f64 - 1.0);
        assert_abs_diff_eq!(mean, gauss.mean().clone(), epsilon = 0.05);
        assert_abs_diff_eq!(cov, gauss.covariance(), epsilon = 0.05);
    }

    #[test]
    fn closures_provide_capabilities() {
        let ld = |x: &DVector<f64>, data: &DMatrix<f64>| -> f64 { -0.5 * x.norm_squared() * data[(0, 0)] };
        let grad = |x: &DVector<f64>, data: &DMatrix<f64>| -> DVector<f64> { -x * data[(0, 0)] };
        let data = DMatrix::from_element(1, 1, 2.0);
        let x = DVector::from_vec(vec![1.0, 1.0]);
        assert_abs_diff_eq!(ld.log_density(&x, &data), -2.0);
        assert_abs_diff_eq!(grad.grad_log_density(&x, &data), DVector::from_vec(vec![-2.0, -2.0]));
    }
}
