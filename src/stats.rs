//! Running chain statistics: windowed acceptance rate, first and second moments,
//! and sample covariance.

use nalgebra::DVector;
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use std::collections::VecDeque;

use crate::error::{invalid, Result};

/// Width of the sliding window used to report the recent acceptance rate.
pub const ACCEPT_WINDOW: usize = 100;

/// Acceptance rate over the last `capacity` kernel applications.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceWindow {
    capacity: usize,
    accepted: usize,
    queue: VecDeque<bool>,
}

impl AcceptanceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            accepted: 0,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, accepted: bool) {
        if self.queue.len() == self.capacity {
            if let Some(true) = self.queue.pop_front() {
                self.accepted -= 1;
            }
        }
        self.queue.push_back(accepted);
        if accepted {
            self.accepted += 1;
        }
    }

    /// Zero before anything was pushed.
    pub fn rate(&self) -> f64 {
        if self.queue.is_empty() {
            0.0
        } else {
            self.accepted as f64 / self.queue.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.accepted = 0;
    }
}

impl Default for AcceptanceWindow {
    fn default() -> Self {
        Self::new(ACCEPT_WINDOW)
    }
}

/// Running mean of `x` and of `x ∘ x`.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentAccumulator {
    n: u64,
    mean: DVector<f64>,
    mean_sq: DVector<f64>,
}

impl MomentAccumulator {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: DVector::zeros(dim),
            mean_sq: DVector::zeros(dim),
        }
    }

    pub fn push(&mut self, x: &DVector<f64>) {
        self.n += 1;
        let n = self.n as f64;
        self.mean.zip_apply(x, |m, xi| *m += (xi - *m) / n);
        self.mean_sq.zip_apply(x, |m, xi| *m += (xi * xi - *m) / n);
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn second_moment(&self) -> &DVector<f64> {
        &self.mean_sq
    }

    /// Unbiased per-coordinate variance; `None` with fewer than two points.
    pub fn variance(&self) -> Option<DVector<f64>> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        Some((&self.mean_sq - self.mean.component_mul(&self.mean)) * (n / (n - 1.0)))
    }

    pub fn into_moments(self) -> (DVector<f64>, DVector<f64>) {
        (self.mean, self.mean_sq)
    }
}

/// Summary returned by [`crate::core::MarkovChain::run_progress`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    /// Number of recorded samples.
    pub n: u64,
    /// Acceptance rate over every kernel application of the run.
    pub p_accept: f64,
    pub mean: DVector<f64>,
    pub second_moment: DVector<f64>,
}

/// Unbiased sample covariance of `samples` (one sample per row).
pub fn sample_covariance(samples: &Array2<f64>) -> Result<Array2<f64>> {
    if samples.nrows() < 2 {
        return Err(invalid("sample covariance needs at least two samples"));
    }
    samples
        .t()
        .cov(1.0)
        .map_err(|e| invalid(format!("sample covariance failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn window_forgets_old_outcomes() {
        let mut window = AcceptanceWindow::new(4);
        assert_eq!(window.rate(), 0.0);
        for accepted in [true, true, true, true] {
            window.push(accepted);
        }
        assert_eq!(window.rate(), 1.0);
        window.push(false);
        window.push(false);
        assert_eq!(window.len(), 4);
        assert_abs_diff_eq!(window.rate(), 0.5);
        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn moments_match_direct_computation() {
        let xs = [
            vec![1.0, -2.0],
            vec![3.0, 0.5],
            vec![-1.5, 4.0],
            vec![0.25, 1.0],
        ];
        let mut acc = MomentAccumulator::new(2);
        for x in &xs {
            acc.push(&DVector::from_vec(x.clone()));
        }
        let n = xs.len() as f64;
        for j in 0..2 {
            let mean: f64 = xs.iter().map(|x| x[j]).sum::<f64>() / n;
            let sq: f64 = xs.iter().map(|x| x[j] * x[j]).sum::<f64>() / n;
            let var: f64 = xs.iter().map(|x| (x[j] - mean).powi(2)).sum::<f64>() / (n - 1.0);
            assert_abs_diff_eq!(acc.mean()[j], mean, epsilon = 1e-12);
            assert_abs_diff_eq!(acc.second_moment()[j], sq, epsilon = 1e-12);
            assert_abs_diff_eq!(acc.variance().unwrap()[j], var, epsilon = 1e-12);
        }
        assert_eq!(acc.n(), 4);
    }

    #[test]
    fn variance_needs_two_points() {
        let mut acc = MomentAccumulator::new(1);
        assert!(acc.variance().is_none());
        acc.push(&DVector::from_vec(vec![2.0]));
        assert!(acc.variance().is_none());
    }

    #[test]
    fn covariance_of_rows() {
        let samples = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let cov = sample_covariance(&samples).unwrap();
        let var_x = 5.0 / 3.0;
        assert_abs_diff_eq!(cov, array![[var_x, 2.0 * var_x], [2.0 * var_x, 4.0 * var_x]], epsilon = 1e-12);
        assert!(sample_covariance(&array![[1.0, 2.0]]).is_err());
    }
}
