//! Surrogate model contract and a reference Gaussian-process implementation.

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use wp_types::{surrogate_error, WpResult};

/// Result of fitting a surrogate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    /// Training iterations (or hyperparameter candidates) the fit used.
    pub iterations: usize,
    pub log_marginal_likelihood: f64,
}

/// A statistical model predicting the objective's mean and uncertainty at
/// unseen latent points, fitted on finished trials.
pub trait SurrogateModel: Send {
    fn name(&self) -> &str;

    /// Fit (or refit from scratch) on the given latent points and values.
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> WpResult<FitSummary>;

    /// Predicted `(mean, std_dev)` for every point, in order.
    fn predict(&self, x: &[Vec<f64>]) -> WpResult<(Vec<f64>, Vec<f64>)>;

    /// An unfitted model with the same hyperparameters.
    fn fresh(&self) -> Box<dyn SurrogateModel>;
}

/// Hyperparameters for [`GaussianProcess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianProcessConfig {
    /// Observation noise added to the kernel diagonal (standardised units).
    pub noise: f64,
    /// Candidate length scales; the one maximising the log marginal
    /// likelihood is kept.
    pub length_scales: Vec<f64>,
}

impl Default for GaussianProcessConfig {
    fn default() -> Self {
        Self {
            noise: 1e-6,
            length_scales: vec![0.05, 0.1, 0.2, 0.3, 0.5, 0.75, 1.0, 1.5, 2.5],
        }
    }
}

#[derive(Debug, Clone)]
struct FittedGp {
    x: Vec<Vec<f64>>,
    /// Cholesky factor of `K + noise * I`.
    cholesky: Cholesky<f64, Dyn>,
    /// `(K + noise * I)^-1 y` on standardised targets.
    alpha: DVector<f64>,
    length_scale: f64,
    y_mean: f64,
    y_std: f64,
}

/// Gaussian process with a squared-exponential kernel and standardised
/// targets.
#[derive(Debug, Clone, Default)]
pub struct GaussianProcess {
    config: GaussianProcessConfig,
    fitted: Option<FittedGp>,
}

impl GaussianProcess {
    pub fn new(config: GaussianProcessConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn length_scale(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.length_scale)
    }
}

fn rbf_kernel(x1: &[f64], x2: &[f64], length_scale: f64) -> f64 {
    let sq_dist: f64 = x1.iter().zip(x2).map(|(a, b)| (a - b).powi(2)).sum();
    (-sq_dist / (2.0 * length_scale * length_scale)).exp()
}

fn kernel_matrix(x: &[Vec<f64>], length_scale: f64, noise: f64) -> DMatrix<f64> {
    let n = x.len();
    DMatrix::from_fn(n, n, |i, j| {
        let k = rbf_kernel(&x[i], &x[j], length_scale);
        if i == j { k + noise } else { k }
    })
}

fn kernel_vector(point: &[f64], x: &[Vec<f64>], length_scale: f64) -> DVector<f64> {
    DVector::from_fn(x.len(), |i, _| rbf_kernel(point, &x[i], length_scale))
}

impl FittedGp {
    fn predict_one(&self, point: &[f64]) -> (f64, f64) {
        let k_star = kernel_vector(point, &self.x, self.length_scale);
        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let variance = (1.0 - k_star.dot(&v)).max(0.0);
        (
            self.y_mean + self.y_std * mean,
            self.y_std * variance.sqrt(),
        )
    }
}

impl SurrogateModel for GaussianProcess {
    fn name(&self) -> &str {
        "gaussian_process"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> WpResult<FitSummary> {
        let n = y.len();
        if n == 0 || x.len() != n {
            return Err(surrogate_error!(
                "cannot fit on {} points with {} values",
                x.len(),
                n
            ));
        }
        if self.config.length_scales.is_empty() {
            return Err(surrogate_error!("no candidate length scales configured"));
        }

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let y_var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64;
        let y_std = if y_var > 1e-24 { y_var.sqrt() } else { 1.0 };
        let y_vec = DVector::from_iterator(n, y.iter().map(|v| (v - y_mean) / y_std));

        let mut best: Option<(f64, FittedGp)> = None;
        for &length_scale in &self.config.length_scales {
            let k = kernel_matrix(x, length_scale, self.config.noise);
            let Some(cholesky) = Cholesky::new(k) else { continue };
            let alpha = cholesky.solve(&y_vec);

            let data_fit = y_vec.dot(&alpha);
            let log_det: f64 = cholesky.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
            let lml = -0.5 * data_fit
                - log_det
                - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

            if best.as_ref().map_or(true, |(best_lml, _)| lml > *best_lml) {
                best = Some((
                    lml,
                    FittedGp {
                        x: x.to_vec(),
                        cholesky,
                        alpha,
                        length_scale,
                        y_mean,
                        y_std,
                    },
                ));
            }
        }

        let (lml, fitted) = best.ok_or_else(|| {
            surrogate_error!("kernel matrix is not positive definite for any length scale")
        })?;
        self.fitted = Some(fitted);
        Ok(FitSummary {
            iterations: self.config.length_scales.len(),
            log_marginal_likelihood: lml,
        })
    }

    fn predict(&self, x: &[Vec<f64>]) -> WpResult<(Vec<f64>, Vec<f64>)> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| surrogate_error!("predict called before fit"))?;
        let predictions: Vec<(f64, f64)> =
            x.par_iter().map(|point| fitted.predict_one(point)).collect();
        Ok(predictions.into_iter().unzip())
    }

    fn fresh(&self) -> Box<dyn SurrogateModel> {
        Box::new(Self::new(self.config.clone()))
    }
}
