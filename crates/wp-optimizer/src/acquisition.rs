//! Acquisition functions and the factory that builds one per trial.
//!
//! Every acquisition function scores candidates so that a larger score is
//! more promising, whichever direction the objective is optimised in.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::fmt;
use std::sync::Arc;
use wp_types::{
    config_error, internal_error, AcquisitionFamily, AcquisitionInfo, Extremum, WpResult,
};

use crate::surrogate::SurrogateModel;

/// A hyperparameter that is either fixed or depends on the trial number.
/// Resolved once per trial when the factory builds the acquisition function.
#[derive(Clone)]
pub enum Schedule {
    Constant(f64),
    FunctionOf(Arc<dyn Fn(usize) -> f64 + Send + Sync>),
}

impl Schedule {
    pub fn function(f: impl Fn(usize) -> f64 + Send + Sync + 'static) -> Self {
        Self::FunctionOf(Arc::new(f))
    }

    pub fn value_at(&self, trial_num: usize) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::FunctionOf(f) => f(trial_num),
        }
    }
}

impl From<f64> for Schedule {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::FunctionOf(_) => f.write_str("FunctionOf(..)"),
        }
    }
}

/// User-configured acquisition hyperparameters. Holds no per-trial state.
#[derive(Debug, Clone)]
pub enum AcquisitionFactory {
    /// Upper (or lower, when minimising) confidence bound.
    Ucb { beta: Schedule },
    /// Probability of improvement.
    Pi { xi: Schedule },
    /// Expected improvement.
    Ei { xi: Schedule },
}

impl Default for AcquisitionFactory {
    fn default() -> Self {
        Self::ucb(2.0)
    }
}

impl AcquisitionFactory {
    pub fn ucb(beta: impl Into<Schedule>) -> Self {
        Self::Ucb { beta: beta.into() }
    }

    pub fn pi(xi: impl Into<Schedule>) -> Self {
        Self::Pi { xi: xi.into() }
    }

    pub fn ei(xi: impl Into<Schedule>) -> Self {
        Self::Ei { xi: xi.into() }
    }

    pub fn family(&self) -> AcquisitionFamily {
        match self {
            Self::Ucb { .. } => AcquisitionFamily::Optimism,
            Self::Pi { .. } | Self::Ei { .. } => AcquisitionFamily::Improvement,
        }
    }

    /// Display name for the acquisition functions this factory builds.
    pub fn name(&self, extremum: Extremum) -> &'static str {
        match (self, extremum) {
            (Self::Ucb { .. }, Extremum::Max) => "UCB",
            (Self::Ucb { .. }, Extremum::Min) => "-LCB",
            (Self::Pi { .. }, _) => "PI",
            (Self::Ei { .. }, _) => "EI",
        }
    }

    /// Build the acquisition function for one trial. Improvement-family
    /// factories require `incumbent_cost`.
    pub fn build<'m>(
        &self,
        trial_num: usize,
        model: &'m dyn SurrogateModel,
        extremum: Extremum,
        incumbent_cost: Option<f64>,
    ) -> WpResult<AcquisitionFunction<'m>> {
        let kind = match self {
            Self::Ucb { beta } => {
                let beta = beta.value_at(trial_num);
                if beta.is_nan() || beta < 0.0 {
                    return Err(config_error!("UCB beta must be >= 0, got {beta}"));
                }
                AcquisitionKind::Ucb { beta }
            }
            Self::Pi { xi } | Self::Ei { xi } => {
                let xi = xi.value_at(trial_num);
                if !xi.is_finite() || xi < 0.0 {
                    return Err(config_error!("xi must be finite and >= 0, got {xi}"));
                }
                let incumbent_cost = incumbent_cost.ok_or_else(|| {
                    config_error!("{} requires the incumbent cost", self.name(extremum))
                })?;
                if matches!(self, Self::Pi { .. }) {
                    AcquisitionKind::Pi { xi, incumbent_cost }
                } else {
                    AcquisitionKind::Ei { xi, incumbent_cost }
                }
            }
        };
        Ok(AcquisitionFunction::new(model, extremum, kind))
    }
}

/// Variant-specific parameters resolved for one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquisitionKind {
    Ucb { beta: f64 },
    Pi { xi: f64, incumbent_cost: f64 },
    Ei { xi: f64, incumbent_cost: f64 },
}

/// An acquisition function specialised to one trial. Borrows the surrogate
/// fitted for that trial, so it cannot outlive the selection phase.
pub struct AcquisitionFunction<'m> {
    model: &'m dyn SurrogateModel,
    extremum: Extremum,
    kind: AcquisitionKind,
}

impl<'m> AcquisitionFunction<'m> {
    pub fn new(model: &'m dyn SurrogateModel, extremum: Extremum, kind: AcquisitionKind) -> Self {
        Self {
            model,
            extremum,
            kind,
        }
    }

    pub fn kind(&self) -> AcquisitionKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        match (self.kind, self.extremum) {
            (AcquisitionKind::Ucb { .. }, Extremum::Max) => "UCB",
            (AcquisitionKind::Ucb { .. }, Extremum::Min) => "-LCB",
            (AcquisitionKind::Pi { .. }, _) => "PI",
            (AcquisitionKind::Ei { .. }, _) => "EI",
        }
    }

    pub fn family(&self) -> AcquisitionFamily {
        match self.kind {
            AcquisitionKind::Ucb { .. } => AcquisitionFamily::Optimism,
            AcquisitionKind::Pi { .. } | AcquisitionKind::Ei { .. } => {
                AcquisitionFamily::Improvement
            }
        }
    }

    pub fn scale_factor(&self) -> f64 {
        self.extremum.scale_factor()
    }

    /// Score every candidate. Larger is more promising.
    pub fn evaluate(&self, x: &[Vec<f64>]) -> WpResult<Vec<f64>> {
        let (mean, std) = self.model.predict(x)?;
        if mean.len() != x.len() || std.len() != x.len() {
            return Err(internal_error!(
                "surrogate returned {} predictions for {} points",
                mean.len(),
                x.len()
            ));
        }
        let sf = self.scale_factor();
        match self.kind {
            AcquisitionKind::Ucb { beta } => Ok(mean
                .iter()
                .zip(&std)
                .map(|(&mu, &sigma)| ucb_score(mu, sigma, beta, sf))
                .collect()),
            AcquisitionKind::Pi { xi, incumbent_cost } => {
                let normal = standard_normal()?;
                Ok(mean
                    .iter()
                    .zip(&std)
                    .map(|(&mu, &sigma)| pi_score(&normal, mu, sigma, incumbent_cost, xi, sf))
                    .collect())
            }
            AcquisitionKind::Ei { xi, incumbent_cost } => {
                let normal = standard_normal()?;
                Ok(mean
                    .iter()
                    .zip(&std)
                    .map(|(&mu, &sigma)| ei_score(&normal, mu, sigma, incumbent_cost, xi, sf))
                    .collect())
            }
        }
    }

    /// Resolved parameters for the trial's `acq_info`.
    pub fn info(&self) -> AcquisitionInfo {
        let (parameter, value, incumbent_cost) = match self.kind {
            AcquisitionKind::Ucb { beta } => ("beta", beta, None),
            AcquisitionKind::Pi { xi, incumbent_cost } | AcquisitionKind::Ei { xi, incumbent_cost } => {
                ("xi", xi, Some(incumbent_cost))
            }
        };
        AcquisitionInfo {
            name: self.name().to_string(),
            family: self.family(),
            parameter: parameter.to_string(),
            value,
            incumbent_cost,
        }
    }
}

impl fmt::Debug for AcquisitionFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionFunction")
            .field("model", &self.model.name())
            .field("extremum", &self.extremum)
            .field("kind", &self.kind)
            .finish()
    }
}

fn standard_normal() -> WpResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| internal_error!("standard normal: {e}"))
}

fn ucb_score(mu: f64, sigma: f64, beta: f64, sf: f64) -> f64 {
    if beta.is_infinite() {
        sigma
    } else {
        sf * mu + beta * sigma
    }
}

fn pi_score(normal: &Normal, mu: f64, sigma: f64, incumbent: f64, xi: f64, sf: f64) -> f64 {
    if sigma == 0.0 {
        return 0.0;
    }
    normal.cdf((sf * (mu - incumbent) - xi) / sigma)
}

fn ei_score(normal: &Normal, mu: f64, sigma: f64, incumbent: f64, xi: f64, sf: f64) -> f64 {
    if sigma == 0.0 {
        return 0.0;
    }
    let improvement = sf * (mu - incumbent) - xi;
    let z = improvement / sigma;
    improvement * normal.cdf(z) + sigma * normal.pdf(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::FitSummary;
    use wp_types::surrogate_error;

    /// Returns canned predictions indexed by the first coordinate.
    struct FixedModel {
        mean: Vec<f64>,
        std: Vec<f64>,
    }

    impl SurrogateModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> WpResult<FitSummary> {
            Err(surrogate_error!("fixed model cannot be fitted"))
        }

        fn predict(&self, x: &[Vec<f64>]) -> WpResult<(Vec<f64>, Vec<f64>)> {
            let idx: Vec<usize> = x.iter().map(|p| p[0] as usize).collect();
            Ok((
                idx.iter().map(|&i| self.mean[i]).collect(),
                idx.iter().map(|&i| self.std[i]).collect(),
            ))
        }

        fn fresh(&self) -> Box<dyn SurrogateModel> {
            Box::new(FixedModel {
                mean: self.mean.clone(),
                std: self.std.clone(),
            })
        }
    }

    fn model() -> FixedModel {
        FixedModel {
            mean: vec![1.0, -2.0, 0.5, 3.0],
            std: vec![0.5, 0.0, 2.0, 0.0],
        }
    }

    fn points() -> Vec<Vec<f64>> {
        (0..4).map(|i| vec![i as f64]).collect()
    }

    #[test]
    fn ucb_zero_beta_is_pure_exploitation() {
        let model = model();
        for extremum in [Extremum::Max, Extremum::Min] {
            let acq = AcquisitionFactory::ucb(0.0)
                .build(3, &model, extremum, None)
                .unwrap();
            let scores = acq.evaluate(&points()).unwrap();
            let expected: Vec<f64> = model
                .mean
                .iter()
                .map(|m| extremum.scale_factor() * m)
                .collect();
            assert_eq!(scores, expected);
        }
    }

    #[test]
    fn ucb_infinite_beta_is_pure_exploration() {
        let model = model();
        let acq = AcquisitionFactory::ucb(f64::INFINITY)
            .build(0, &model, Extremum::Min, None)
            .unwrap();
        assert_eq!(acq.evaluate(&points()).unwrap(), model.std);
    }

    #[test]
    fn ucb_names_follow_direction() {
        let model = model();
        let max = AcquisitionFactory::ucb(1.0).build(0, &model, Extremum::Max, None).unwrap();
        let min = AcquisitionFactory::ucb(1.0).build(0, &model, Extremum::Min, None).unwrap();
        assert_eq!(max.name(), "UCB");
        assert_eq!(min.name(), "-LCB");
        assert_eq!(max.family(), AcquisitionFamily::Optimism);
    }

    #[test]
    fn schedule_resolves_once_per_build() {
        let model = model();
        let factory = AcquisitionFactory::ucb(Schedule::function(|n| n as f64 * 0.5));
        let acq = factory.build(4, &model, Extremum::Max, None).unwrap();
        assert_eq!(acq.kind(), AcquisitionKind::Ucb { beta: 2.0 });
        let info = acq.info();
        assert_eq!(info.parameter, "beta");
        assert_eq!(info.value, 2.0);
        assert_eq!(info.incumbent_cost, None);
    }

    #[test]
    fn pi_is_zero_where_std_is_zero() {
        let model = model();
        for (xi, incumbent) in [(0.0, 0.0), (0.1, -5.0), (2.0, 10.0)] {
            for extremum in [Extremum::Max, Extremum::Min] {
                let acq = AcquisitionFactory::pi(xi)
                    .build(5, &model, extremum, Some(incumbent))
                    .unwrap();
                let scores = acq.evaluate(&points()).unwrap();
                assert_eq!(scores[1], 0.0);
                assert_eq!(scores[3], 0.0);
                assert!(scores[0] > 0.0 && scores[0] <= 1.0);
            }
        }
    }

    #[test]
    fn pi_matches_normal_cdf() {
        let model = model();
        let acq = AcquisitionFactory::pi(0.0)
            .build(5, &model, Extremum::Max, Some(1.0))
            .unwrap();
        let scores = acq.evaluate(&points()).unwrap();
        // mean equals the incumbent, so the improvement probability is one half
        assert!((scores[0] - 0.5).abs() < 1e-12);
        assert_eq!(acq.family(), AcquisitionFamily::Improvement);
        assert_eq!(acq.info().incumbent_cost, Some(1.0));
    }

    #[test]
    fn ei_is_non_negative_and_zero_without_uncertainty() {
        let model = model();
        let acq = AcquisitionFactory::ei(0.01)
            .build(5, &model, Extremum::Min, Some(0.0))
            .unwrap();
        let scores = acq.evaluate(&points()).unwrap();
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[3], 0.0);
        assert!(scores.iter().all(|s| *s >= 0.0));
        // wider predictive spread around a mean near the incumbent scores higher
        assert!(scores[2] > scores[0]);
        assert_eq!(acq.name(), "EI");
    }

    #[test]
    fn improvement_family_requires_incumbent() {
        let model = model();
        let err = AcquisitionFactory::ei(0.0)
            .build(0, &model, Extremum::Max, None)
            .unwrap_err();
        assert!(err.to_string().contains("incumbent"));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let model = model();
        assert!(AcquisitionFactory::ucb(-1.0).build(0, &model, Extremum::Max, None).is_err());
        assert!(AcquisitionFactory::ucb(f64::NAN).build(0, &model, Extremum::Max, None).is_err());
        assert!(AcquisitionFactory::pi(-0.1)
            .build(0, &model, Extremum::Max, Some(0.0))
            .is_err());
        assert!(AcquisitionFactory::ei(f64::INFINITY)
            .build(0, &model, Extremum::Max, Some(0.0))
            .is_err());
    }
}
