//! Serialisable optimiser configuration.

use serde::{Deserialize, Serialize};
use wp_types::{config_error, Extremum, WpResult};

use crate::maximise::MaximiserConfig;
use crate::space::{LatentSpace, ParamConfig};

/// Where the warm-up points come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrePhaseDesign {
    /// Uniform samples of the latent space.
    Random,
    /// Explicit configurations, evaluated in order.
    Fixed(Vec<ParamConfig>),
}

/// How evaluations are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Selection and evaluation strictly alternate.
    Synchronous,
    /// Up to `max_in_flight` evaluations run on background workers while
    /// the engine keeps selecting.
    Asynchronous { max_in_flight: usize },
}

impl EvaluationMode {
    pub fn is_asynchronous(self) -> bool {
        matches!(self, Self::Asynchronous { .. })
    }
}

/// What happens when the objective fails for a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the trial as failed and stop the run with the error.
    Halt,
    /// Record the trial as failed and keep going.
    RecordAndContinue,
}

/// Top-level configuration for an optimiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimiserConfig {
    pub name: String,
    pub extremum: Extremum,
    /// Number of trials selected before any surrogate is fitted.
    pub pre_phase_trials: usize,
    pub pre_phase: PrePhaseDesign,
    pub mode: EvaluationMode,
    pub failure_policy: FailurePolicy,
    pub seed: u64,
    /// Squared latent distance under which a maximised point duplicates an
    /// existing trial.
    pub close_tolerance: f64,
    pub maximiser: MaximiserConfig,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            name: "waypoint".to_string(),
            extremum: Extremum::Max,
            pre_phase_trials: 10,
            pre_phase: PrePhaseDesign::Random,
            mode: EvaluationMode::Synchronous,
            failure_policy: FailurePolicy::Halt,
            seed: 0,
            close_tolerance: 1e-8,
            maximiser: MaximiserConfig::default(),
        }
    }
}

impl OptimiserConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> WpResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_extremum(mut self, extremum: Extremum) -> Self {
        self.extremum = extremum;
        self
    }

    pub fn with_pre_phase_trials(mut self, n: usize) -> Self {
        self.pre_phase_trials = n;
        self
    }

    /// Use an explicit warm-up design; its length becomes the pre-phase size.
    pub fn with_fixed_pre_phase(mut self, design: Vec<ParamConfig>) -> Self {
        self.pre_phase_trials = design.len();
        self.pre_phase = PrePhaseDesign::Fixed(design);
        self
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_async(self, max_in_flight: usize) -> Self {
        self.with_mode(EvaluationMode::Asynchronous { max_in_flight })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_close_tolerance(mut self, tolerance: f64) -> Self {
        self.close_tolerance = tolerance;
        self
    }

    pub fn with_maximiser(mut self, maximiser: MaximiserConfig) -> Self {
        self.maximiser = maximiser;
        self
    }

    /// Check the configuration against the parameter space and resolve a
    /// fixed pre-phase design into latent points.
    pub fn validate(&self, space: &LatentSpace) -> WpResult<Vec<Vec<f64>>> {
        if self.pre_phase_trials == 0 {
            return Err(config_error!("pre_phase_trials must be at least 1"));
        }
        if let EvaluationMode::Asynchronous { max_in_flight: 0 } = self.mode {
            return Err(config_error!("max_in_flight must be at least 1"));
        }
        if !(self.close_tolerance.is_finite() && self.close_tolerance >= 0.0) {
            return Err(config_error!(
                "close_tolerance must be finite and >= 0, got {}",
                self.close_tolerance
            ));
        }
        self.maximiser.validate()?;

        match &self.pre_phase {
            PrePhaseDesign::Random => Ok(Vec::new()),
            PrePhaseDesign::Fixed(design) => {
                if design.len() != self.pre_phase_trials {
                    return Err(config_error!(
                        "fixed pre-phase design has {} points but pre_phase_trials is {}",
                        design.len(),
                        self.pre_phase_trials
                    ));
                }
                design
                    .iter()
                    .enumerate()
                    .map(|(i, config)| {
                        space
                            .to_latent(config)
                            .map_err(|e| config_error!("pre-phase point {i}: {e}"))
                    })
                    .collect()
            }
        }
    }
}
