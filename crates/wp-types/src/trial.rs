//! Trial data model: one (select point, evaluate objective) cycle and its
//! recorded outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ConsistencyError;

/// Free-form engine context attached to a trial.
pub type ExtraData = serde_json::Map<String, serde_json::Value>;

/// Whether we are maximising or minimising the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extremum {
    Min,
    Max,
}

impl Default for Extremum {
    fn default() -> Self {
        Self::Max
    }
}

impl Extremum {
    /// `+1` when maximising, `-1` when minimising.
    pub fn scale_factor(self) -> f64 {
        match self {
            Self::Max => 1.0,
            Self::Min => -1.0,
        }
    }

    /// Whether `candidate` strictly improves on `current`.
    pub fn is_better(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Max => candidate > current,
            Self::Min => candidate < current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

/// The families of acquisition function. Each family needs different data
/// from the engine when an acquisition function is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionFamily {
    /// How much a point improves on the incumbent (needs the incumbent cost).
    Improvement,
    /// Optimism in the face of uncertainty.
    Optimism,
}

impl AcquisitionFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improvement => "improvement",
            Self::Optimism => "optimism",
        }
    }
}

/// How the point of a trial was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    /// Taken from the warm-up design before any surrogate exists.
    PrePhase,
    /// Maximised an optimism-family acquisition function.
    Optimism,
    /// Maximised an improvement-family acquisition function.
    Improvement,
    /// Uniform random point, used when the maximised point duplicated an
    /// existing trial.
    Random,
}

impl SelectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrePhase => "pre_phase",
            Self::Optimism => "optimism",
            Self::Improvement => "improvement",
            Self::Random => "random",
        }
    }
}

impl From<AcquisitionFamily> for SelectionType {
    fn from(family: AcquisitionFamily) -> Self {
        match family {
            AcquisitionFamily::Improvement => Self::Improvement,
            AcquisitionFamily::Optimism => Self::Optimism,
        }
    }
}

/// Acquisition function parameters resolved for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionInfo {
    pub name: String,
    pub family: AcquisitionFamily,
    /// Name of the trade-off parameter (`beta` or `xi`).
    pub parameter: String,
    #[serde(with = "extended_f64")]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incumbent_cost: Option<f64>,
}

/// Outcome of maximising the acquisition function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaximisationInfo {
    #[serde(with = "extended_f64")]
    pub max_acq: f64,
    pub candidates: usize,
    pub local_steps: usize,
}

/// Outcome of fitting the surrogate model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittingInfo {
    pub iterations: usize,
    pub training_points: usize,
    /// Trials still in flight (and therefore absent from the training set)
    /// when the surrogate was fitted.
    pub pending_trials: usize,
}

/// How the point `x` of a trial was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionInfo {
    #[serde(rename = "type")]
    pub kind: SelectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acq_info: Option<AcquisitionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximisation_info: Option<MaximisationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitting_info: Option<FittingInfo>,
}

impl SelectionInfo {
    pub fn pre_phase() -> Self {
        Self {
            kind: SelectionType::PrePhase,
            acq_info: None,
            maximisation_info: None,
            fitting_info: None,
        }
    }

    /// Uniform random selection made without any acquisition function.
    pub fn random() -> Self {
        Self {
            kind: SelectionType::Random,
            ..Self::pre_phase()
        }
    }

    pub fn acquisition(
        acq_info: AcquisitionInfo,
        maximisation_info: MaximisationInfo,
        fitting_info: FittingInfo,
    ) -> Self {
        Self {
            kind: acq_info.family.into(),
            acq_info: Some(acq_info),
            maximisation_info: Some(maximisation_info),
            fitting_info: Some(fitting_info),
        }
    }

    /// Downgrade to a random fallback, keeping the rejected acquisition
    /// details for inspection.
    pub fn into_random_fallback(mut self) -> Self {
        self.kind = SelectionType::Random;
        self
    }
}

/// Lifecycle state of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Selecting,
    Evaluating,
    Finished,
    /// Evaluation failed; `eval_info` carries the error marker and `y` is
    /// absent.
    Failed,
}

impl TrialState {
    /// Selecting or evaluating.
    pub fn is_unfinished(self) -> bool {
        matches!(self, Self::Selecting | Self::Evaluating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::Evaluating => "evaluating",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// A single attempted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub num: usize,
    /// Latent-space point selected for evaluation.
    pub x: Vec<f64>,
    pub y: Option<f64>,
    pub state: TrialState,
    pub selection_info: Option<SelectionInfo>,
    pub eval_info: Option<serde_json::Value>,
    /// Seconds spent selecting `x`.
    pub selection_time: f64,
    /// Seconds spent evaluating the objective.
    pub eval_time: Option<f64>,
    #[serde(default)]
    pub extra_data: ExtraData,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(num: usize, x: Vec<f64>) -> Self {
        Self {
            num,
            x,
            y: None,
            state: TrialState::Selecting,
            selection_info: None,
            eval_info: None,
            selection_time: 0.0,
            eval_time: None,
            extra_data: ExtraData::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Finalise the selection fields and move to `Evaluating`.
    pub fn finish_selection(
        &mut self,
        selection_info: SelectionInfo,
        selection_time: f64,
        extra_data: ExtraData,
    ) -> Result<(), ConsistencyError> {
        self.transition(TrialState::Selecting, TrialState::Evaluating)?;
        self.selection_info = Some(selection_info);
        self.selection_time = selection_time.max(0.0);
        self.extra_data = extra_data;
        Ok(())
    }

    pub fn mark_finished(
        &mut self,
        y: f64,
        eval_info: Option<serde_json::Value>,
        eval_time: f64,
    ) -> Result<(), ConsistencyError> {
        self.transition(TrialState::Evaluating, TrialState::Finished)?;
        self.y = Some(y);
        self.eval_info = eval_info;
        self.eval_time = Some(eval_time.max(0.0));
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str, eval_time: f64) -> Result<(), ConsistencyError> {
        self.transition(TrialState::Evaluating, TrialState::Failed)?;
        self.y = None;
        self.eval_info = Some(serde_json::json!({ "error": error }));
        self.eval_time = Some(eval_time.max(0.0));
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.state == TrialState::Finished
    }

    pub fn is_unfinished(&self) -> bool {
        self.state.is_unfinished()
    }

    pub fn selection_type(&self) -> Option<SelectionType> {
        self.selection_info.as_ref().map(|info| info.kind)
    }

    fn transition(&mut self, from: TrialState, to: TrialState) -> Result<(), ConsistencyError> {
        if self.state != from {
            return Err(ConsistencyError::InvalidTransition {
                trial_num: self.num,
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

/// JSON has no representation for infinities (`beta = inf` is a valid UCB
/// parameter), so non-finite values are written as strings.
mod extended_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => text.parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ucb_info(beta: f64) -> AcquisitionInfo {
        AcquisitionInfo {
            name: "UCB".into(),
            family: AcquisitionFamily::Optimism,
            parameter: "beta".into(),
            value: beta,
            incumbent_cost: None,
        }
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(3, vec![0.25, 0.5]);
        assert_eq!(trial.state, TrialState::Selecting);
        assert!(trial.is_unfinished());

        trial
            .finish_selection(SelectionInfo::pre_phase(), 0.01, ExtraData::new())
            .unwrap();
        assert_eq!(trial.state, TrialState::Evaluating);
        assert_eq!(trial.selection_type(), Some(SelectionType::PrePhase));

        trial
            .mark_finished(1.5, Some(serde_json::json!({"loss": 0.2})), 0.3)
            .unwrap();
        assert!(trial.is_finished());
        assert_eq!(trial.y, Some(1.5));
        assert!(trial.finished_at.is_some());
    }

    #[test]
    fn finished_trial_is_immutable() {
        let mut trial = Trial::new(0, vec![0.0]);
        trial
            .finish_selection(SelectionInfo::pre_phase(), 0.0, ExtraData::new())
            .unwrap();
        trial.mark_finished(2.0, None, 0.0).unwrap();

        let err = trial.mark_finished(5.0, None, 0.0).unwrap_err();
        assert!(matches!(err, ConsistencyError::InvalidTransition { trial_num: 0, .. }));
        assert_eq!(trial.y, Some(2.0));
        assert!(trial.mark_failed("late", 0.0).is_err());
    }

    #[test]
    fn trial_failure_marks_eval_info() {
        let mut trial = Trial::new(1, vec![0.5]);
        trial
            .finish_selection(SelectionInfo::pre_phase(), 0.0, ExtraData::new())
            .unwrap();
        trial.mark_failed("simulation diverged", 0.4).unwrap();

        assert_eq!(trial.state, TrialState::Failed);
        assert!(!trial.is_finished());
        assert!(!trial.is_unfinished());
        assert_eq!(trial.y, None);
        assert_eq!(
            trial.eval_info,
            Some(serde_json::json!({"error": "simulation diverged"}))
        );
    }

    #[test]
    fn negative_durations_are_clamped() {
        let mut trial = Trial::new(0, vec![0.0]);
        trial
            .finish_selection(SelectionInfo::pre_phase(), -1.0, ExtraData::new())
            .unwrap();
        trial.mark_finished(0.0, None, -0.5).unwrap();
        assert_eq!(trial.selection_time, 0.0);
        assert_eq!(trial.eval_time, Some(0.0));
    }

    #[test]
    fn extremum_direction() {
        assert_eq!(Extremum::Max.scale_factor(), 1.0);
        assert_eq!(Extremum::Min.scale_factor(), -1.0);
        assert!(Extremum::Max.is_better(2.0, 1.0));
        assert!(Extremum::Min.is_better(1.0, 2.0));
        assert!(!Extremum::Max.is_better(1.0, 1.0));
        assert_eq!(serde_json::to_string(&Extremum::Min).unwrap(), "\"min\"");
    }

    #[test]
    fn selection_info_serializes_type_tag() {
        let info = SelectionInfo::acquisition(
            ucb_info(2.0),
            MaximisationInfo {
                max_acq: 0.7,
                candidates: 100,
                local_steps: 12,
            },
            FittingInfo {
                iterations: 8,
                training_points: 4,
                pending_trials: 0,
            },
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "optimism");
        assert_eq!(json["acq_info"]["parameter"], "beta");
        assert_eq!(json["fitting_info"]["iterations"], 8);

        let pre = serde_json::to_value(SelectionInfo::pre_phase()).unwrap();
        assert_eq!(pre, serde_json::json!({"type": "pre_phase"}));
    }

    #[test]
    fn infinite_beta_survives_json() {
        let info = ucb_info(f64::INFINITY);
        let json = serde_json::to_string(&info).unwrap();
        let back: AcquisitionInfo = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_infinite() && back.value > 0.0);
    }

    #[test]
    fn random_fallback_keeps_acquisition_details() {
        let info = SelectionInfo::acquisition(
            ucb_info(1.0),
            MaximisationInfo {
                max_acq: 0.1,
                candidates: 10,
                local_steps: 0,
            },
            FittingInfo {
                iterations: 1,
                training_points: 2,
                pending_trials: 1,
            },
        )
        .into_random_fallback();
        assert_eq!(info.kind, SelectionType::Random);
        assert!(info.acq_info.is_some());
    }
}
