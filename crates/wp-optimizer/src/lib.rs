//! # wp-optimizer
//!
//! Bayesian optimisation engine for Waypoint.
//!
//! Provides parameter declarations and the latent space they map into, the
//! surrogate model contract with a Gaussian-process implementation, the
//! UCB/PI/EI acquisition family, and the [`Optimiser`] state machine that
//! selects, evaluates and records trials (synchronously or on background
//! workers) while notifying registered listeners.

mod acquisition;
mod checkpoint;
mod config;
mod engine;
mod evaluation;
mod listener;
mod maximise;
mod range;
mod space;
mod surrogate;

pub use acquisition::{AcquisitionFactory, AcquisitionFunction, AcquisitionKind, Schedule};
pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use config::{EvaluationMode, FailurePolicy, OptimiserConfig, PrePhaseDesign};
pub use engine::{EngineState, Optimiser, OptimiserBuilder, RunSummary, TrialSlice};
pub use evaluation::{Evaluation, EvaluationReport, Objective, StopHandle};
pub use listener::{EventKind, Listener, ListenerId, ListenerSet, OptimiserEvent, OptimiserInfo};
pub use maximise::{maximise, MaximiserConfig, Maximum};
pub use range::{is_close, range_type, range_type_of_values, RangeType};
pub use space::{
    close_to_any, LatentSpace, ParamConfig, ParameterDef, ParameterKind, ParameterValue,
    SearchSpace,
};
pub use surrogate::{FitSummary, GaussianProcess, GaussianProcessConfig, SurrogateModel};

pub use wp_types::{
    AcquisitionFamily, ConsistencyError, EvaluationError, Extremum, RunRecord, SelectionInfo,
    SelectionType, SpaceError, Trial, TrialState, WpError, WpResult,
};
