use thiserror::Error;

/// Main error type for the Waypoint optimiser
#[derive(Error, Debug)]
pub enum WpError {
    #[error("Parameter space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Surrogate model error: {0}")]
    Surrogate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while declaring or mapping the parameter space
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Invalid bounds for {name}: low ({low}) must not exceed high ({high})")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("Invalid log range for {name}: low ({low}) must be strictly positive")]
    NonPositiveLogRange { name: String, low: f64 },

    #[error("Non-finite bound for {name}")]
    NonFiniteBound { name: String },

    #[error("No values given for parameter {name}")]
    EmptyRange { name: String },

    #[error("Duplicate parameter name: {name}")]
    DuplicateParameter { name: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Missing value for parameter {name}")]
    MissingValue { name: String },

    #[error("Latent point has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Value {value} is not valid for parameter {name}")]
    InvalidValue { name: String, value: String },

    #[error("Parameter {name} is categorical and has no numeric range")]
    NotNumeric { name: String },

    #[error("The parameter space has no parameters")]
    EmptySpace,
}

/// Violated preconditions on run-record queries and engine bookkeeping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("{count} trial(s) are unfinished: {operation} requires every trial to be finished")]
    UnfinishedTrials { operation: String, count: usize },

    #[error("Trial {trial_num} is outside [0, {max_trials})")]
    TrialOutOfRange { trial_num: usize, max_trials: usize },

    #[error("Trial {trial_num} does not exist")]
    UnknownTrial { trial_num: usize },

    #[error("Trial {trial_num} cannot move from {from} to {to}")]
    InvalidTransition {
        trial_num: usize,
        from: String,
        to: String,
    },

    #[error("{operation} does not support asynchronous optimisation runs")]
    AsynchronousRun { operation: String },

    #[error("Trial {trial_num} was selected in the pre-phase and has no surrogate")]
    PrePhaseTrial { trial_num: usize },

    #[error("No finished trials")]
    NoFinishedTrials,
}

/// Objective failures surfaced when the run halts on them
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Objective failed for trial {trial_num}: {message}")]
    ObjectiveFailed { trial_num: usize, message: String },

    #[error("Objective returned a non-finite value ({value}) for trial {trial_num}")]
    NonFinite { trial_num: usize, value: f64 },

    #[error("Objective panicked for trial {trial_num}: {message}")]
    Panicked { trial_num: usize, message: String },

    #[error("Evaluation worker for trial {trial_num} disconnected")]
    WorkerLost { trial_num: usize },
}

/// Result type alias for Waypoint operations
pub type WpResult<T> = Result<T, WpError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::WpError::Config(format!($($arg)*))
    };
}

/// Macro for creating surrogate model errors
#[macro_export]
macro_rules! surrogate_error {
    ($($arg:tt)*) => {
        $crate::WpError::Surrogate(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::WpError::Internal(format!($($arg)*))
    };
}
