//! Objective evaluation: the caller's function, panic-guarded calls, and
//! the background workers used in asynchronous mode.
//!
//! Workers never touch the run record. Each reports an [`EvaluationReport`]
//! over a channel and the engine thread records it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wp_types::{internal_error, EvaluationError, WpResult};

use crate::space::ParamConfig;

/// What an objective returns: a bare value or a value with auxiliary data.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Value(f64),
    WithInfo { y: f64, info: serde_json::Value },
}

impl Evaluation {
    pub fn y(&self) -> f64 {
        match self {
            Self::Value(y) | Self::WithInfo { y, .. } => *y,
        }
    }

    pub fn into_parts(self) -> (f64, Option<serde_json::Value>) {
        match self {
            Self::Value(y) => (y, None),
            Self::WithInfo { y, info } => (y, Some(info)),
        }
    }
}

impl From<f64> for Evaluation {
    fn from(y: f64) -> Self {
        Self::Value(y)
    }
}

impl From<(f64, serde_json::Value)> for Evaluation {
    fn from((y, info): (f64, serde_json::Value)) -> Self {
        Self::WithInfo { y, info }
    }
}

type ObjectiveFn = dyn Fn(&ParamConfig) -> anyhow::Result<Evaluation> + Send + Sync;

/// The black-box function being optimised.
#[derive(Clone)]
pub struct Objective(Arc<ObjectiveFn>);

impl Objective {
    pub fn new(
        f: impl Fn(&ParamConfig) -> anyhow::Result<Evaluation> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Call the objective, converting errors, panics and non-finite values
    /// into an [`EvaluationError`].
    pub fn evaluate(&self, trial_num: usize, config: &ParamConfig) -> EvaluationReport {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.0)(config)));
        let outcome = match result {
            Ok(Ok(evaluation)) => {
                let (y, info) = evaluation.into_parts();
                if y.is_finite() {
                    Ok((y, info))
                } else {
                    Err(EvaluationError::NonFinite {
                        trial_num,
                        value: y,
                    })
                }
            }
            Ok(Err(error)) => Err(EvaluationError::ObjectiveFailed {
                trial_num,
                message: format!("{error:#}"),
            }),
            Err(payload) => Err(EvaluationError::Panicked {
                trial_num,
                message: panic_message(payload.as_ref()),
            }),
        };
        EvaluationReport {
            trial_num,
            outcome,
            eval_time: started.elapsed().as_secs_f64(),
        }
    }
}

impl fmt::Debug for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Objective(..)")
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result of one evaluation, delivered back to the engine thread.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub trial_num: usize,
    pub outcome: Result<(f64, Option<serde_json::Value>), EvaluationError>,
    pub eval_time: f64,
}

/// Cooperative stop signal. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

const LOST_WORKER_POLL: Duration = Duration::from_millis(50);

/// Runs evaluations on background threads, at most `max_in_flight` at a time.
pub(crate) struct AsyncDispatcher {
    max_in_flight: usize,
    tx: Sender<EvaluationReport>,
    rx: Receiver<EvaluationReport>,
    workers: HashMap<usize, JoinHandle<()>>,
}

impl AsyncDispatcher {
    pub(crate) fn new(max_in_flight: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            max_in_flight: max_in_flight.max(1),
            tx,
            rx,
            workers: HashMap::new(),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.workers.len() < self.max_in_flight
    }

    pub(crate) fn dispatch(
        &mut self,
        objective: &Objective,
        trial_num: usize,
        config: ParamConfig,
    ) -> WpResult<()> {
        let objective = objective.clone();
        let tx = self.tx.clone();
        let handle = thread::Builder::new()
            .name(format!("waypoint-trial-{trial_num}"))
            .spawn(move || {
                let report = objective.evaluate(trial_num, &config);
                // The engine only drops the receiver after draining workers.
                let _ = tx.send(report);
            })?;
        self.workers.insert(trial_num, handle);
        debug!(trial = trial_num, in_flight = self.workers.len(), "Dispatched evaluation");
        Ok(())
    }

    /// A report that is already waiting, if any.
    pub(crate) fn try_next(&mut self) -> Option<EvaluationReport> {
        let report = self.rx.try_recv().ok()?;
        self.reap(report.trial_num);
        Some(report)
    }

    /// Block until the next evaluation completes. A worker that exits
    /// without reporting comes back as a [`EvaluationError::WorkerLost`]
    /// failure for its trial.
    pub(crate) fn wait_next(&mut self) -> WpResult<EvaluationReport> {
        if self.workers.is_empty() {
            return Err(internal_error!("no evaluations in flight"));
        }
        loop {
            // Workers send before exiting, so snapshot the exited ones first.
            let exited: Vec<usize> = self
                .workers
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(trial_num, _)| *trial_num)
                .collect();
            match self.rx.recv_timeout(LOST_WORKER_POLL) {
                Ok(report) => {
                    self.reap(report.trial_num);
                    return Ok(report);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(trial_num) = exited.into_iter().min() {
                        warn!(trial = trial_num, "Evaluation worker exited without a report");
                        self.reap(trial_num);
                        return Ok(EvaluationReport {
                            trial_num,
                            outcome: Err(EvaluationError::WorkerLost { trial_num }),
                            eval_time: 0.0,
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(internal_error!("evaluation channel closed"));
                }
            }
        }
    }

    fn reap(&mut self, trial_num: usize) {
        if let Some(handle) = self.workers.remove(&trial_num) {
            // The worker has already sent its report; joining is immediate.
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ParameterValue;
    use serde_json::json;

    fn config(x: f64) -> ParamConfig {
        let mut config = ParamConfig::new();
        config.insert("x".into(), ParameterValue::Float(x));
        config
    }

    fn x_of(config: &ParamConfig) -> f64 {
        config["x"].as_f64().unwrap_or_default()
    }

    #[test]
    fn scalar_and_info_forms_are_detected() {
        let scalar = Objective::new(|c| Ok(x_of(c).into()));
        let report = scalar.evaluate(0, &config(2.0));
        assert_eq!(report.outcome, Ok((2.0, None)));

        let with_info = Objective::new(|c| Ok((x_of(c), json!({"steps": 3})).into()));
        let report = with_info.evaluate(1, &config(4.0));
        assert_eq!(report.outcome, Ok((4.0, Some(json!({"steps": 3})))));
        assert!(report.eval_time >= 0.0);
    }

    #[test]
    fn failures_become_evaluation_errors() {
        let failing = Objective::new(|_| Err(anyhow::anyhow!("solver diverged")));
        let report = failing.evaluate(3, &config(0.0));
        match report.outcome {
            Err(EvaluationError::ObjectiveFailed { trial_num, message }) => {
                assert_eq!(trial_num, 3);
                assert!(message.contains("solver diverged"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let nan = Objective::new(|_| Ok(f64::NAN.into()));
        assert!(matches!(
            nan.evaluate(4, &config(0.0)).outcome,
            Err(EvaluationError::NonFinite { trial_num: 4, .. })
        ));
    }

    #[test]
    fn panics_are_contained() {
        let panicking = Objective::new(|_| panic!("objective exploded"));
        let report = panicking.evaluate(5, &config(0.0));
        match report.outcome {
            Err(EvaluationError::Panicked { message, .. }) => {
                assert!(message.contains("objective exploded"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn dispatcher_reports_in_completion_order() {
        let objective = Objective::new(|c| {
            let x = x_of(c);
            thread::sleep(Duration::from_millis((x * 100.0) as u64));
            Ok(x.into())
        });
        let mut dispatcher = AsyncDispatcher::new(2);
        dispatcher.dispatch(&objective, 0, config(2.0)).unwrap();
        dispatcher.dispatch(&objective, 1, config(0.1)).unwrap();
        assert!(!dispatcher.has_capacity());

        let first = dispatcher.wait_next().unwrap();
        assert_eq!(first.trial_num, 1);
        assert_eq!(dispatcher.in_flight(), 1);
        let second = dispatcher.wait_next().unwrap();
        assert_eq!(second.trial_num, 0);
        assert!(dispatcher.wait_next().is_err());
    }

    #[test]
    fn silent_worker_is_reported_lost() {
        let mut dispatcher = AsyncDispatcher::new(2);
        let silent = thread::spawn(|| {});
        dispatcher.workers.insert(4, silent);

        let report = dispatcher.wait_next().unwrap();
        assert_eq!(report.trial_num, 4);
        assert_eq!(
            report.outcome,
            Err(EvaluationError::WorkerLost { trial_num: 4 })
        );
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        clone.stop();
        assert!(handle.is_stopped());
        handle.reset();
        assert!(!clone.is_stopped());
    }
}
