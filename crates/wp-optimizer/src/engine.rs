//! The optimiser engine.
//!
//! Each trial cycles through `selection_started`, then (after the pre-phase)
//! `surrogate_fitted` and `acquisition_maximised`, then `selection_finished`,
//! `evaluation_started` and `evaluation_finished`. A run is bracketed by
//! `run_started` and `run_finished`, and `run` may be called again with a
//! larger budget to resume.
//!
//! In asynchronous mode evaluations run on worker threads. The engine thread
//! keeps selecting while they run and is the only writer of the run record
//! and the surrogate; listener callbacks also run only on the engine thread.
//! A trial's surrogate is fitted on the trials finished when its selection
//! begins. Trials still in flight are left out and counted in
//! `fitting_info.pending_trials`.

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wp_types::{
    config_error, internal_error, AcquisitionFamily, ConsistencyError, ExtraData, Extremum,
    FittingInfo, RunRecord, SelectionInfo, SelectionType, Trial, TrialState, WpResult,
};

use crate::acquisition::AcquisitionFactory;
use crate::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use crate::config::{EvaluationMode, FailurePolicy, OptimiserConfig};
use crate::evaluation::{AsyncDispatcher, EvaluationReport, Objective, StopHandle};
use crate::listener::{Listener, ListenerId, ListenerSet, OptimiserEvent, OptimiserInfo};
use crate::maximise::maximise;
use crate::space::{close_to_any, LatentSpace, ParamConfig, SearchSpace};
use crate::surrogate::{GaussianProcess, SurrogateModel};

/// Life-cycle position of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    RunStarted,
    SelectionStarted,
    SurrogateFitted,
    AcquisitionMaximised,
    SelectionFinished,
    EvaluationStarted,
    EvaluationFinished,
    RunFinished,
}

/// Outcome of one call to [`Optimiser::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub max_trials: usize,
    pub trials: usize,
    pub finished: usize,
    pub failed: usize,
    /// Whether the run ended early on a stop request.
    pub stopped: bool,
    pub incumbent: Option<Trial>,
    pub elapsed_seconds: f64,
}

/// Surrogate and acquisition values along one parameter through the point
/// selected for a trial, with every other coordinate held fixed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSlice {
    pub trial_num: usize,
    pub param: String,
    /// Latent coordinates of the slice.
    pub latent: Vec<f64>,
    /// The same points in parameter units.
    pub values: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub acquisition: Vec<f64>,
    pub selected_value: f64,
    pub y: Option<f64>,
}

/// Assembles an [`Optimiser`] from its non-serialisable parts.
pub struct OptimiserBuilder {
    space: SearchSpace,
    objective: Objective,
    config: OptimiserConfig,
    acquisition: AcquisitionFactory,
    surrogate: Box<dyn SurrogateModel>,
    listeners: Vec<Listener>,
    stop: StopHandle,
    checkpoint: Option<Checkpoint>,
}

impl OptimiserBuilder {
    pub fn config(mut self, config: OptimiserConfig) -> Self {
        self.config = config;
        self
    }

    pub fn acquisition(mut self, factory: AcquisitionFactory) -> Self {
        self.acquisition = factory;
        self
    }

    pub fn surrogate(mut self, model: impl SurrogateModel + 'static) -> Self {
        self.surrogate = Box::new(model);
        self
    }

    pub fn listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Share a stop handle with code built before the optimiser, such as
    /// the objective.
    pub fn stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Resume from a checkpoint. The checkpoint's configuration, run id,
    /// trials and RNG state replace the builder's configuration.
    pub fn restore(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn build(self) -> WpResult<Optimiser> {
        let Self {
            space,
            objective,
            config,
            acquisition,
            surrogate,
            listeners,
            stop,
            checkpoint,
        } = self;

        let (config, id, max_trials, record, rng) = match checkpoint {
            Some(checkpoint) => {
                checkpoint.check_version()?;
                if checkpoint.space != space {
                    return Err(config_error!(
                        "checkpoint was captured for a different parameter space"
                    ));
                }
                let record = RunRecord::from_trials(checkpoint.trials)?;
                info!(
                    run_id = %checkpoint.run_id,
                    trials = record.len(),
                    "Restoring run from checkpoint"
                );
                (
                    checkpoint.config,
                    checkpoint.run_id,
                    checkpoint.max_trials,
                    record,
                    checkpoint.rng,
                )
            }
            None => {
                let rng = ChaCha8Rng::seed_from_u64(config.seed);
                (config, Uuid::new_v4(), 0, RunRecord::new(), rng)
            }
        };

        let space = LatentSpace::new(space)?;
        let pre_phase_points = config.validate(&space)?;

        let mut optimiser = Optimiser {
            id,
            config,
            space,
            acquisition,
            surrogate,
            objective,
            record,
            listeners: ListenerSet::new(),
            rng,
            pre_phase_points,
            max_trials,
            state: EngineState::Idle,
            stop,
        };
        for listener in listeners {
            optimiser.register(listener);
        }
        debug!(
            run_id = %optimiser.id,
            parameters = optimiser.space.dims(),
            acquisition = %optimiser.acquisition.name(optimiser.config.extremum),
            "Built optimiser"
        );
        Ok(optimiser)
    }
}

/// Drives a Bayesian optimisation run.
pub struct Optimiser {
    id: Uuid,
    config: OptimiserConfig,
    space: LatentSpace,
    acquisition: AcquisitionFactory,
    surrogate: Box<dyn SurrogateModel>,
    objective: Objective,
    record: RunRecord,
    listeners: ListenerSet,
    rng: ChaCha8Rng,
    /// Latent points of a fixed pre-phase design; empty for a random one.
    pre_phase_points: Vec<Vec<f64>>,
    max_trials: usize,
    state: EngineState,
    stop: StopHandle,
}

impl Optimiser {
    /// Start building an optimiser with the default configuration, a UCB
    /// factory and a Gaussian-process surrogate.
    pub fn builder(space: SearchSpace, objective: Objective) -> OptimiserBuilder {
        OptimiserBuilder {
            space,
            objective,
            config: OptimiserConfig::default(),
            acquisition: AcquisitionFactory::default(),
            surrogate: Box::new(GaussianProcess::default()),
            listeners: Vec::new(),
            stop: StopHandle::new(),
            checkpoint: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &OptimiserConfig {
        &self.config
    }

    pub fn latent_space(&self) -> &LatentSpace {
        &self.space
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn max_trials(&self) -> usize {
        self.max_trials
    }

    pub fn is_maximising(&self) -> bool {
        self.config.extremum == Extremum::Max
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn info(&self) -> OptimiserInfo {
        OptimiserInfo {
            run_id: self.id,
            name: self.config.name.clone(),
            extremum: self.config.extremum,
            param_names: self.space.param_names(),
            acquisition: self.acquisition.name(self.config.extremum).to_string(),
            family: self.acquisition.family(),
            surrogate: self.surrogate.name().to_string(),
            asynchronous: self.config.mode.is_asynchronous(),
            max_trials: self.max_trials,
            finished_trials: self.record.finished_count(),
        }
    }

    pub fn register(&mut self, listener: Listener) -> ListenerId {
        let info = self.info();
        self.listeners.register(listener, &info, &self.record)
    }

    pub fn unregister(&mut self, id: ListenerId) -> Option<Listener> {
        self.listeners.unregister(id, &self.record)
    }

    // ---- queries -------------------------------------------------------

    /// The trial numbered `trial_num`, which must lie in `[0, max_trials)`.
    pub fn get_trial(&self, trial_num: usize) -> WpResult<&Trial> {
        self.check_trial_range(trial_num)?;
        Ok(self.record.get(trial_num)?)
    }

    pub fn get_sorted_trials(&self) -> WpResult<Vec<&Trial>> {
        Ok(self.record.get_sorted_trials()?)
    }

    pub fn get_incumbent(&self) -> Option<&Trial> {
        self.record.get_incumbent(self.config.extremum)
    }

    pub fn has_unfinished_trials(&self) -> bool {
        self.record.has_unfinished_trials()
    }

    /// The configuration a trial evaluated, in parameter units.
    pub fn trial_config(&self, trial_num: usize) -> WpResult<ParamConfig> {
        let trial = self.get_trial(trial_num)?;
        Ok(self.space.from_latent(&trial.x)?)
    }

    pub fn incumbent_config(&self) -> WpResult<Option<ParamConfig>> {
        match self.get_incumbent() {
            Some(trial) => Ok(Some(self.space.from_latent(&trial.x)?)),
            None => Ok(None),
        }
    }

    pub fn error_series(
        &self,
        true_best: Option<f64>,
        best_so_far: bool,
    ) -> WpResult<Vec<(usize, f64)>> {
        Ok(self
            .record
            .error_series(self.config.extremum, true_best, best_so_far)?)
    }

    fn check_trial_range(&self, trial_num: usize) -> WpResult<()> {
        if trial_num >= self.max_trials {
            return Err(ConsistencyError::TrialOutOfRange {
                trial_num,
                max_trials: self.max_trials,
            }
            .into());
        }
        Ok(())
    }

    /// Capture the full engine state. Fails while trials are in flight.
    pub fn checkpoint(&self) -> WpResult<Checkpoint> {
        self.record.check_consistency("checkpoint")?;
        Ok(Checkpoint {
            version: CHECKPOINT_VERSION,
            run_id: self.id,
            created_at: Utc::now(),
            config: self.config.clone(),
            space: self.space.search_space(),
            max_trials: self.max_trials,
            trials: self.record.trials().to_vec(),
            rng: self.rng.clone(),
        })
    }

    // ---- running -------------------------------------------------------

    /// Run until `max_trials` trials exist. Calling again with a larger
    /// budget resumes the run.
    pub fn run(&mut self, max_trials: usize) -> WpResult<RunSummary> {
        if max_trials < self.record.len() {
            return Err(config_error!(
                "max_trials ({}) is below the {} trials already recorded",
                max_trials,
                self.record.len()
            ));
        }
        self.record.check_consistency("run")?;
        self.max_trials = max_trials;
        self.stop.reset();

        let started = Instant::now();
        let finished_trials = self.record.finished_count();
        info!(
            run_id = %self.id,
            next_trial = self.record.len(),
            max_trials,
            "Starting run"
        );
        self.state = EngineState::RunStarted;
        self.listeners.notify(
            &OptimiserEvent::RunStarted {
                finished_trials,
                max_trials,
            },
            &self.record,
        );

        let outcome = match self.config.mode {
            EvaluationMode::Synchronous => self.run_synchronous(),
            EvaluationMode::Asynchronous { max_in_flight } => self.run_asynchronous(max_in_flight),
        };

        self.state = EngineState::RunFinished;
        let finished = self.record.finished_count();
        self.listeners.notify(
            &OptimiserEvent::RunFinished {
                finished_trials: finished,
            },
            &self.record,
        );
        self.state = EngineState::Idle;

        let failed = self
            .record
            .trials()
            .iter()
            .filter(|t| t.state == TrialState::Failed)
            .count();
        let summary = RunSummary {
            run_id: self.id,
            max_trials,
            trials: self.record.len(),
            finished,
            failed,
            stopped: self.record.len() < max_trials,
            incumbent: self.get_incumbent().cloned(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        match &outcome {
            Ok(()) => info!(
                run_id = %self.id,
                trials = summary.trials,
                failed = summary.failed,
                best_y = ?summary.incumbent.as_ref().and_then(|t| t.y),
                "Run finished"
            ),
            Err(e) => warn!(run_id = %self.id, error = %e, "Run halted"),
        }
        outcome.map(|()| summary)
    }

    fn stop_requested(&self) -> bool {
        if self.stop.is_stopped() {
            info!(trials = self.record.len(), "Stop requested");
            return true;
        }
        false
    }

    fn run_synchronous(&mut self) -> WpResult<()> {
        while self.record.len() < self.max_trials {
            if self.stop_requested() {
                break;
            }
            let (trial_num, config) = self.select_next()?;
            self.begin_evaluation(trial_num);
            let report = self.objective.evaluate(trial_num, &config);
            self.complete(report)?;
        }
        Ok(())
    }

    fn run_asynchronous(&mut self, max_in_flight: usize) -> WpResult<()> {
        let mut dispatcher = AsyncDispatcher::new(max_in_flight);
        let result = self.dispatch_loop(&mut dispatcher);
        // In-flight evaluations are always recorded, even when halting.
        let drained = self.drain(&mut dispatcher);
        result.and(drained)
    }

    fn dispatch_loop(&mut self, dispatcher: &mut AsyncDispatcher) -> WpResult<()> {
        loop {
            while let Some(report) = dispatcher.try_next() {
                self.complete(report)?;
            }
            if self.record.len() >= self.max_trials || self.stop_requested() {
                return Ok(());
            }
            if !dispatcher.has_capacity() {
                let report = dispatcher.wait_next()?;
                self.complete(report)?;
                continue;
            }
            let past_pre_phase = self.record.next_trial_num() >= self.config.pre_phase_trials;
            if past_pre_phase && self.record.finished_count() == 0 && dispatcher.in_flight() > 0 {
                debug!("Waiting for a finished trial before fitting the surrogate");
                let report = dispatcher.wait_next()?;
                self.complete(report)?;
                continue;
            }

            let (trial_num, config) = self.select_next()?;
            self.begin_evaluation(trial_num);
            if let Err(e) = dispatcher.dispatch(&self.objective, trial_num, config) {
                self.record
                    .fail_evaluation(trial_num, &e.to_string(), 0.0)?;
                return Err(e);
            }
        }
    }

    fn drain(&mut self, dispatcher: &mut AsyncDispatcher) -> WpResult<()> {
        let mut first_error = None;
        while dispatcher.in_flight() > 0 {
            let report = dispatcher.wait_next()?;
            if let Err(e) = self.complete(report) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Select the point of the next trial and record it.
    fn select_next(&mut self) -> WpResult<(usize, ParamConfig)> {
        let trial_num = self.record.next_trial_num();
        self.state = EngineState::SelectionStarted;
        self.listeners
            .notify(&OptimiserEvent::SelectionStarted { trial_num }, &self.record);
        let started = Instant::now();

        let (x, selection_info, extra_data) = if trial_num < self.config.pre_phase_trials {
            (
                self.pre_phase_point(trial_num),
                SelectionInfo::pre_phase(),
                ExtraData::new(),
            )
        } else if self.record.finished_count() == 0 {
            warn!(
                trial = trial_num,
                "No finished trials to fit on; selecting at random"
            );
            (
                self.space.sample(&mut self.rng),
                SelectionInfo::random(),
                ExtraData::new(),
            )
        } else {
            self.select_by_acquisition(trial_num)?
        };
        let config = self.space.from_latent(&x)?;
        let selection_time = started.elapsed().as_secs_f64();

        let assigned = self.record.begin_trial(x);
        if assigned != trial_num {
            return Err(internal_error!(
                "trial {} was assigned number {}",
                trial_num,
                assigned
            ));
        }
        self.record
            .finish_selection(trial_num, selection_info, selection_time, extra_data)?;
        self.state = EngineState::SelectionFinished;

        let trial = self.record.get(trial_num)?;
        let selection_info = trial
            .selection_info
            .as_ref()
            .ok_or_else(|| internal_error!("trial {} has no selection info", trial_num))?;
        debug!(
            trial = trial_num,
            selection = selection_info.kind.as_str(),
            selection_time,
            "Selection finished"
        );
        self.listeners.notify(
            &OptimiserEvent::SelectionFinished {
                trial_num,
                x: &trial.x,
                selection_info,
            },
            &self.record,
        );
        Ok((trial_num, config))
    }

    fn pre_phase_point(&mut self, trial_num: usize) -> Vec<f64> {
        match self.pre_phase_points.get(trial_num) {
            Some(point) => point.clone(),
            None => self.space.sample(&mut self.rng),
        }
    }

    /// Fit the surrogate, build this trial's acquisition function and
    /// maximise it.
    fn select_by_acquisition(
        &mut self,
        trial_num: usize,
    ) -> WpResult<(Vec<f64>, SelectionInfo, ExtraData)> {
        let (xs, ys) = self.record.training_data();
        let pending_trials = self.record.unfinished_count();
        let fit = self.surrogate.fit(&xs, &ys)?;
        let fitting_info = FittingInfo {
            iterations: fit.iterations,
            training_points: ys.len(),
            pending_trials,
        };
        self.state = EngineState::SurrogateFitted;
        debug!(
            trial = trial_num,
            surrogate = self.surrogate.name(),
            training_points = ys.len(),
            pending_trials,
            log_marginal_likelihood = fit.log_marginal_likelihood,
            "Surrogate fitted"
        );
        self.listeners.notify(
            &OptimiserEvent::SurrogateFitted {
                trial_num,
                training_points: ys.len(),
            },
            &self.record,
        );

        let incumbent_cost = match self.acquisition.family() {
            AcquisitionFamily::Improvement => Some(
                self.record
                    .get_incumbent(self.config.extremum)
                    .and_then(|t| t.y)
                    .ok_or(ConsistencyError::NoFinishedTrials)?,
            ),
            AcquisitionFamily::Optimism => None,
        };
        let bounds = self.space.latent_bounds();
        let (maximum, acq_info) = {
            let acq = self.acquisition.build(
                trial_num,
                &*self.surrogate,
                self.config.extremum,
                incumbent_cost,
            )?;
            let maximum = maximise(&acq, &bounds, &self.config.maximiser, &mut self.rng)?;
            (maximum, acq.info())
        };
        self.state = EngineState::AcquisitionMaximised;
        debug!(
            trial = trial_num,
            acquisition = %acq_info.name,
            max_acq = maximum.value,
            local_steps = maximum.info.local_steps,
            "Acquisition maximised"
        );
        self.listeners.notify(
            &OptimiserEvent::AcquisitionMaximised {
                trial_num,
                max_acq: maximum.value,
            },
            &self.record,
        );

        let mut extra_data = ExtraData::new();
        extra_data.insert("surrogate".into(), json!(self.surrogate.name()));
        extra_data.insert("acq_value".into(), json!(maximum.value));
        extra_data.insert("maximised_x".into(), json!(maximum.x));

        let info = SelectionInfo::acquisition(acq_info, maximum.info, fitting_info);
        if close_to_any(&maximum.x, self.record.points(), self.config.close_tolerance) {
            warn!(
                trial = trial_num,
                "Maximised point duplicates an existing trial; selecting at random"
            );
            let x = self.space.sample(&mut self.rng);
            return Ok((x, info.into_random_fallback(), extra_data));
        }
        Ok((maximum.x, info, extra_data))
    }

    fn begin_evaluation(&mut self, trial_num: usize) {
        self.state = EngineState::EvaluationStarted;
        self.listeners
            .notify(&OptimiserEvent::EvaluationStarted { trial_num }, &self.record);
    }

    /// Record an evaluation outcome. Returns the evaluation error when the
    /// failure policy halts the run.
    fn complete(&mut self, report: EvaluationReport) -> WpResult<()> {
        let EvaluationReport {
            trial_num,
            outcome,
            eval_time,
        } = report;

        let failure = match outcome {
            Ok((y, eval_info)) => {
                self.record
                    .finish_evaluation(trial_num, y, eval_info, eval_time)?;
                info!(trial = trial_num, y, eval_time, "Trial finished");
                None
            }
            Err(error) => {
                warn!(trial = trial_num, error = %error, "Trial failed");
                self.record
                    .fail_evaluation(trial_num, &error.to_string(), eval_time)?;
                Some(error)
            }
        };
        self.state = EngineState::EvaluationFinished;

        let trial = self.record.get(trial_num)?;
        self.listeners.notify(
            &OptimiserEvent::EvaluationFinished {
                trial_num,
                y: trial.y,
                eval_info: trial.eval_info.as_ref(),
            },
            &self.record,
        );

        match failure {
            Some(error) if self.config.failure_policy == FailurePolicy::Halt => Err(error.into()),
            _ => Ok(()),
        }
    }

    // ---- diagnostics ---------------------------------------------------

    /// Refit the surrogate on the data trial `trial_num` was selected with
    /// and evaluate it along `param` through the trial's point.
    pub fn trial_slice(
        &self,
        trial_num: usize,
        param: &str,
        divisions: usize,
    ) -> WpResult<TrialSlice> {
        if self.config.mode.is_asynchronous() {
            return Err(ConsistencyError::AsynchronousRun {
                operation: "trial_slice".to_string(),
            }
            .into());
        }
        self.check_trial_range(trial_num)?;
        let (finished, trial) = self.record.data_for_trial(trial_num)?;
        if trial.selection_type() == Some(SelectionType::PrePhase) {
            return Err(ConsistencyError::PrePhaseTrial { trial_num }.into());
        }
        let (xs, ys): (Vec<Vec<f64>>, Vec<f64>) = finished
            .iter()
            .filter_map(|t| t.y.map(|y| (t.x.clone(), y)))
            .unzip();
        if ys.is_empty() {
            return Err(ConsistencyError::NoFinishedTrials.into());
        }

        let extremum = self.config.extremum;
        let mut model = self.surrogate.fresh();
        model.fit(&xs, &ys)?;
        let incumbent_cost = match self.acquisition.family() {
            AcquisitionFamily::Improvement => ys
                .iter()
                .copied()
                .reduce(|best, y| if extremum.is_better(y, best) { y } else { best }),
            AcquisitionFamily::Optimism => None,
        };
        let acq = self
            .acquisition
            .build(trial_num, &*model, extremum, incumbent_cost)?;

        let dim = self.space.param_index(param)?;
        let latent = self.space.latent_range(param, divisions)?;
        let points: Vec<Vec<f64>> = latent
            .iter()
            .map(|&t| {
                let mut point = trial.x.clone();
                point[dim] = t;
                point
            })
            .collect();
        let values = points
            .iter()
            .zip(&latent)
            .map(|(point, &t)| -> WpResult<f64> {
                Ok(self.space.from_latent(point)?[param].as_f64().unwrap_or(t))
            })
            .collect::<WpResult<Vec<f64>>>()?;
        let (mean, std) = model.predict(&points)?;
        let acquisition = acq.evaluate(&points)?;
        let selected_value = self.space.from_latent(&trial.x)?[param]
            .as_f64()
            .unwrap_or(trial.x[dim]);

        Ok(TrialSlice {
            trial_num,
            param: param.to_string(),
            latent,
            values,
            mean,
            std,
            acquisition,
            selected_value,
            y: trial.y,
        })
    }
}

impl std::fmt::Debug for Optimiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimiser")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("acquisition", &self.acquisition)
            .field("surrogate", &self.surrogate.name())
            .field("trials", &self.record.len())
            .field("max_trials", &self.max_trials)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
