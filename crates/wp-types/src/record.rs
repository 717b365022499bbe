//! The run record: an append-only, numerically ordered collection of trials
//! and the read-only query surface offered to external inspectors.

use serde::{Deserialize, Serialize};

use crate::errors::ConsistencyError;
use crate::trial::{ExtraData, Extremum, SelectionInfo, Trial};

/// Ordered collection of trials for one optimiser. The trial with number
/// `n` lives at index `n`; trials are never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    trials: Vec<Trial>,
}

impl RunRecord {
    pub fn new() -> Self {
        Self { trials: Vec::new() }
    }

    /// Rebuild a record from previously captured trials. Trials must be
    /// numbered `0..n` in order and none may be unfinished.
    pub fn from_trials(trials: Vec<Trial>) -> Result<Self, ConsistencyError> {
        for (index, trial) in trials.iter().enumerate() {
            if trial.num != index {
                return Err(ConsistencyError::UnknownTrial { trial_num: index });
            }
        }
        let record = Self { trials };
        record.check_consistency("restore")?;
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// The number the next trial will be assigned.
    pub fn next_trial_num(&self) -> usize {
        self.trials.len()
    }

    /// Append a new trial in the `Selecting` state, returning its number.
    pub fn begin_trial(&mut self, x: Vec<f64>) -> usize {
        let num = self.next_trial_num();
        self.trials.push(Trial::new(num, x));
        num
    }

    pub fn finish_selection(
        &mut self,
        trial_num: usize,
        selection_info: SelectionInfo,
        selection_time: f64,
        extra_data: ExtraData,
    ) -> Result<(), ConsistencyError> {
        self.get_mut(trial_num)?
            .finish_selection(selection_info, selection_time, extra_data)
    }

    pub fn finish_evaluation(
        &mut self,
        trial_num: usize,
        y: f64,
        eval_info: Option<serde_json::Value>,
        eval_time: f64,
    ) -> Result<(), ConsistencyError> {
        self.get_mut(trial_num)?.mark_finished(y, eval_info, eval_time)
    }

    pub fn fail_evaluation(
        &mut self,
        trial_num: usize,
        error: &str,
        eval_time: f64,
    ) -> Result<(), ConsistencyError> {
        self.get_mut(trial_num)?.mark_failed(error, eval_time)
    }

    pub fn get(&self, trial_num: usize) -> Result<&Trial, ConsistencyError> {
        self.trials
            .get(trial_num)
            .ok_or(ConsistencyError::UnknownTrial { trial_num })
    }

    fn get_mut(&mut self, trial_num: usize) -> Result<&mut Trial, ConsistencyError> {
        self.trials
            .get_mut(trial_num)
            .ok_or(ConsistencyError::UnknownTrial { trial_num })
    }

    /// Every trial regardless of state, in numeric order.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn finished_trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|t| t.is_finished())
    }

    pub fn finished_count(&self) -> usize {
        self.finished_trials().count()
    }

    pub fn unfinished_count(&self) -> usize {
        self.trials.iter().filter(|t| t.is_unfinished()).count()
    }

    /// Numbers of the trials currently selecting or evaluating.
    pub fn in_flight(&self) -> Vec<usize> {
        self.trials
            .iter()
            .filter(|t| t.is_unfinished())
            .map(|t| t.num)
            .collect()
    }

    pub fn has_unfinished_trials(&self) -> bool {
        self.trials.iter().any(|t| t.is_unfinished())
    }

    /// Fail loudly if `operation` would see half-finished trials.
    pub fn check_consistency(&self, operation: &str) -> Result<(), ConsistencyError> {
        let count = self.unfinished_count();
        if count > 0 {
            return Err(ConsistencyError::UnfinishedTrials {
                operation: operation.to_string(),
                count,
            });
        }
        Ok(())
    }

    /// All trials sorted by number. Failed trials are included (with `y`
    /// absent); unfinished trials make this an error.
    pub fn get_sorted_trials(&self) -> Result<Vec<&Trial>, ConsistencyError> {
        self.check_consistency("get_sorted_trials")?;
        Ok(self.trials.iter().collect())
    }

    /// Best finished trial under `extremum`. Ties go to the lower number.
    pub fn get_incumbent(&self, extremum: Extremum) -> Option<&Trial> {
        let mut best: Option<(&Trial, f64)> = None;
        for trial in self.finished_trials() {
            let Some(y) = trial.y else { continue };
            match best {
                Some((_, best_y)) if !extremum.is_better(y, best_y) => {}
                _ => best = Some((trial, y)),
            }
        }
        best.map(|(trial, _)| trial)
    }

    /// Latent points and objective values of every finished trial.
    pub fn training_data(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        self.finished_trials()
            .filter_map(|t| t.y.map(|y| (t.x.clone(), y)))
            .unzip()
    }

    /// Points of every trial that has one, including those in flight.
    pub fn points(&self) -> Vec<&[f64]> {
        self.trials.iter().map(|t| t.x.as_slice()).collect()
    }

    /// The finished trials numbered below `trial_num` together with the trial
    /// itself: the data a synchronous run had when it selected that trial.
    pub fn data_for_trial(
        &self,
        trial_num: usize,
    ) -> Result<(Vec<&Trial>, &Trial), ConsistencyError> {
        self.check_consistency("data_for_trial")?;
        let trial = self.get(trial_num)?;
        let finished = self.trials[..trial_num]
            .iter()
            .filter(|t| t.is_finished())
            .collect();
        Ok((finished, trial))
    }

    /// Distance of every finished trial from `true_best` (the incumbent when
    /// not given), as `(trial_num, error)` pairs. With `best_so_far` each
    /// entry is the smallest error up to and including that trial.
    pub fn error_series(
        &self,
        extremum: Extremum,
        true_best: Option<f64>,
        best_so_far: bool,
    ) -> Result<Vec<(usize, f64)>, ConsistencyError> {
        self.check_consistency("error_series")?;
        let best = match true_best {
            Some(best) => best,
            None => self
                .get_incumbent(extremum)
                .and_then(|t| t.y)
                .ok_or(ConsistencyError::NoFinishedTrials)?,
        };

        let mut running = f64::INFINITY;
        let series = self
            .finished_trials()
            .filter_map(|t| t.y.map(|y| (t.num, y)))
            .map(|(num, y)| {
                let error = match extremum {
                    Extremum::Max => best - y,
                    Extremum::Min => y - best,
                };
                if best_so_far {
                    running = running.min(error);
                    (num, running)
                } else {
                    (num, error)
                }
            })
            .collect();
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::{SelectionType, TrialState};

    fn finish(record: &mut RunRecord, x: f64, y: f64) -> usize {
        let num = record.begin_trial(vec![x]);
        record
            .finish_selection(num, SelectionInfo::pre_phase(), 0.0, ExtraData::new())
            .unwrap();
        record.finish_evaluation(num, y, None, 0.0).unwrap();
        num
    }

    fn sample_record() -> RunRecord {
        let mut record = RunRecord::new();
        finish(&mut record, 0.1, 3.0);
        finish(&mut record, 0.2, 7.0);
        finish(&mut record, 0.3, 1.0);
        finish(&mut record, 0.4, 7.0);
        record
    }

    #[test]
    fn numbers_match_insertion_order() {
        let record = sample_record();
        for (index, trial) in record.trials().iter().enumerate() {
            assert_eq!(trial.num, index);
        }
        assert_eq!(record.next_trial_num(), 4);
    }

    #[test]
    fn incumbent_respects_direction_and_ties() {
        let record = sample_record();
        assert_eq!(record.get_incumbent(Extremum::Max).unwrap().num, 1);
        assert_eq!(record.get_incumbent(Extremum::Min).unwrap().num, 2);
        assert!(RunRecord::new().get_incumbent(Extremum::Max).is_none());
    }

    #[test]
    fn unfinished_trials_are_absent_from_finished_queries() {
        let mut record = sample_record();
        let pending = record.begin_trial(vec![0.9]);
        record
            .finish_selection(pending, SelectionInfo::pre_phase(), 0.0, ExtraData::new())
            .unwrap();

        assert!(record.has_unfinished_trials());
        assert_eq!(record.in_flight(), vec![pending]);
        assert_eq!(record.finished_count(), 4);
        assert_eq!(record.training_data().0.len(), 4);
        assert_eq!(record.get_incumbent(Extremum::Max).unwrap().num, 1);

        let err = record.get_sorted_trials().unwrap_err();
        assert!(matches!(err, ConsistencyError::UnfinishedTrials { count: 1, .. }));
        assert!(record.data_for_trial(2).is_err());
        assert!(record.error_series(Extremum::Max, None, false).is_err());
    }

    #[test]
    fn failed_trials_are_terminal_but_not_finished() {
        let mut record = sample_record();
        let num = record.begin_trial(vec![0.5]);
        record
            .finish_selection(num, SelectionInfo::pre_phase(), 0.0, ExtraData::new())
            .unwrap();
        record.fail_evaluation(num, "oops", 0.1).unwrap();

        assert!(!record.has_unfinished_trials());
        assert_eq!(record.finished_count(), 4);
        assert_eq!(record.get_sorted_trials().unwrap().len(), 5);
        assert_eq!(record.get(num).unwrap().state, TrialState::Failed);
    }

    #[test]
    fn unknown_trial_is_rejected() {
        let record = sample_record();
        assert_eq!(
            record.get(10).unwrap_err(),
            ConsistencyError::UnknownTrial { trial_num: 10 }
        );
    }

    #[test]
    fn data_for_trial_uses_earlier_finished_trials() {
        let record = sample_record();
        let (finished, trial) = record.data_for_trial(2).unwrap();
        assert_eq!(trial.num, 2);
        assert_eq!(finished.iter().map(|t| t.num).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(trial.selection_type(), Some(SelectionType::PrePhase));
    }

    #[test]
    fn error_series_against_incumbent() {
        let record = sample_record();
        let errors = record.error_series(Extremum::Max, None, false).unwrap();
        assert_eq!(errors, vec![(0, 4.0), (1, 0.0), (2, 6.0), (3, 0.0)]);

        let running = record.error_series(Extremum::Min, Some(0.0), true).unwrap();
        assert_eq!(running, vec![(0, 3.0), (1, 3.0), (2, 1.0), (3, 1.0)]);
    }

    #[test]
    fn restore_rejects_gaps_and_unfinished() {
        let record = sample_record();
        let mut trials = record.trials().to_vec();
        assert!(RunRecord::from_trials(trials.clone()).is_ok());

        trials.remove(1);
        assert!(RunRecord::from_trials(trials).is_err());

        let mut pending = sample_record();
        pending.begin_trial(vec![0.0]);
        assert!(RunRecord::from_trials(pending.trials().to_vec()).is_err());
    }
}
