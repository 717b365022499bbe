//! Multi-start maximisation of an acquisition function over the latent box.
//!
//! A batch of uniform random candidates is scored first; the best few seed a
//! coordinate pattern search. Ties keep the first-found point.

use rand::Rng;
use serde::{Deserialize, Serialize};
use wp_types::{config_error, MaximisationInfo, WpResult};

use crate::acquisition::AcquisitionFunction;

/// Search effort for the acquisition maximiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaximiserConfig {
    pub random_candidates: usize,
    /// Number of best random candidates refined by local search.
    pub restarts: usize,
    pub local_iterations: usize,
    /// Initial pattern-search step, in latent units.
    pub initial_step: f64,
}

impl Default for MaximiserConfig {
    fn default() -> Self {
        Self {
            random_candidates: 512,
            restarts: 4,
            local_iterations: 40,
            initial_step: 0.1,
        }
    }
}

impl MaximiserConfig {
    pub fn validate(&self) -> WpResult<()> {
        if self.random_candidates == 0 {
            return Err(config_error!("maximiser needs at least one random candidate"));
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return Err(config_error!(
                "maximiser initial_step must be positive, got {}",
                self.initial_step
            ));
        }
        Ok(())
    }
}

/// Best point found and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Maximum {
    pub x: Vec<f64>,
    pub value: f64,
    pub info: MaximisationInfo,
}

const MIN_STEP: f64 = 1e-6;

/// NaN scores never win.
fn comparable(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Maximise `acq` over the box `bounds`.
pub fn maximise<R: Rng + ?Sized>(
    acq: &AcquisitionFunction<'_>,
    bounds: &[(f64, f64)],
    config: &MaximiserConfig,
    rng: &mut R,
) -> WpResult<Maximum> {
    config.validate()?;

    let candidates: Vec<Vec<f64>> = (0..config.random_candidates)
        .map(|_| {
            bounds
                .iter()
                .map(|&(lo, hi)| if lo == hi { lo } else { rng.gen_range(lo..=hi) })
                .collect()
        })
        .collect();
    let scores: Vec<f64> = acq
        .evaluate(&candidates)?
        .into_iter()
        .map(comparable)
        .collect();

    // Stable sort keeps earlier candidates ahead on equal scores.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut best_x = candidates[order[0]].clone();
    let mut best_value = scores[order[0]];
    let mut local_steps = 0;

    for &start in order.iter().take(config.restarts) {
        let (x, value, steps) =
            pattern_search(acq, bounds, candidates[start].clone(), scores[start], config)?;
        local_steps += steps;
        if value > best_value {
            best_x = x;
            best_value = value;
        }
    }

    Ok(Maximum {
        x: best_x,
        value: best_value,
        info: MaximisationInfo {
            max_acq: best_value,
            candidates: config.random_candidates,
            local_steps,
        },
    })
}

/// Coordinate pattern search: try `±step` along every free dimension,
/// move to the best strictly-improving move, otherwise halve the step.
fn pattern_search(
    acq: &AcquisitionFunction<'_>,
    bounds: &[(f64, f64)],
    mut x: Vec<f64>,
    mut value: f64,
    config: &MaximiserConfig,
) -> WpResult<(Vec<f64>, f64, usize)> {
    let mut step = config.initial_step;
    let mut steps = 0;

    for _ in 0..config.local_iterations {
        if step < MIN_STEP {
            break;
        }
        let mut moves = Vec::with_capacity(2 * bounds.len());
        for (d, &(lo, hi)) in bounds.iter().enumerate() {
            if lo == hi {
                continue;
            }
            for delta in [step, -step] {
                let mut moved = x.clone();
                moved[d] = (moved[d] + delta).clamp(lo, hi);
                if moved[d] != x[d] {
                    moves.push(moved);
                }
            }
        }
        if moves.is_empty() {
            break;
        }

        let scores = acq.evaluate(&moves)?;

        let mut best: Option<(usize, f64)> = None;
        for (i, score) in scores.into_iter().map(comparable).enumerate() {
            if score > best.map_or(value, |(_, s)| s) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, score)) => {
                x = moves.swap_remove(i);
                value = score;
                steps += 1;
            }
            None => step /= 2.0,
        }
    }

    Ok((x, value, steps))
}
