//! Serialisable snapshot of an optimiser between runs.

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wp_types::{config_error, Trial, WpResult};

use crate::config::OptimiserConfig;
use crate::space::SearchSpace;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to rebuild an optimiser and continue its run:
/// configuration, parameter declarations, trial ceiling, trials and the
/// engine RNG state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub config: OptimiserConfig,
    pub space: SearchSpace,
    pub max_trials: usize,
    pub trials: Vec<Trial>,
    pub rng: ChaCha8Rng,
}

impl Checkpoint {
    pub fn to_json(&self) -> WpResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> WpResult<Self> {
        let checkpoint: Self = serde_json::from_str(json)?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }

    pub fn check_version(&self) -> WpResult<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(config_error!(
                "unsupported checkpoint version {} (expected {})",
                self.version,
                CHECKPOINT_VERSION
            ));
        }
        Ok(())
    }

    pub fn finished_trials(&self) -> usize {
        self.trials.iter().filter(|t| t.is_finished()).count()
    }
}
