use crate::error::ScmError;
use serde::{Deserialize, Serialize};

/// Engine-wide configuration (spec §6.4). All fields optional on input;
/// missing fields take the documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "default_kde_point_count")]
    pub kde_point_count: usize,
    #[serde(default = "default_min_clamp")]
    pub global_min_clamp: f64,
    #[serde(default = "default_max_clamp")]
    pub global_max_clamp: f64,
    #[serde(default)]
    pub default_prior_weight: f64,
    #[serde(default = "default_max_std_dev_ratio")]
    pub default_max_std_dev_ratio: f64,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_sample_count() -> usize {
    100
}
fn default_kde_point_count() -> usize {
    50
}
fn default_min_clamp() -> f64 {
    0.1
}
fn default_max_clamp() -> f64 {
    10.0
}
fn default_max_std_dev_ratio() -> f64 {
    3.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            kde_point_count: default_kde_point_count(),
            global_min_clamp: default_min_clamp(),
            global_max_clamp: default_max_clamp(),
            default_prior_weight: 0.0,
            default_max_std_dev_ratio: default_max_std_dev_ratio(),
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// sample_count clamped to the documented permitted range [50, 1000].
    pub fn effective_sample_count(&self) -> usize {
        self.sample_count.clamp(50, 1000)
    }

    /// Reject a config whose own fields are nonsensical, mirroring the
    /// teacher's `validate_config` (the one structural check that runs
    /// before the config is ever handed to `propagate`/`analyze`).
    pub fn validate(&self) -> Result<(), ScmError> {
        if self.kde_point_count == 0 {
            return Err(ScmError::ConfigError {
                reason: "kdePointCount must be > 0".to_string(),
            });
        }
        if self.global_min_clamp >= self.global_max_clamp {
            return Err(ScmError::ConfigError {
                reason: "globalMinClamp must be < globalMaxClamp".to_string(),
            });
        }
        if self.default_max_std_dev_ratio <= 0.0 {
            return Err(ScmError::ConfigError {
                reason: "defaultMaxStdDevRatio must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.default_prior_weight) {
            return Err(ScmError::ConfigError {
                reason: "defaultPriorWeight must be in [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}
