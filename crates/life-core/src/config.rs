//! Configuration types for the world.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Evolution controls, read by the world every tick.
///
/// These are the values captured under `controls` in a snapshot and only
/// re-applied on restore when the caller opts in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    /// Population cap; negative means uncapped
    pub max_organisms: i64,
    /// Probability (0.0 to 1.0) driving random food drops
    pub food_drop_prob: f64,
    /// Probability (0.0 to 1.0) that a producer cell emits food in a tick
    pub food_prod_prob: f64,
    /// Lifespan in ticks per anatomy cell
    pub lifespan_multiplier: u64,
    /// Report `global_mutability` instead of the population average
    pub use_global_mutability: bool,
    /// Mutation chance (percent) used when the global mode is on
    pub global_mutability: f64,
    /// Relative weight of the "add cell" mutation
    pub add_prob: f64,
    /// Relative weight of the "change cell" mutation
    pub change_prob: f64,
    /// Relative weight of the "remove cell" mutation
    pub remove_prob: f64,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            max_organisms: -1,
            food_drop_prob: 0.0,
            food_prod_prob: 0.05,
            lifespan_multiplier: 100,
            use_global_mutability: false,
            global_mutability: 5.0,
            add_prob: 33.0,
            change_prob: 33.0,
            remove_prob: 33.0,
        }
    }
}

impl Hyperparams {
    /// Parse controls from JSON, filling missing fields with defaults
    pub fn load_json(json: &str) -> Result<Self> {
        let params: Hyperparams = serde_json::from_str(json)?;
        params.validate()?;
        debug!(?params, "Loaded controls");
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, prob) in [
            ("food_drop_prob", self.food_drop_prob),
            ("food_prod_prob", self.food_prod_prob),
        ] {
            if !(0.0..=1.0).contains(&prob) {
                return Err(Error::Validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, prob
                )));
            }
        }
        if self.global_mutability < 0.0 {
            return Err(Error::Validation(
                "global_mutability must not be negative".to_string(),
            ));
        }
        if self.add_prob < 0.0 || self.change_prob < 0.0 || self.remove_prob < 0.0 {
            return Err(Error::Validation(
                "mutation weights must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// World construction and control-policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Number of grid columns
    pub cols: i32,
    /// Number of grid rows
    pub rows: i32,
    /// Pixel size of one cell, carried for renderers
    pub cell_size: u32,
    /// Edge length of a spatial index bucket, in cells
    pub bucket_size: i32,
    /// Ticks between lineage data snapshots
    pub data_update_rate: u64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Skip rendering and discard dirty cells
    pub headless: bool,
    /// Whether walls are wiped by a reset
    pub clear_walls_on_reset: bool,
    /// Pause when the population dies out
    pub auto_pause: bool,
    /// Reset (and reseed) when the population dies out
    pub auto_reset: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cols: 200,
            rows: 120,
            cell_size: 5,
            bucket_size: 20,
            data_update_rate: 100,
            seed: 0,
            headless: true,
            clear_walls_on_reset: false,
            auto_pause: false,
            auto_reset: true,
        }
    }
}

/// Headless runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of ticks to run
    pub num_ticks: u64,
    /// Checkpoint directory
    pub checkpoint_dir: String,
    /// Ticks between checkpoints (0 disables them)
    pub checkpoint_every: u64,
    /// Number of checkpoints to keep on disk
    pub keep_checkpoints: usize,
    /// Ticks between population log lines
    pub log_every: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            num_ticks: 10_000,
            checkpoint_dir: "./data/checkpoints".to_string(),
            checkpoint_every: 0,
            keep_checkpoints: 5,
            log_every: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let params = Hyperparams::default();
        assert_eq!(params.max_organisms, -1);
        assert_eq!(params.food_drop_prob, 0.0);

        let world_config = WorldConfig::default();
        assert_eq!(world_config.bucket_size, 20);
        assert_eq!(world_config.data_update_rate, 100);

        let runner_config = RunnerConfig::default();
        assert_eq!(runner_config.num_ticks, 10_000);
    }

    #[test]
    fn test_load_json_fills_defaults() {
        let params = Hyperparams::load_json(r#"{"max_organisms": 50, "food_drop_prob": 0.5}"#).unwrap();
        assert_eq!(params.max_organisms, 50);
        assert_eq!(params.food_drop_prob, 0.5);
        assert_eq!(params.lifespan_multiplier, 100);
    }

    #[test]
    fn test_load_json_rejects_bad_probability() {
        let result = Hyperparams::load_json(r#"{"food_drop_prob": 1.5}"#);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_hyperparams_serialization() {
        let params = Hyperparams::default();
        let json = serde_json::to_string(&params).unwrap();
        let deserialized: Hyperparams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, deserialized);
    }
}
