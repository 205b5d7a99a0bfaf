// src/config.rs

use crate::error::{PipelineError, Result};
use crate::types::Config;
use std::fs;
use std::path::Path;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
            PipelineError::Config(format!("invalid YAML in {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Missing `config.yaml` falls back to defaults; any other missing path is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path == Path::new(DEFAULT_CONFIG_PATH) && !path.exists() {
            info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            return Ok(Config::default());
        }
        Config::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        let training = &self.training;
        if training.batch_size == 0 {
            return Err(PipelineError::Config("training.batch_size must be > 0".into()));
        }
        if training.epochs == 0 {
            return Err(PipelineError::Config("training.epochs must be > 0".into()));
        }
        if training.mini_batch_size == 0 {
            return Err(PipelineError::Config(
                "training.mini_batch_size must be > 0".into(),
            ));
        }
        let lr = self.model.learning_rate;
        if lr.is_nan() || lr <= 0.0 {
            return Err(PipelineError::Config(format!(
                "model.learning_rate must be positive, got {}",
                lr
            )));
        }
        let pre = &self.preprocessing;
        if pre.crop_top < 0 || pre.crop_bottom < 0 {
            return Err(PipelineError::Config(
                "preprocessing crop margins must be non-negative".into(),
            ));
        }
        if self.display.arrow_step <= 0 {
            return Err(PipelineError::Config("display.arrow_step must be > 0".into()));
        }
        Ok(())
    }
}
