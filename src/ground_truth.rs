// src/ground_truth.rs
//
// Speed labels, one per frame transition. Transition `i` is the flow
// between frame `i` and frame `i + 1`.

use crate::error::{PipelineError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    speeds: Vec<f32>,
}

impl GroundTruth {
    pub fn new(speeds: Vec<f32>) -> Self {
        Self { speeds }
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading speed ground truths from {}", path.display());

        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "cannot read ground truth {}: {}",
                path.display(),
                e
            ))
        })?;

        let truth = Self::parse(&contents)
            .map_err(|msg| PipelineError::Config(format!("{}: {}", path.display(), msg)))?;

        info!("Read {} values", truth.len());
        Ok(truth)
    }

    fn parse(contents: &str) -> std::result::Result<Self, String> {
        let mut speeds = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let value = line.trim();
            let speed = value
                .parse::<f32>()
                .map_err(|_| format!("line {} is not a number: {:?}", idx + 1, value))?;
            speeds.push(speed);
        }
        Ok(Self { speeds })
    }

    /// Label for a frame transition; running past the end is fatal.
    pub fn label(&self, transition: usize) -> Result<f32> {
        self.speeds
            .get(transition)
            .copied()
            .ok_or(PipelineError::IndexExhaustion {
                transition,
                available: self.speeds.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.speeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }
}
