// src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub data: DataConfig,
    pub preprocessing: PreprocessingConfig,
    pub flow: FlowConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub display: DisplayConfig,
    pub output: OutputConfig,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    Evaluate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub ground_truth_path: PathBuf,
    pub video_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            ground_truth_path: PathBuf::from("./sourceData/train.txt"),
            video_path: PathBuf::from("./sourceData/train.mp4"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Rows removed from the top of the frame (sky)
    pub crop_top: i32,
    /// Rows removed from the bottom of the frame (dashboard)
    pub crop_bottom: i32,
    pub equalize_histogram: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            crop_top: 20,
            crop_bottom: 30,
            equalize_histogram: true,
        }
    }
}

/// Farneback parameters, named after the OpenCV arguments they feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub pyr_scale: f64,
    pub levels: i32,
    pub winsize: i32,
    pub iterations: i32,
    pub poly_n: i32,
    pub poly_sigma: f64,
    pub flags: i32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 5,
            winsize: 20,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Batch-norm + 4 conv blocks + 5 dense layers
    #[default]
    Nvidia,
    /// Two conv blocks + 2 dense layers, for quick experiments
    Compact,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Nvidia => "nvidia",
            ModelVariant::Compact => "compact",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    pub output_path: PathBuf,
    pub learning_rate: f64,
    pub device: DeviceKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::Nvidia,
            output_path: PathBuf::from("speed_model.safetensors"),
            learning_rate: 0.001,
            device: DeviceKind::Cpu,
        }
    }
}

/// What happens to samples still buffered when the video ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushPolicy {
    #[default]
    Train,
    Discard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub flush_policy: FlushPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            epochs: 5,
            mini_batch_size: 20,
            shuffle: true,
            seed: 42,
            flush_policy: FlushPolicy::Train,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub arrow_step: i32,
    pub window_name: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            arrow_step: 16,
            window_name: "frame".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JSONL file receiving one record per fit call
    pub history_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub model_path: PathBuf,
    pub video_path: PathBuf,
    pub ground_truth_path: Option<PathBuf>,
    pub predictions_path: Option<PathBuf>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("speed_model.safetensors"),
            video_path: PathBuf::from("./sourceData/test.mp4"),
            ground_truth_path: None,
            predictions_path: Some(PathBuf::from("predictions.jsonl")),
        }
    }
}

/// Spatial shape of a flow field; the channel count is always 2 (dx, dy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowShape {
    pub height: usize,
    pub width: usize,
}

impl FlowShape {
    pub const CHANNELS: usize = 2;

    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn element_count(&self) -> usize {
        self.height * self.width * Self::CHANNELS
    }
}

impl fmt::Display for FlowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, Self::CHANNELS)
    }
}
