// src/pipeline/session.rs
//
// Wires the concrete components (video file, OpenCV flow, candle model)
// for the two run modes.

use super::evaluate::{EvaluationSummary, Evaluator};
use super::metrics::RunSummary;
use super::records::JsonlWriter;
use super::state_machine::{LoopSettings, TrainingInputs, TrainingLoop};
use crate::debug::FlowDisplay;
use crate::error::Result;
use crate::ground_truth::GroundTruth;
use crate::optical_flow::FlowEstimator;
use crate::preprocessing::FramePreprocessor;
use crate::training::{select_device, SpeedModel, SpeedModelBuilder};
use crate::types::Config;
use crate::video_processor::VideoReader;
use std::path::PathBuf;
use tracing::info;

/// Label file and video on disk, opened when the training loop enters Init.
pub struct FileInputs {
    ground_truth_path: PathBuf,
    video_path: PathBuf,
}

impl FileInputs {
    pub fn new(ground_truth_path: PathBuf, video_path: PathBuf) -> Self {
        Self {
            ground_truth_path,
            video_path,
        }
    }
}

impl TrainingInputs for FileInputs {
    type Source = VideoReader;

    fn load_ground_truth(&mut self) -> Result<GroundTruth> {
        GroundTruth::load(&self.ground_truth_path)
    }

    fn open_video(&mut self) -> Result<VideoReader> {
        VideoReader::open(&self.video_path)
    }
}

pub fn train(config: &Config) -> Result<RunSummary> {
    let builder = SpeedModelBuilder {
        variant: config.model.variant,
        learning_rate: config.model.learning_rate,
        device: select_device(config.model.device),
    };
    info!(
        "Model: {} (lr={}), output {}",
        config.model.variant.as_str(),
        config.model.learning_rate,
        config.model.output_path.display()
    );

    let mut training = TrainingLoop::new(
        LoopSettings::from_config(config),
        FileInputs::new(
            config.data.ground_truth_path.clone(),
            config.data.video_path.clone(),
        ),
        builder,
        FramePreprocessor::new(&config.preprocessing),
        FlowEstimator::new(config.flow),
    )
    .with_display(FlowDisplay::new(&config.display));

    if let Some(path) = &config.output.history_path {
        training = training.with_history(JsonlWriter::create(path)?);
    }

    training.run()
}

pub fn evaluate(config: &Config) -> Result<EvaluationSummary> {
    let eval = &config.evaluation;
    let device = select_device(config.model.device);
    let model = SpeedModel::load(&eval.model_path, &device)?;
    let video = VideoReader::open(&eval.video_path)?;

    let mut evaluator = Evaluator::new(
        video,
        model,
        FramePreprocessor::new(&config.preprocessing),
        FlowEstimator::new(config.flow),
        config.training.batch_size,
    )
    .with_display(FlowDisplay::new(&config.display));

    if let Some(path) = &eval.ground_truth_path {
        evaluator = evaluator.with_ground_truth(GroundTruth::load(path)?);
    }
    if let Some(path) = &eval.predictions_path {
        evaluator = evaluator.with_predictions(JsonlWriter::create(path)?);
    }

    evaluator.run()
}
