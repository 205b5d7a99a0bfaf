// src/pipeline/state_machine.rs
//
// Training run as an explicit state machine:
//
//   Init → ReadingFirstFrame → Streaming ⟲ → Flushing → Done
//     └────────────┴──────────────┴────────────┴──→ Failed
//
// Init acquires the labels and the video through `TrainingInputs`, so a
// missing file fails the machine like any later error. Transition `i` pairs
// the flow between frame i and frame i+1 with ground-truth label i. The video
// source is released on Done and on Failed.

use super::metrics::{RunSummary, TrainingMetrics};
use super::records::{BatchRecord, JsonlWriter};
use crate::debug::FlowDisplay;
use crate::error::{PipelineError, Result};
use crate::ground_truth::GroundTruth;
use crate::optical_flow::FlowEstimator;
use crate::preprocessing::FramePreprocessor;
use crate::training::{BatchAccumulator, FitOptions, ModelBuilder, SpeedRegressor};
use crate::types::{Config, FlushPolicy};
use crate::video_processor::FrameSource;
use opencv::core::Mat;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a training run gets its labels and frames. Each method is called
/// once, from Init.
pub trait TrainingInputs {
    type Source: FrameSource;

    fn load_ground_truth(&mut self) -> Result<GroundTruth>;

    fn open_video(&mut self) -> Result<Self::Source>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    ReadingFirstFrame,
    Streaming,
    Flushing,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub batch_size: usize,
    pub fit: FitOptions,
    pub flush_policy: FlushPolicy,
    pub model_path: PathBuf,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.training.batch_size,
            fit: FitOptions::from_config(&config.training),
            flush_policy: config.training.flush_policy,
            model_path: config.model.output_path.clone(),
        }
    }
}

pub struct TrainingLoop<I: TrainingInputs, B: ModelBuilder> {
    state: LoopState,
    settings: LoopSettings,
    inputs: I,
    ground_truth: GroundTruth,
    source: Option<I::Source>,
    builder: B,
    preprocessor: FramePreprocessor,
    estimator: FlowEstimator,
    display: FlowDisplay,
    history: Option<JsonlWriter>,
    model: Option<B::Model>,
    batch: BatchAccumulator,
    previous: Option<Mat>,
    transition: usize,
    batch_start: usize,
    metrics: TrainingMetrics,
}

impl<I: TrainingInputs, B: ModelBuilder> TrainingLoop<I, B> {
    pub fn new(
        settings: LoopSettings,
        inputs: I,
        builder: B,
        preprocessor: FramePreprocessor,
        estimator: FlowEstimator,
    ) -> Self {
        let batch = BatchAccumulator::new(settings.batch_size);
        Self {
            state: LoopState::Init,
            settings,
            inputs,
            ground_truth: GroundTruth::new(Vec::new()),
            source: None,
            builder,
            preprocessor,
            estimator,
            display: FlowDisplay::disabled(),
            history: None,
            model: None,
            batch,
            previous: None,
            transition: 0,
            batch_start: 0,
            metrics: TrainingMetrics::new(),
        }
    }

    pub fn with_display(mut self, display: FlowDisplay) -> Self {
        self.display = display;
        self
    }

    pub fn with_history(mut self, history: JsonlWriter) -> Self {
        self.history = Some(history);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn transitions(&self) -> usize {
        self.transition
    }

    pub fn model(&self) -> Option<&B::Model> {
        self.model.as_ref()
    }

    /// Drive the machine until Done or Failed.
    pub fn run(&mut self) -> Result<RunSummary> {
        loop {
            match self.state {
                LoopState::Done => {
                    self.release_source();
                    return Ok(self.metrics.summary());
                }
                LoopState::Failed => {
                    return Err(PipelineError::Config(
                        "training loop has already failed".into(),
                    ))
                }
                _ => {}
            }

            match self.step() {
                Ok(next) => {
                    if next != self.state {
                        debug!("{:?} → {:?}", self.state, next);
                    }
                    self.state = next;
                }
                Err(e) => {
                    error!("Training failed in {:?}: {}", self.state, e);
                    self.state = LoopState::Failed;
                    self.release_source();
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> Result<LoopState> {
        match self.state {
            LoopState::Init => self.init(),
            LoopState::ReadingFirstFrame => self.read_first_frame(),
            LoopState::Streaming => self.stream_next(),
            LoopState::Flushing => self.flush(),
            LoopState::Done | LoopState::Failed => Ok(self.state),
        }
    }

    fn release_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.release();
        }
    }

    fn source_mut(&mut self) -> Result<&mut I::Source> {
        self.source
            .as_mut()
            .ok_or_else(|| PipelineError::Config("video read before Init opened it".into()))
    }

    fn init(&mut self) -> Result<LoopState> {
        let ground_truth = self.inputs.load_ground_truth()?;
        if ground_truth.is_empty() {
            warn!("Ground truth has no labels; the first transition will fail");
        }
        let source = self.inputs.open_video()?;

        info!(
            "Training setup: batch={}, epochs={}, mini_batch={}, flush={:?}",
            self.settings.batch_size,
            self.settings.fit.epochs,
            self.settings.fit.mini_batch_size,
            self.settings.flush_policy
        );

        if let Some(frames) = source.frame_count_hint() {
            let transitions = frames.saturating_sub(1);
            if ground_truth.len() < transitions {
                warn!(
                    "Only {} labels for ~{} transitions; the run will stop at transition {}",
                    ground_truth.len(),
                    transitions,
                    ground_truth.len()
                );
            }
        }

        self.ground_truth = ground_truth;
        self.source = Some(source);
        Ok(LoopState::ReadingFirstFrame)
    }

    fn read_first_frame(&mut self) -> Result<LoopState> {
        let frame = self
            .source_mut()?
            .next_frame()?
            .ok_or(PipelineError::EmptyVideo)?;
        self.metrics.frames_read += 1;

        let gray = self.preprocessor.preprocess(&frame)?;

        // Self-flow only to learn the flow tensor shape
        let probe = self.estimator.estimate(&gray, &gray)?;
        let shape = probe.shape();
        info!("Flow shape: {}", shape);

        let model = self.builder.build(shape)?;
        if model.input_shape() != shape {
            return Err(PipelineError::shape_mismatch(shape, model.input_shape()));
        }

        self.batch = BatchAccumulator::with_shape(self.settings.batch_size, shape);
        self.model = Some(model);
        self.previous = Some(gray);
        Ok(LoopState::Streaming)
    }

    fn stream_next(&mut self) -> Result<LoopState> {
        let frame = match self.source_mut()?.next_frame()? {
            Some(frame) => frame,
            None => {
                info!(
                    "End of video: {} frames, {} transitions",
                    self.metrics.frames_read, self.transition
                );
                return Ok(LoopState::Flushing);
            }
        };
        self.metrics.frames_read += 1;

        let gray = self.preprocessor.preprocess(&frame)?;
        let previous = self
            .previous
            .as_ref()
            .ok_or_else(|| PipelineError::Config("streaming without a previous frame".into()))?;

        let started = Instant::now();
        let flow = self.estimator.estimate(previous, &gray)?;
        self.metrics.flow_time += started.elapsed();

        let label = self.ground_truth.label(self.transition)?;
        let progress = self.source.as_ref().and_then(|s| s.progress());
        debug!(
            "Transition {}: label {:.3}, mean flow {:.3}px [{:.1}%]",
            self.transition,
            label,
            flow.mean_magnitude(),
            progress.unwrap_or(0.0)
        );
        self.display.show(&gray, &flow);

        self.batch.push(flow, label)?;
        self.previous = Some(gray);
        self.transition += 1;
        self.metrics.transitions += 1;

        if self.batch.is_full() {
            self.train_batch(false)?;
        }
        Ok(LoopState::Streaming)
    }

    fn flush(&mut self) -> Result<LoopState> {
        if !self.batch.is_empty() {
            let leftover = self.batch.len();
            match self.settings.flush_policy {
                FlushPolicy::Train => {
                    info!("Training final partial batch of {} samples", leftover);
                    self.train_batch(true)?;
                }
                FlushPolicy::Discard => {
                    warn!("Discarding {} samples of the final partial batch", leftover);
                    self.batch.clear();
                    self.metrics.samples_discarded += leftover as u64;
                    self.batch_start = self.transition;
                }
            }
        }

        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::Config("no model to persist".into()))?;
        model.save(&self.settings.model_path)?;
        info!("✓ Model saved to {}", self.settings.model_path.display());

        Ok(LoopState::Done)
    }

    fn train_batch(&mut self, partial: bool) -> Result<()> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| PipelineError::Config("batch ready before the model".into()))?;

        let samples = self.batch.len();
        let first_transition = self.batch_start;
        let last_transition = self.transition.saturating_sub(1);
        let batch_index = self.metrics.batches_trained + 1;

        info!(
            "Training batch {} ({} samples, transitions {}..={})",
            batch_index, samples, first_transition, last_transition
        );

        let (flows, labels) = self.batch.drain_as_tensors(model.device())?;
        let started = Instant::now();
        let report = model.fit(&flows, &labels, &self.settings.fit)?;
        let elapsed = started.elapsed();

        self.batch_start = self.transition;
        self.metrics.batches_trained += 1;
        self.metrics.samples_trained += samples as u64;
        self.metrics.fit_time += elapsed;
        if let Some(loss) = report.final_loss() {
            self.metrics.last_loss = Some(loss);
        }

        if let Some(history) = &mut self.history {
            history.write(&BatchRecord {
                batch_index,
                samples,
                first_transition,
                last_transition,
                partial,
                epoch_losses: report.epoch_losses,
                fit_ms: elapsed.as_millis() as u64,
            })?;
        }
        Ok(())
    }
}
