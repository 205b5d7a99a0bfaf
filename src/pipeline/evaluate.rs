// src/pipeline/evaluate.rs
//
// Streams a video through a trained model. Flows are predicted in chunks;
// each transition yields one `Prediction` record, and the MSE is reported
// when ground truth is available.

use super::records::{JsonlWriter, Prediction};
use crate::debug::FlowDisplay;
use crate::error::{PipelineError, Result};
use crate::ground_truth::GroundTruth;
use crate::optical_flow::{FlowEstimator, FlowField};
use crate::preprocessing::FramePreprocessor;
use crate::training::{stack_flows, SpeedModel, SpeedRegressor};
use crate::video_processor::FrameSource;
use opencv::core::Mat;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub frames_read: u64,
    pub transitions: u64,
    pub labelled: u64,
    pub mse: Option<f32>,
    pub mean_prediction: Option<f32>,
    pub elapsed_secs: f64,
}

pub struct Evaluator<S: FrameSource> {
    source: S,
    model: SpeedModel,
    preprocessor: FramePreprocessor,
    estimator: FlowEstimator,
    ground_truth: Option<GroundTruth>,
    chunk_size: usize,
    predictions: Option<JsonlWriter>,
    display: FlowDisplay,

    pending: Vec<FlowField>,
    next_transition: usize,
    frames_read: u64,
    squared_error: f64,
    labelled: u64,
    prediction_sum: f64,
    warned_missing_labels: bool,
}

impl<S: FrameSource> Evaluator<S> {
    pub fn new(
        source: S,
        model: SpeedModel,
        preprocessor: FramePreprocessor,
        estimator: FlowEstimator,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            model,
            preprocessor,
            estimator,
            ground_truth: None,
            chunk_size: chunk_size.max(1),
            predictions: None,
            display: FlowDisplay::disabled(),
            pending: Vec::new(),
            next_transition: 0,
            frames_read: 0,
            squared_error: 0.0,
            labelled: 0,
            prediction_sum: 0.0,
            warned_missing_labels: false,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    pub fn with_predictions(mut self, writer: JsonlWriter) -> Self {
        self.predictions = Some(writer);
        self
    }

    pub fn with_display(mut self, display: FlowDisplay) -> Self {
        self.display = display;
        self
    }

    pub fn run(&mut self) -> Result<EvaluationSummary> {
        let started = Instant::now();
        let result = self.stream();
        self.source.release();
        result?;

        let transitions = self.next_transition as u64;
        let summary = EvaluationSummary {
            frames_read: self.frames_read,
            transitions,
            labelled: self.labelled,
            mse: (self.labelled > 0).then(|| (self.squared_error / self.labelled as f64) as f32),
            mean_prediction: (transitions > 0)
                .then(|| (self.prediction_sum / transitions as f64) as f32),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        Ok(summary)
    }

    fn stream(&mut self) -> Result<()> {
        let first = self.source.next_frame()?.ok_or(PipelineError::EmptyVideo)?;
        self.frames_read += 1;
        let mut previous: Mat = self.preprocessor.preprocess(&first)?;

        let expected = self.model.input_shape();
        info!(
            "Evaluating {} model (input {}, trained at lr {})",
            self.model.variant().as_str(),
            expected,
            self.model.learning_rate()
        );

        while let Some(frame) = self.source.next_frame()? {
            self.frames_read += 1;
            let gray = self.preprocessor.preprocess(&frame)?;
            let flow = self.estimator.estimate(&previous, &gray)?;
            if flow.shape() != expected {
                return Err(PipelineError::shape_mismatch(expected, flow.shape()));
            }

            self.display.show(&gray, &flow);
            self.pending.push(flow);
            previous = gray;

            if self.pending.len() >= self.chunk_size {
                self.predict_pending()?;
            }
        }

        self.predict_pending()?;
        info!(
            "End of video: {} frames, {} predictions",
            self.frames_read, self.next_transition
        );
        Ok(())
    }

    fn predict_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let flows = stack_flows(&self.pending, self.model.device())?;
        self.pending.clear();
        let speeds = self.model.predict(&flows)?;

        for predicted in speeds {
            let transition = self.next_transition;
            self.next_transition += 1;

            let actual = self.label(transition);
            if let Some(actual) = actual {
                let err = (predicted - actual) as f64;
                self.squared_error += err * err;
                self.labelled += 1;
            }
            self.prediction_sum += predicted as f64;
            debug!("Transition {}: predicted {:.3}", transition, predicted);

            if let Some(writer) = &mut self.predictions {
                writer.write(&Prediction {
                    transition,
                    predicted,
                    actual,
                })?;
            }
        }
        Ok(())
    }

    fn label(&mut self, transition: usize) -> Option<f32> {
        let ground_truth = self.ground_truth.as_ref()?;
        match ground_truth.label(transition) {
            Ok(label) => Some(label),
            Err(_) => {
                if !self.warned_missing_labels {
                    warn!(
                        "Ground truth ends at {} labels; later transitions are unscored",
                        ground_truth.len()
                    );
                    self.warned_missing_labels = true;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowConfig, FlowShape, ModelVariant, PreprocessingConfig};
    use candle_core::Device;
    use opencv::core::{Scalar, Vec3b, CV_8UC3};
    use opencv::prelude::*;
    use std::collections::VecDeque;

    struct MemorySource(VecDeque<Mat>);

    impl FrameSource for MemorySource {
        fn next_frame(&mut self) -> Result<Option<Mat>> {
            Ok(self.0.pop_front())
        }
    }

    fn striped_frames(count: usize, rows: i32, cols: i32) -> VecDeque<Mat> {
        (0..count as i32)
            .map(|i| {
                let mut mat =
                    Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0))
                        .unwrap();
                for y in 0..rows {
                    for x in 0..cols {
                        let v = ((((x - i).rem_euclid(cols)) / 4) % 2) * 160 + ((y / 6) % 2) * 60;
                        *mat.at_2d_mut::<Vec3b>(y, x).unwrap() = Vec3b::all(v as u8);
                    }
                }
                mat
            })
            .collect()
    }

    fn compact_model(shape: FlowShape) -> SpeedModel {
        SpeedModel::new(ModelVariant::Compact, shape, 0.001, &Device::Cpu).unwrap()
    }

    fn evaluator(frames: VecDeque<Mat>, shape: FlowShape, chunk: usize) -> Evaluator<MemorySource> {
        Evaluator::new(
            MemorySource(frames),
            compact_model(shape),
            FramePreprocessor::new(&PreprocessingConfig::default()),
            FlowEstimator::new(FlowConfig::default()),
            chunk,
        )
    }

    #[test]
    fn test_one_prediction_per_transition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");

        let mut eval = evaluator(striped_frames(5, 66, 32), FlowShape::new(16, 32), 3)
            .with_predictions(JsonlWriter::create(&path).unwrap());
        let summary = eval.run().unwrap();

        assert_eq!(summary.frames_read, 5);
        assert_eq!(summary.transitions, 4);
        assert!(summary.mse.is_none());
        assert!(summary.mean_prediction.unwrap().is_finite());

        let contents = std::fs::read_to_string(&path).unwrap();
        let transitions: Vec<u64> = contents
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["transition"]
                .as_u64()
                .unwrap())
            .collect();
        assert_eq!(transitions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_mse_against_ground_truth() {
        let mut eval = evaluator(striped_frames(4, 66, 32), FlowShape::new(16, 32), 10)
            .with_ground_truth(GroundTruth::new(vec![5.0, 6.0]));
        let summary = eval.run().unwrap();

        assert_eq!(summary.transitions, 3);
        // third transition has no label and is left out of the error
        assert_eq!(summary.labelled, 2);
        let mse = summary.mse.unwrap();
        assert!(mse.is_finite() && mse >= 0.0);
    }

    #[test]
    fn test_flow_shape_must_match_model() {
        let mut eval = evaluator(striped_frames(3, 66, 32), FlowShape::new(16, 40), 10);
        assert!(matches!(
            eval.run(),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_video() {
        let mut eval = evaluator(VecDeque::new(), FlowShape::new(16, 32), 10);
        assert!(matches!(eval.run(), Err(PipelineError::EmptyVideo)));
    }
}
