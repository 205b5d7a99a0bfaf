// src/error.rs
//
// Every failure in the pipeline is fatal. Display problems never reach
// this type; they are logged and swallowed in `debug::FlowDisplay`.

use crate::types::FlowShape;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or malformed input files, invalid settings
    #[error("configuration error: {0}")]
    Config(String),

    /// A flow field or batch does not match the shape the model was built for
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// More frame transitions than ground-truth labels
    #[error(
        "ground truth exhausted at transition {transition}: only {available} labels available"
    )]
    IndexExhaustion { transition: usize, available: usize },

    /// Video open or decode failure
    #[error("video I/O error: {0}")]
    Io(String),

    #[error("video yielded no frames")]
    EmptyVideo,

    #[error("frame height {height} too small, cropping needs more than {required} rows")]
    FrameTooSmall { height: i32, required: i32 },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Model save or load failure
    #[error("model persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Vision(#[from] opencv::Error),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl PipelineError {
    pub fn shape_mismatch(expected: FlowShape, actual: FlowShape) -> Self {
        PipelineError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
