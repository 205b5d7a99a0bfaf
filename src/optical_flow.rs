// src/optical_flow.rs
//
// Dense Farneback optical flow between consecutive preprocessed frames.
// OpenCV returns a CV_32FC2 Mat; we copy it out into a flat row-major
// buffer so the rest of the pipeline never touches Mat memory.

use crate::error::{PipelineError, Result};
use crate::types::{FlowConfig, FlowShape};
use opencv::{
    core::{Mat, Vec2f},
    prelude::*,
    video,
};

/// Per-pixel (dx, dy) displacement, row-major, interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    shape: FlowShape,
    data: Vec<f32>,
}

impl FlowField {
    pub fn new(shape: FlowShape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.element_count() {
            return Err(PipelineError::ShapeMismatch {
                expected: format!("{} values for {}", shape.element_count(), shape),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FlowShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// (dx, dy) at row `y`, column `x`
    pub fn at(&self, y: usize, x: usize) -> (f32, f32) {
        let idx = (y * self.shape.width + x) * FlowShape::CHANNELS;
        (self.data[idx], self.data[idx + 1])
    }

    pub fn mean_magnitude(&self) -> f32 {
        let pixels = self.shape.height * self.shape.width;
        if pixels == 0 {
            return 0.0;
        }
        let total: f32 = self
            .data
            .chunks_exact(2)
            .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
            .sum();
        total / pixels as f32
    }
}

#[derive(Debug, Clone)]
pub struct FlowEstimator {
    params: FlowConfig,
}

impl FlowEstimator {
    pub fn new(params: FlowConfig) -> Self {
        Self { params }
    }

    pub fn estimate(&self, prev: &Mat, next: &Mat) -> Result<FlowField> {
        if prev.rows() != next.rows() || prev.cols() != next.cols() {
            return Err(PipelineError::ShapeMismatch {
                expected: format!("{}x{} frame", prev.rows(), prev.cols()),
                actual: format!("{}x{} frame", next.rows(), next.cols()),
            });
        }

        let p = &self.params;
        let mut flow = Mat::default();
        video::calc_optical_flow_farneback(
            prev,
            next,
            &mut flow,
            p.pyr_scale,
            p.levels,
            p.winsize,
            p.iterations,
            p.poly_n,
            p.poly_sigma,
            p.flags,
        )?;

        mat_to_flow(&flow)
    }
}

fn mat_to_flow(flow: &Mat) -> Result<FlowField> {
    let owned;
    let flow = if flow.is_continuous() {
        flow
    } else {
        owned = flow.try_clone()?;
        &owned
    };

    let shape = FlowShape::new(flow.rows() as usize, flow.cols() as usize);
    let vectors = flow.data_typed::<Vec2f>()?;

    let mut data = Vec::with_capacity(shape.element_count());
    for v in vectors {
        data.push(v[0]);
        data.push(v[1]);
    }

    FlowField::new(shape, data)
}
