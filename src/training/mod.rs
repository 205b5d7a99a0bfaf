// src/training/mod.rs
//
// Flow batches → speed regressor.
//
//   BatchAccumulator ──drain_as_tensors──▶ SpeedRegressor::fit ──▶ FitReport
//
// The main loop only talks to the `SpeedRegressor` / `ModelBuilder`
// traits, so it can be driven without a real network in tests.

pub mod batch;
pub mod model;
pub mod rng;

pub use batch::{stack_flows, BatchAccumulator};
pub use model::{SpeedModel, SpeedModelBuilder};

use crate::error::Result;
use crate::types::{DeviceKind, FlowShape, TrainingConfig};
use candle_core::{Device, Tensor};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl FitOptions {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            mini_batch_size: config.mini_batch_size,
            shuffle: config.shuffle,
            seed: config.seed,
        }
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self::from_config(&TrainingConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FitReport {
    pub samples: usize,
    pub epoch_losses: Vec<f32>,
}

impl FitReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

pub trait SpeedRegressor {
    /// Spatial shape every input batch must have
    fn input_shape(&self) -> FlowShape;

    fn device(&self) -> &Device;

    /// `flows` is `(N, H, W, 2)`, `labels` is `(N,)`.
    fn fit(&mut self, flows: &Tensor, labels: &Tensor, options: &FitOptions) -> Result<FitReport>;

    fn save(&self, path: &Path) -> Result<()>;
}

pub trait ModelBuilder {
    type Model: SpeedRegressor;

    fn build(&self, shape: FlowShape) -> Result<Self::Model>;
}

pub fn select_device(kind: DeviceKind) -> Device {
    match kind {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Cuda => match Device::cuda_if_available(0) {
            Ok(Device::Cpu) => {
                warn!("CUDA requested but unavailable, training on CPU");
                Device::Cpu
            }
            Ok(device) => {
                info!("Using device: {:?}", device);
                device
            }
            Err(e) => {
                warn!("CUDA initialization failed ({}), training on CPU", e);
                Device::Cpu
            }
        },
    }
}
