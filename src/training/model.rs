// src/training/model.rs
//
// Convolutional speed regressor over (N, H, W, 2) flow tensors.
//
// Architecture (nvidia):
//   BatchNorm(2) → [Conv(12,5) → ReLU → MaxPool(2,2)]
//                → [Conv(24,5) → ReLU → MaxPool(2,2)]
//                → [Conv(36,3) → ReLU → MaxPool(2,2)]
//                → [Conv(48,3) → ReLU → MaxPool(2,2)]
//                → Flatten → 1164 → 100 → 50 → 10 → 1
//
// Architecture (compact):
//   [Conv(16,5) → ReLU → MaxPool] → [Conv(32,5) → ReLU → MaxPool] → 100 → 1
//
// Saved as one safetensors file: every variable of the VarMap plus a
// `meta.topology` u32 record [format, variant, height, width, channels]
// and `meta.learning_rate`.

use super::rng::ShuffleRng;
use super::{FitOptions, FitReport, ModelBuilder, SpeedRegressor};
use crate::error::{PipelineError, Result};
use crate::types::{FlowShape, ModelVariant};
use candle_core::{DType, Device, Tensor};
use candle_nn::{
    batch_norm, conv2d, linear, AdamW, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Linear,
    Module, ModuleT, Optimizer, ParamsAdamW, VarBuilder, VarMap,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const FORMAT_VERSION: u32 = 1;
const TOPOLOGY_KEY: &str = "meta.topology";
const LEARNING_RATE_KEY: &str = "meta.learning_rate";
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

struct Architecture {
    batch_norm: bool,
    /// (filters, kernel) per conv block; every block is followed by a 2x2/2 max-pool
    convs: &'static [(usize, usize)],
    dense: &'static [usize],
}

const NVIDIA: Architecture = Architecture {
    batch_norm: true,
    convs: &[(12, 5), (24, 5), (36, 3), (48, 3)],
    dense: &[1164, 100, 50, 10, 1],
};

const COMPACT: Architecture = Architecture {
    batch_norm: false,
    convs: &[(16, 5), (32, 5)],
    dense: &[100, 1],
};

fn architecture(variant: ModelVariant) -> &'static Architecture {
    match variant {
        ModelVariant::Nvidia => &NVIDIA,
        ModelVariant::Compact => &COMPACT,
    }
}

fn variant_code(variant: ModelVariant) -> u32 {
    match variant {
        ModelVariant::Nvidia => 0,
        ModelVariant::Compact => 1,
    }
}

fn variant_from_code(code: u32) -> Option<ModelVariant> {
    match code {
        0 => Some(ModelVariant::Nvidia),
        1 => Some(ModelVariant::Compact),
        _ => None,
    }
}

/// Spatial size left after the conv/pool stack, `None` when the input is too small.
fn feature_map_size(arch: &Architecture, shape: FlowShape) -> Option<(usize, usize)> {
    let (mut h, mut w) = (shape.height, shape.width);
    for &(_, kernel) in arch.convs {
        if h < kernel || w < kernel {
            return None;
        }
        h = (h - kernel + 1) / 2;
        w = (w - kernel + 1) / 2;
        if h == 0 || w == 0 {
            return None;
        }
    }
    Some((h, w))
}

/// Keras defaults: momentum 0.99 on the running stats, eps 1e-3.
fn batch_norm_config() -> BatchNormConfig {
    BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: true,
        momentum: 0.01,
    }
}

pub struct SpeedModel {
    variant: ModelVariant,
    input_shape: FlowShape,
    learning_rate: f64,
    var_map: VarMap,
    norm: Option<BatchNorm>,
    convs: Vec<Conv2d>,
    dense: Vec<Linear>,
    optimizer: AdamW,
    device: Device,
    fit_calls: u64,
}

impl std::fmt::Debug for SpeedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SpeedModel({}, input={}, {} params, device={:?})",
            self.variant.as_str(),
            self.input_shape,
            self.param_count(),
            self.device
        )
    }
}

impl SpeedModel {
    pub fn new(
        variant: ModelVariant,
        input_shape: FlowShape,
        learning_rate: f64,
        device: &Device,
    ) -> Result<Self> {
        let arch = architecture(variant);
        let (fh, fw) = feature_map_size(arch, input_shape).ok_or_else(|| {
            PipelineError::Config(format!(
                "flow {} is too small for the {} model",
                input_shape,
                variant.as_str()
            ))
        })?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let norm = if arch.batch_norm {
            Some(batch_norm(
                FlowShape::CHANNELS,
                batch_norm_config(),
                vb.pp("norm"),
            )?)
        } else {
            None
        };

        let mut convs = Vec::with_capacity(arch.convs.len());
        let mut in_channels = FlowShape::CHANNELS;
        for (i, &(filters, kernel)) in arch.convs.iter().enumerate() {
            convs.push(conv2d(
                in_channels,
                filters,
                kernel,
                Conv2dConfig::default(),
                vb.pp(format!("conv{}", i + 1)),
            )?);
            in_channels = filters;
        }

        let mut dense = Vec::with_capacity(arch.dense.len());
        let mut in_features = in_channels * fh * fw;
        for (i, &units) in arch.dense.iter().enumerate() {
            dense.push(linear(in_features, units, vb.pp(format!("dense{}", i + 1)))?);
            in_features = units;
        }

        // Adam: AdamW without weight decay
        let optimizer = AdamW::new(
            var_map.all_vars(),
            ParamsAdamW {
                lr: learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let model = Self {
            variant,
            input_shape,
            learning_rate,
            var_map,
            norm,
            convs,
            dense,
            optimizer,
            device: device.clone(),
            fit_calls: 0,
        };
        debug!("Built {:?}, flattened features {}", model, in_channels * fh * fw);
        Ok(model)
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn param_count(&self) -> usize {
        self.var_map
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        // NHWC -> NCHW
        let mut xs = xs.permute((0, 3, 1, 2))?.contiguous()?;
        if let Some(norm) = &self.norm {
            xs = norm.forward_t(&xs, train)?;
        }
        for conv in &self.convs {
            xs = conv.forward(&xs)?.relu()?.max_pool2d_with_stride(2, 2)?;
        }

        let mut xs = xs.flatten_from(1)?;
        let last = self.dense.len() - 1;
        for (i, layer) in self.dense.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = xs.relu()?;
            }
        }
        xs.squeeze(1)
    }

    fn check_input(&self, flows: &Tensor) -> Result<usize> {
        let expected = [
            self.input_shape.height,
            self.input_shape.width,
            FlowShape::CHANNELS,
        ];
        match flows.dims() {
            [n, h, w, c] if [*h, *w, *c] == expected => Ok(*n),
            dims => Err(PipelineError::ShapeMismatch {
                expected: format!("(N, {})", self.input_shape),
                actual: format!("{:?}", dims),
            }),
        }
    }

    /// Inference-mode forward pass, one speed per sample.
    pub fn predict(&self, flows: &Tensor) -> Result<Vec<f32>> {
        self.check_input(flows)?;
        let out = self.forward_t(flows, false)?;
        Ok(out.to_vec1::<f32>()?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let persist =
            |e: candle_core::Error| PipelineError::Persistence(format!("{}: {}", path.display(), e));

        let mut tensors: HashMap<String, Tensor> = {
            let vars = self.var_map.data().lock().map_err(|_| {
                PipelineError::Persistence("variable map lock poisoned".to_string())
            })?;
            vars.iter()
                .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
                .collect()
        };

        let topology = [
            FORMAT_VERSION,
            variant_code(self.variant),
            self.input_shape.height as u32,
            self.input_shape.width as u32,
            FlowShape::CHANNELS as u32,
        ];
        tensors.insert(
            TOPOLOGY_KEY.to_string(),
            Tensor::new(&topology, &Device::Cpu).map_err(persist)?,
        );
        tensors.insert(
            LEARNING_RATE_KEY.to_string(),
            Tensor::new(&[self.learning_rate], &Device::Cpu).map_err(persist)?,
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Persistence(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        candle_core::safetensors::save(&tensors, path).map_err(persist)?;
        info!("Saved {:?} to {}", self, path.display());
        Ok(())
    }

    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        let persist =
            |e: candle_core::Error| PipelineError::Persistence(format!("{}: {}", path.display(), e));

        if !path.is_file() {
            return Err(PipelineError::Persistence(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(persist)?;
        let topology = tensors
            .get(TOPOLOGY_KEY)
            .ok_or_else(|| {
                PipelineError::Persistence(format!("{}: missing {}", path.display(), TOPOLOGY_KEY))
            })?
            .to_vec1::<u32>()
            .map_err(persist)?;

        let (variant, shape) = match topology.as_slice() {
            [FORMAT_VERSION, code, h, w, 2] => {
                let variant = variant_from_code(*code).ok_or_else(|| {
                    PipelineError::Persistence(format!("unknown model variant code {}", code))
                })?;
                (variant, FlowShape::new(*h as usize, *w as usize))
            }
            other => {
                return Err(PipelineError::Persistence(format!(
                    "unsupported topology record {:?}",
                    other
                )))
            }
        };

        let learning_rate = match tensors.get(LEARNING_RATE_KEY) {
            Some(t) => t
                .to_vec1::<f64>()
                .map_err(persist)?
                .first()
                .copied()
                .unwrap_or(DEFAULT_LEARNING_RATE),
            None => DEFAULT_LEARNING_RATE,
        };

        let mut model = Self::new(variant, shape, learning_rate, device)?;
        model.var_map.load(path).map_err(persist)?;
        info!("Loaded {:?} from {}", model, path.display());
        Ok(model)
    }
}

impl SpeedRegressor for SpeedModel {
    fn input_shape(&self) -> FlowShape {
        self.input_shape
    }

    fn device(&self) -> &Device {
        &self.device
    }

    /// Shuffled mini-batch Adam updates on MSE. Each call continues from
    /// the current weights and optimizer moments.
    fn fit(&mut self, flows: &Tensor, labels: &Tensor, options: &FitOptions) -> Result<FitReport> {
        let n = self.check_input(flows)?;
        if labels.dims() != [n] {
            return Err(PipelineError::ShapeMismatch {
                expected: format!("({},) labels", n),
                actual: format!("{:?}", labels.dims()),
            });
        }
        if n == 0 {
            return Ok(FitReport::default());
        }

        let mut rng = ShuffleRng::new(options.seed.wrapping_add(self.fit_calls));
        self.fit_calls += 1;

        let mut order: Vec<u32> = (0..n as u32).collect();
        let mut epoch_losses = Vec::with_capacity(options.epochs);

        for epoch in 0..options.epochs {
            if options.shuffle {
                rng.shuffle(&mut order);
            }

            let mut weighted_loss = 0.0f64;
            for chunk in order.chunks(options.mini_batch_size.max(1)) {
                let idx = Tensor::from_slice(chunk, chunk.len(), &self.device)?;
                let xb = flows.index_select(&idx, 0)?;
                let yb = labels.index_select(&idx, 0)?;

                let pred = self.forward_t(&xb, true)?;
                let loss = candle_nn::loss::mse(&pred, &yb)?;
                self.optimizer.backward_step(&loss)?;

                weighted_loss += loss.to_vec0::<f32>()? as f64 * chunk.len() as f64;
            }

            let epoch_loss = (weighted_loss / n as f64) as f32;
            info!(
                "Epoch {}/{} - {} samples - loss: {:.4}",
                epoch + 1,
                options.epochs,
                n,
                epoch_loss
            );
            epoch_losses.push(epoch_loss);
        }

        Ok(FitReport {
            samples: n,
            epoch_losses,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        SpeedModel::save(self, path)
    }
}

/// Builds a [`SpeedModel`] once the first flow has fixed the input shape.
#[derive(Debug, Clone)]
pub struct SpeedModelBuilder {
    pub variant: ModelVariant,
    pub learning_rate: f64,
    pub device: Device,
}

impl ModelBuilder for SpeedModelBuilder {
    type Model = SpeedModel;

    fn build(&self, shape: FlowShape) -> Result<SpeedModel> {
        let model = SpeedModel::new(self.variant, shape, self.learning_rate, &self.device)?;
        info!("✓ Model ready: {:?}", model);
        Ok(model)
    }
}
