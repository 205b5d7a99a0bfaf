// src/training/batch.rs
//
// Parallel (flow, label) buffers. Index i of `flows` always pairs with
// index i of `labels`.

use crate::error::{PipelineError, Result};
use crate::optical_flow::FlowField;
use crate::types::FlowShape;
use candle_core::{Device, Tensor};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub flows: Vec<FlowField>,
    pub labels: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Stack into `(N, H, W, 2)` flows and `(N,)` labels.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let flows = stack_flows(&self.flows, device)?;
        let labels = Tensor::from_vec(self.labels.clone(), self.len(), device)?;
        Ok((flows, labels))
    }
}

/// Stack equally-shaped flow fields into one `(N, H, W, 2)` tensor.
pub fn stack_flows(flows: &[FlowField], device: &Device) -> Result<Tensor> {
    let shape = match flows.first() {
        Some(flow) => flow.shape(),
        None => {
            return Err(PipelineError::Config(
                "cannot build tensors from an empty batch".into(),
            ))
        }
    };

    let mut data = Vec::with_capacity(flows.len() * shape.element_count());
    for flow in flows {
        if flow.shape() != shape {
            return Err(PipelineError::shape_mismatch(shape, flow.shape()));
        }
        data.extend_from_slice(flow.data());
    }

    Ok(Tensor::from_vec(
        data,
        (flows.len(), shape.height, shape.width, FlowShape::CHANNELS),
        device,
    )?)
}

#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    shape: Option<FlowShape>,
    batch: Batch,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            shape: None,
            batch: Batch {
                flows: Vec::with_capacity(capacity),
                labels: Vec::with_capacity(capacity),
            },
        }
    }

    /// Accumulator that only accepts flows of `shape`.
    pub fn with_shape(capacity: usize, shape: FlowShape) -> Self {
        let mut acc = Self::new(capacity);
        acc.shape = Some(shape);
        acc
    }

    pub fn push(&mut self, flow: FlowField, label: f32) -> Result<()> {
        match self.shape {
            Some(shape) if shape != flow.shape() => {
                return Err(PipelineError::shape_mismatch(shape, flow.shape()));
            }
            Some(_) => {}
            None => self.shape = Some(flow.shape()),
        }

        self.batch.flows.push(flow);
        self.batch.labels.push(label);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Take everything accumulated so far and start over empty.
    pub fn drain(&mut self) -> Batch {
        let next = Batch {
            flows: Vec::with_capacity(self.capacity),
            labels: Vec::with_capacity(self.capacity),
        };
        std::mem::replace(&mut self.batch, next)
    }

    pub fn drain_as_tensors(&mut self, device: &Device) -> Result<(Tensor, Tensor)> {
        let batch = self.drain();
        batch.to_tensors(device)
    }

    pub fn clear(&mut self) {
        self.batch.flows.clear();
        self.batch.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_filled(shape: FlowShape, value: f32) -> FlowField {
        FlowField::new(shape, vec![value; shape.element_count()]).unwrap()
    }

    #[test]
    fn test_fills_at_capacity() {
        let shape = FlowShape::new(2, 3);
        let mut acc = BatchAccumulator::new(3);

        acc.push(flow_filled(shape, 0.0), 1.0).unwrap();
        acc.push(flow_filled(shape, 0.0), 2.0).unwrap();
        assert!(!acc.is_full());
        acc.push(flow_filled(shape, 0.0), 3.0).unwrap();
        assert!(acc.is_full());
    }

    #[test]
    fn test_drain_preserves_pairing_and_resets() {
        let shape = FlowShape::new(2, 3);
        let mut acc = BatchAccumulator::new(200);
        for i in 0..5 {
            acc.push(flow_filled(shape, i as f32), 10.0 * i as f32).unwrap();
        }

        let batch = acc.drain();
        assert_eq!(batch.len(), 5);
        for (i, (flow, label)) in batch.flows.iter().zip(&batch.labels).enumerate() {
            assert_eq!(flow.data()[0], i as f32);
            assert_eq!(*label, 10.0 * i as f32);
        }

        assert!(acc.is_empty());
        assert!(!acc.is_full());
        assert_eq!(acc.len(), 0);
    }

    #[test]
    fn test_drain_as_tensors_shapes() {
        let shape = FlowShape::new(4, 5);
        let mut acc = BatchAccumulator::new(10);
        acc.push(flow_filled(shape, 1.0), 10.0).unwrap();
        acc.push(flow_filled(shape, 2.0), 20.0).unwrap();

        let (flows, labels) = acc.drain_as_tensors(&Device::Cpu).unwrap();
        assert_eq!(flows.dims(), &[2, 4, 5, 2]);
        assert_eq!(labels.to_vec1::<f32>().unwrap(), vec![10.0, 20.0]);

        let second = flows.get(1).unwrap().flatten_all().unwrap();
        assert!(second.to_vec1::<f32>().unwrap().iter().all(|v| *v == 2.0));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_shape_change_rejected() {
        let mut acc = BatchAccumulator::new(10);
        acc.push(flow_filled(FlowShape::new(4, 5), 0.0), 1.0).unwrap();
        let err = acc.push(flow_filled(FlowShape::new(5, 5), 0.0), 2.0);
        assert!(matches!(err, Err(PipelineError::ShapeMismatch { .. })));
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_bound_shape_checked_on_first_push() {
        let mut acc = BatchAccumulator::with_shape(10, FlowShape::new(4, 5));
        let err = acc.push(flow_filled(FlowShape::new(4, 6), 0.0), 1.0);
        assert!(matches!(err, Err(PipelineError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_empty_batch_has_no_tensors() {
        let mut acc = BatchAccumulator::new(10);
        assert!(acc.drain_as_tensors(&Device::Cpu).is_err());
    }
}
