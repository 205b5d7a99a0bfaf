// src/pipeline/metrics.rs
//
// Counters and timings for one run, summarized in the final log lines.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    pub frames_read: u64,
    pub transitions: u64,
    pub batches_trained: u64,
    pub samples_trained: u64,
    pub samples_discarded: u64,
    pub flow_time: Duration,
    pub fit_time: Duration,
    pub last_loss: Option<f32>,
    pub started_at: Instant,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self {
            frames_read: 0,
            transitions: 0,
            batches_trained: 0,
            samples_trained: 0,
            samples_discarded: 0,
            flow_time: Duration::ZERO,
            fit_time: Duration::ZERO,
            last_loss: None,
            started_at: Instant::now(),
        }
    }

    pub fn fps(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            self.frames_read as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            frames_read: self.frames_read,
            transitions: self.transitions,
            batches_trained: self.batches_trained,
            samples_trained: self.samples_trained,
            samples_discarded: self.samples_discarded,
            final_loss: self.last_loss,
            avg_flow_ms: average_ms(self.flow_time, self.transitions),
            avg_fit_ms: average_ms(self.fit_time, self.batches_trained),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    pub transitions: u64,
    pub batches_trained: u64,
    pub samples_trained: u64,
    pub samples_discarded: u64,
    pub final_loss: Option<f32>,
    pub avg_flow_ms: f64,
    pub avg_fit_ms: f64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
