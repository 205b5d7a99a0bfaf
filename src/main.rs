// src/main.rs

mod config;
mod debug;
mod error;
mod ground_truth;
mod optical_flow;
mod pipeline;
mod preprocessing;
mod training;
mod types;
mod video_processor;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};
use types::{Config, Mode};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashcam_speed=info,candle=warn".into()),
        )
        .init();

    info!("🚗 Dashcam Speed Estimation Starting");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!("✓ Configuration loaded ({:?} mode)", config.mode);

    info!(
        "Flow parameters: pyr_scale={}, levels={}, winsize={}, iterations={}, poly_n={}, poly_sigma={}",
        config.flow.pyr_scale,
        config.flow.levels,
        config.flow.winsize,
        config.flow.iterations,
        config.flow.poly_n,
        config.flow.poly_sigma
    );

    match config.mode {
        Mode::Train => {
            let stats = pipeline::train(&config).context("training run failed")?;

            info!("\n📊 Training Report:");
            info!("  Frames read: {}", stats.frames_read);
            info!("  Transitions: {}", stats.transitions);
            info!(
                "  Batches trained: {} ({} samples)",
                stats.batches_trained, stats.samples_trained
            );
            if stats.samples_discarded > 0 {
                warn!("  Samples discarded at end of video: {}", stats.samples_discarded);
            }
            if let Some(loss) = stats.final_loss {
                info!("  Final loss: {:.4}", loss);
            }
            info!("  Avg flow time: {:.1} ms", stats.avg_flow_ms);
            info!("  Avg fit time: {:.1} ms", stats.avg_fit_ms);
            info!(
                "  Processing Speed: {:.1} FPS ({:.1}s total)",
                stats.fps, stats.elapsed_secs
            );
            info!("✓ Model written to {}", config.model.output_path.display());
        }
        Mode::Evaluate => {
            let stats = pipeline::evaluate(&config).context("evaluation run failed")?;

            info!("\n📊 Evaluation Report:");
            info!("  Frames read: {}", stats.frames_read);
            info!("  Predictions: {}", stats.transitions);
            if let Some(mean) = stats.mean_prediction {
                info!("  Mean predicted speed: {:.3}", mean);
            }
            match stats.mse {
                Some(mse) => info!("  MSE over {} labelled transitions: {:.4}", stats.labelled, mse),
                None => info!("  No ground truth, MSE not computed"),
            }
            info!("  Elapsed: {:.1}s", stats.elapsed_secs);
        }
    }

    Ok(())
}
