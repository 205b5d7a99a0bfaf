// src/pipeline/records.rs
//
// JSONL output: one training record per fit call, one prediction record
// per transition in evaluation mode.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub batch_index: u64,
    pub samples: usize,
    pub first_transition: usize,
    pub last_transition: usize,
    /// Trained from the leftover samples at end of video
    pub partial: bool,
    pub epoch_losses: Vec<f32>,
    pub fit_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub transition: usize,
    pub predicted: f32,
    pub actual: Option<f32>,
}

pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let file = File::create(path).map_err(|e| io_error(path, e))?;
        info!("💾 Records will be written to: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| PipelineError::Io(format!("cannot encode record: {}", e)))?;
        writeln!(self.writer, "{}", line).map_err(|e| io_error(&self.path, e))?;
        self.writer.flush().map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }

}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Io(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("history.jsonl");

        let mut writer = JsonlWriter::create(&path).unwrap();
        for i in 0..3 {
            writer
                .write(&Prediction {
                    transition: i,
                    predicted: 12.5,
                    actual: None,
                })
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["transition"], 0);
        assert_eq!(first["predicted"], 12.5);
        assert!(first["actual"].is_null());
    }
}
