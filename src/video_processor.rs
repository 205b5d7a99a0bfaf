// src/video_processor.rs

use crate::error::{PipelineError, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sequential source of raw BGR frames.
pub trait FrameSource {
    /// `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Mat>>;

    /// Frame count reported by the container, when it reports one.
    fn frame_count_hint(&self) -> Option<usize> {
        None
    }

    /// Percentage of the stream consumed so far, when the length is known.
    fn progress(&self) -> Option<f32> {
        None
    }

    /// Release the underlying handle. Must be safe to call more than once.
    fn release(&mut self) {}
}

pub struct VideoReader {
    cap: VideoCapture,
    path: PathBuf,
    total_frames: i32,
    current_frame: i32,
    width: i32,
    height: i32,
    released: bool,
}

impl VideoReader {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening video: {}", path.display());

        if !path.is_file() {
            return Err(PipelineError::Config(format!(
                "video file not found: {}",
                path.display()
            )));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::Config(format!("non UTF-8 path: {}", path.display())))?;

        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(PipelineError::Io(format!(
                "failed to open video {}",
                path.display()
            )));
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            cap,
            path: path.to_path_buf(),
            total_frames,
            current_frame: 0,
            width,
            height,
            released: false,
        })
    }

}

/// Frames the container promised but the decoder never delivered.
fn frames_short(read: i32, reported: i32) -> Option<i32> {
    (reported > 0 && read < reported).then_some(reported - read)
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        if self.released {
            return Ok(None);
        }

        let mut mat = Mat::default();
        let ok = VideoCaptureTrait::read(&mut self.cap, &mut mat).map_err(|e| {
            PipelineError::Io(format!(
                "decode failed after frame {} of {}: {}",
                self.current_frame,
                self.path.display(),
                e
            ))
        })?;

        if !ok || mat.empty() {
            match frames_short(self.current_frame, self.total_frames) {
                // container frame counts are estimates for some codecs
                Some(missing) => warn!(
                    "Decoding of {} stopped after {} of {} frames ({} missing)",
                    self.path.display(),
                    self.current_frame,
                    self.total_frames,
                    missing
                ),
                None => debug!("End of stream after {} frames", self.current_frame),
            }
            return Ok(None);
        }

        if mat.rows() != self.height || mat.cols() != self.width {
            debug!(
                "Frame {} is {}x{}, container reported {}x{}",
                self.current_frame,
                mat.cols(),
                mat.rows(),
                self.width,
                self.height
            );
        }

        self.current_frame += 1;
        Ok(Some(mat))
    }

    fn frame_count_hint(&self) -> Option<usize> {
        (self.total_frames > 0).then_some(self.total_frames as usize)
    }

    fn progress(&self) -> Option<f32> {
        (self.total_frames > 0)
            .then(|| self.current_frame as f32 / self.total_frames as f32 * 100.0)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.cap.release() {
            debug!("VideoCapture release failed: {}", e);
        }
        info!("Released video {}", self.path.display());
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        self.release();
    }
}
