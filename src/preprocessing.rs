// src/preprocessing.rs

use crate::error::{PipelineError, Result};
use crate::types::PreprocessingConfig;
use opencv::{
    core::{Mat, Rect},
    imgproc,
    prelude::*,
};

/// Raw BGR frame -> cropped, contrast-normalized grayscale frame
#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    crop_top: i32,
    crop_bottom: i32,
    equalize: bool,
}

impl FramePreprocessor {
    pub fn new(config: &PreprocessingConfig) -> Self {
        Self {
            crop_top: config.crop_top,
            crop_bottom: config.crop_bottom,
            equalize: config.equalize_histogram,
        }
    }

    pub fn preprocess(&self, frame: &Mat) -> Result<Mat> {
        let gray = to_grayscale(frame)?;
        let cropped = cut_top_and_bottom(&gray, self.crop_top, self.crop_bottom)?;
        if self.equalize {
            equalize_histogram(&cropped)
        } else {
            Ok(cropped)
        }
    }
}

pub fn to_grayscale(frame: &Mat) -> Result<Mat> {
    if frame.empty() {
        return Err(PipelineError::InvalidFrame("empty frame".into()));
    }

    let code = match frame.channels() {
        1 => return Ok(frame.try_clone()?),
        3 => imgproc::COLOR_BGR2GRAY,
        4 => imgproc::COLOR_BGRA2GRAY,
        n => {
            return Err(PipelineError::InvalidFrame(format!(
                "unsupported channel count {}",
                n
            )))
        }
    };

    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, code)?;
    Ok(gray)
}

/// Drop the sky rows and the dashboard rows, keeping full width.
pub fn cut_top_and_bottom(frame: &Mat, top: i32, bottom: i32) -> Result<Mat> {
    let height = frame.rows();
    let margin = top + bottom;
    if height <= margin {
        return Err(PipelineError::FrameTooSmall {
            height,
            required: margin,
        });
    }

    let region = Rect::new(0, top, frame.cols(), height - margin);
    let cropped = Mat::roi(frame, region)?.try_clone()?;
    Ok(cropped)
}

pub fn equalize_histogram(gray: &Mat) -> Result<Mat> {
    if gray.typ() != opencv::core::CV_8UC1 {
        return Err(PipelineError::InvalidFrame(
            "histogram equalization needs a single-channel 8-bit image".into(),
        ));
    }

    let mut equalized = Mat::default();
    imgproc::equalize_hist(gray, &mut equalized)?;
    Ok(equalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC1, CV_8UC3};

    fn solid(rows: i32, cols: i32, typ: i32, value: f64) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, typ, Scalar::all(value)).unwrap()
    }

    #[test]
    fn test_cut_removes_fifty_rows() {
        let frame = solid(480, 640, CV_8UC1, 90.0);
        let cropped = cut_top_and_bottom(&frame, 20, 30).unwrap();
        assert_eq!(cropped.rows(), 430);
        assert_eq!(cropped.cols(), 640);
    }

    #[test]
    fn test_cut_keeps_middle_rows() {
        let mut frame = solid(60, 4, CV_8UC1, 0.0);
        for y in 0..60 {
            for x in 0..4 {
                *frame.at_2d_mut::<u8>(y, x).unwrap() = y as u8;
            }
        }

        let cropped = cut_top_and_bottom(&frame, 20, 30).unwrap();
        assert_eq!(cropped.rows(), 10);
        assert_eq!(*cropped.at_2d::<u8>(0, 0).unwrap(), 20);
        assert_eq!(*cropped.at_2d::<u8>(9, 3).unwrap(), 29);
    }

    #[test]
    fn test_cut_rejects_short_frames() {
        let frame = solid(50, 64, CV_8UC1, 0.0);
        assert!(matches!(
            cut_top_and_bottom(&frame, 20, 30),
            Err(PipelineError::FrameTooSmall {
                height: 50,
                required: 50
            })
        ));
    }

    #[test]
    fn test_grayscale_from_bgr() {
        let frame = solid(10, 12, CV_8UC3, 100.0);
        let gray = to_grayscale(&frame).unwrap();
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.rows(), 10);
        assert_eq!(gray.cols(), 12);
        assert_eq!(*gray.at_2d::<u8>(5, 5).unwrap(), 100);
    }

    #[test]
    fn test_equalize_rejects_color() {
        let frame = solid(10, 12, CV_8UC3, 100.0);
        assert!(matches!(
            equalize_histogram(&frame),
            Err(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_equalize_stretches_contrast() {
        let mut frame = solid(20, 20, CV_8UC1, 100.0);
        for y in 10..20 {
            for x in 0..20 {
                *frame.at_2d_mut::<u8>(y, x).unwrap() = 110;
            }
        }

        let eq = equalize_histogram(&frame).unwrap();
        let dark = *eq.at_2d::<u8>(0, 0).unwrap() as i32;
        let bright = *eq.at_2d::<u8>(19, 19).unwrap() as i32;
        assert!(bright - dark > 10, "dark={} bright={}", dark, bright);
    }

    #[test]
    fn test_preprocess_pipeline_shape() {
        let pre = FramePreprocessor::new(&PreprocessingConfig::default());
        let frame = solid(100, 80, CV_8UC3, 40.0);
        let out = pre.preprocess(&frame).unwrap();
        assert_eq!(out.rows(), 50);
        assert_eq!(out.cols(), 80);
        assert_eq!(out.typ(), CV_8UC1);
    }
}
