// src/debug.rs

use crate::optical_flow::FlowField;
use crate::types::DisplayConfig;
use opencv::{
    core::{self, Mat},
    highgui, imgproc,
    prelude::*,
};
use tracing::warn;

/// Draw the flow onto a grayscale frame, one green arrow every `step` pixels.
pub fn draw_flow(gray: &Mat, flow: &FlowField, step: i32) -> opencv::Result<Mat> {
    let mut vis = Mat::default();
    imgproc::cvt_color_def(gray, &mut vis, imgproc::COLOR_GRAY2BGR)?;

    let shape = flow.shape();
    let (h, w) = (shape.height as i32, shape.width as i32);
    let green = core::Scalar::new(0.0, 255.0, 0.0, 0.0);

    let mut y = step / 2;
    while y < h {
        let mut x = step / 2;
        while x < w {
            let (fx, fy) = flow.at(y as usize, x as usize);
            let origin = core::Point::new(x, y);
            let tip = core::Point::new(
                (x as f32 + fx + 0.5) as i32,
                (y as f32 + fy + 0.5) as i32,
            );
            imgproc::line(&mut vis, origin, tip, green, 1, imgproc::LINE_8, 0)?;
            imgproc::circle(&mut vis, origin, 1, green, -1, imgproc::LINE_8, 0)?;
            x += step;
        }
        y += step;
    }

    Ok(vis)
}

/// Best-effort preview window. The first failure (e.g. no display on a
/// headless box) is logged and turns the window off for the rest of the run.
pub struct FlowDisplay {
    enabled: bool,
    step: i32,
    window: String,
    opened: bool,
}

impl FlowDisplay {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            enabled: config.enabled,
            step: config.arrow_step.max(1),
            window: config.window_name.clone(),
            opened: false,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&DisplayConfig::default())
    }

    pub fn show(&mut self, gray: &Mat, flow: &FlowField) {
        if !self.enabled {
            return;
        }

        let result = draw_flow(gray, flow, self.step).and_then(|vis| {
            highgui::imshow(&self.window, &vis)?;
            highgui::wait_key(1)?;
            Ok(())
        });

        match result {
            Ok(()) => self.opened = true,
            Err(e) => {
                warn!("Display unavailable ({}), continuing without preview", e);
                self.enabled = false;
            }
        }
    }
}

impl Drop for FlowDisplay {
    fn drop(&mut self) {
        if self.opened {
            let _ = highgui::destroy_all_windows();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlowShape;
    use opencv::core::{Scalar, CV_8UC1, CV_8UC3};

    #[test]
    fn test_draw_flow_returns_color_frame() {
        let gray = Mat::new_rows_cols_with_default(40, 48, CV_8UC1, Scalar::all(0.0)).unwrap();
        let shape = FlowShape::new(40, 48);
        let flow = FlowField::new(shape, vec![0.0; shape.element_count()]).unwrap();

        let vis = draw_flow(&gray, &flow, 16).unwrap();
        assert_eq!(vis.typ(), CV_8UC3);
        assert_eq!(vis.rows(), 40);
        assert_eq!(vis.cols(), 48);
        // arrow origin dot at (8, 8) is green
        let px = *vis.at_2d::<core::Vec3b>(8, 8).unwrap();
        assert_eq!((px[0], px[1], px[2]), (0, 255, 0));
    }

    #[test]
    fn test_disabled_display_is_noop() {
        let mut display = FlowDisplay::disabled();
        let gray = Mat::new_rows_cols_with_default(8, 8, CV_8UC1, Scalar::all(0.0)).unwrap();
        let shape = FlowShape::new(8, 8);
        display.show(&gray, &FlowField::new(shape, vec![0.0; shape.element_count()]).unwrap());
        assert!(!display.enabled);
        assert!(!display.opened);
    }
}
