// Motion detection
// Background-model differencing: gray -> blur -> |bg - cur| -> threshold -> open/close -> outer contours

pub mod ops;

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::constants::{BACKGROUND_LEARNING_RATE, MOTION_BLUR_KERNEL};
use crate::frame::{Frame, Rect};

/// Per-cycle motion parameters, taken from the config snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSettings {
    pub diff_threshold: u8,
    pub min_area: u32,
    pub region_of_interest: Option<Rect>,
}

impl From<&DetectionConfig> for MotionSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            diff_threshold: config.motion_threshold,
            min_area: config.min_motion_area,
            region_of_interest: config.region_of_interest,
        }
    }
}

/// Outcome of one `detect` call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionReport {
    pub has_motion: bool,
    /// Bounding box of the largest surviving contour, in full-frame coordinates.
    pub region: Option<Rect>,
    pub largest_area: u32,
    pub valid_contours: usize,
}

/// Running background image plus the geometry it was built for.
struct Background {
    width: u32,
    height: u32,
    window: Rect,
    pixels: Vec<f32>,
}

/// Stateful background-model motion detector.
///
/// The first frame after construction or `reset()` seeds the model and never
/// reports motion. The model keeps learning on every later frame, including
/// frames with motion, so a foreground object that stops moving is slowly
/// absorbed into the background.
#[derive(Default)]
pub struct MotionDetector {
    background: Option<Background>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self { background: None }
    }

    /// Drop the background model; the next frame re-seeds it.
    pub fn reset(&mut self) {
        self.background = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.background.is_some()
    }

    pub fn detect(&mut self, frame: &Frame, settings: &MotionSettings) -> MotionReport {
        if frame.is_empty() {
            log::debug!("MotionDetector: received empty frame");
            return MotionReport::default();
        }

        let window = detection_window(frame, settings.region_of_interest);
        let cropped;
        let source = if window == Rect::new(0, 0, frame.width(), frame.height()) {
            frame.image()
        } else {
            cropped = image::imageops::crop_imm(
                frame.image(),
                window.x,
                window.y,
                window.width,
                window.height,
            )
            .to_image();
            &cropped
        };

        let gray = ops::gaussian_blur(&ops::to_gray(source), MOTION_BLUR_KERNEL);

        // Seed (or re-seed after a geometry change) and report no motion
        let matches_model = self.background.as_ref().map(|bg| {
            bg.width == frame.width() && bg.height == frame.height() && bg.window == window
        });
        if matches_model != Some(true) {
            if matches_model.is_some() {
                log::debug!("MotionDetector: frame geometry changed, re-seeding background");
            }
            self.background = Some(Background {
                width: frame.width(),
                height: frame.height(),
                window,
                pixels: gray.as_raw().iter().map(|p| *p as f32).collect(),
            });
            log::debug!("MotionDetector: background model initialized");
            return MotionReport::default();
        }
        let Some(background) = self.background.as_mut() else {
            return MotionReport::default();
        };

        let mask = ops::diff_mask(&background.pixels, &gray, settings.diff_threshold);
        let mask = ops::close(&ops::open(&mask));
        let regions = ops::external_regions(&mask);

        let mut report = MotionReport::default();
        for region in regions.iter().filter(|r| r.area >= settings.min_area) {
            report.valid_contours += 1;
            // Strictly greater keeps the first region on ties
            if region.area > report.largest_area {
                report.largest_area = region.area;
                report.region = Some(region.bounds.offset_by(&window));
                report.has_motion = true;
            }
        }

        if report.has_motion {
            log::debug!(
                "MotionDetector: motion detected, area {} ({} valid contours, {} changed px) at {:?}",
                report.largest_area,
                report.valid_contours,
                mask.count(),
                report.region
            );
        }

        ops::accumulate(&mut background.pixels, &gray, BACKGROUND_LEARNING_RATE);

        report
    }
}

/// Region of the frame to analyse: the ROI clipped to the frame, or the whole frame.
fn detection_window(frame: &Frame, roi: Option<Rect>) -> Rect {
    let full = Rect::new(0, 0, frame.width(), frame.height());
    match roi {
        Some(roi) => roi.clamp_to(frame.width(), frame.height()).unwrap_or_else(|| {
            log::warn!("MotionDetector: ROI {:?} lies outside the frame, using full frame", roi);
            full
        }),
        None => full,
    }
}
