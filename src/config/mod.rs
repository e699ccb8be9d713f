// Detection configuration
// Read as a whole snapshot every cycle and replaced as a whole, never patched in place.

pub mod file;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Result, SecureVisionError};
use crate::frame::Rect;

/// Recording state machine timings (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingTimings {
    pub enabled: bool,
    pub pre_record_delay_ms: u64,
    pub post_record_delay_ms: u64,
    pub min_record_duration_ms: u64,
    pub cooldown_period_ms: u64,
    pub max_record_duration_ms: u64,
    pub recheck_interval_ms: u64,
}

impl Default for RecordingTimings {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_record_delay_ms: PRE_RECORD_DELAY_MS,
            post_record_delay_ms: POST_RECORD_DELAY_MS,
            min_record_duration_ms: MIN_RECORD_DURATION_MS,
            cooldown_period_ms: COOLDOWN_PERIOD_MS,
            max_record_duration_ms: MAX_RECORD_DURATION_MS,
            recheck_interval_ms: RECORD_RECHECK_INTERVAL_MS,
        }
    }
}

impl RecordingTimings {
    pub fn pre_record_delay(&self) -> Duration {
        Duration::from_millis(self.pre_record_delay_ms)
    }

    pub fn post_record_delay(&self) -> Duration {
        Duration::from_millis(self.post_record_delay_ms)
    }

    pub fn min_record_duration(&self) -> Duration {
        Duration::from_millis(self.min_record_duration_ms)
    }

    pub fn cooldown_period(&self) -> Duration {
        Duration::from_millis(self.cooldown_period_ms)
    }

    pub fn max_record_duration(&self) -> Duration {
        Duration::from_millis(self.max_record_duration_ms)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }
}

/// Full pipeline configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Master switch: frames are ignored entirely when off.
    pub enable_ai: bool,
    pub enable_motion_detection: bool,
    pub enable_face_detection: bool,
    /// Run embedding + identity matching on detected faces (otherwise detect only).
    pub enable_face_recognition: bool,
    /// Per-pixel intensity difference against the background that counts as change.
    pub motion_threshold: u8,
    /// Smallest contour area (px²) reported as motion.
    pub min_motion_area: u32,
    pub region_of_interest: Option<Rect>,
    pub face_detection_threshold: f32,
    pub face_recognition_threshold: f32,
    /// Accept one frame, then skip this many.
    pub skip_frames: u32,
    pub record_on_motion: bool,
    pub record_known_faces: bool,
    pub record_unknown_faces: bool,
    pub record_multiple_faces: bool,
    pub recording: RecordingTimings,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enable_ai: true,
            enable_motion_detection: true,
            enable_face_detection: true,
            enable_face_recognition: true,
            motion_threshold: MOTION_DIFF_THRESHOLD,
            min_motion_area: MOTION_MIN_CONTOUR_AREA,
            region_of_interest: None,
            face_detection_threshold: DEFAULT_FACE_DETECTION_THRESHOLD,
            face_recognition_threshold: DEFAULT_FACE_RECOGNITION_THRESHOLD,
            skip_frames: DEFAULT_SKIP_FRAMES,
            record_on_motion: true,
            record_known_faces: true,
            record_unknown_faces: true,
            record_multiple_faces: true,
            recording: RecordingTimings::default(),
        }
    }
}

impl DetectionConfig {
    /// Check ranges before a config is allowed to replace the live one.
    pub fn validate(&self) -> Result<()> {
        check_unit("faceDetectionThreshold", self.face_detection_threshold)?;
        check_unit("faceRecognitionThreshold", self.face_recognition_threshold)?;

        if let Some(roi) = &self.region_of_interest {
            if roi.is_empty() {
                return Err(SecureVisionError::InvalidConfig(
                    "regionOfInterest must have a non-zero width and height".to_string(),
                ));
            }
        }

        let rec = &self.recording;
        if rec.recheck_interval_ms == 0 {
            return Err(SecureVisionError::InvalidConfig(
                "recording.recheckIntervalMs must be greater than zero".to_string(),
            ));
        }
        if rec.max_record_duration_ms < rec.min_record_duration_ms {
            return Err(SecureVisionError::InvalidConfig(format!(
                "recording.maxRecordDurationMs ({}) is shorter than minRecordDurationMs ({})",
                rec.max_record_duration_ms, rec.min_record_duration_ms
            )));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SecureVisionError::InvalidConfig(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Shared holder for the live config.
/// Readers clone out an `Arc` snapshot; writers swap in a whole new object.
#[derive(Debug)]
pub struct ConfigCell {
    current: RwLock<Arc<DetectionConfig>>,
}

impl ConfigCell {
    pub fn new(config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn snapshot(&self) -> Arc<DetectionConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the live config. Invalid configs are rejected and the old one stays.
    pub fn replace(&self, config: DetectionConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
        Ok(())
    }
}

impl Default for ConfigCell {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(DetectionConfig::default())),
        }
    }
}
