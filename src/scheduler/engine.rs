// One detection cycle: motion -> gated face work -> result + triggers

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::DetectionConfig;
use crate::events::{DetectionResult, StageTimings, TriggerKind};
use crate::face::{DetectionMode, FacePipeline, FaceThresholds};
use crate::frame::Frame;
use crate::motion::{MotionDetector, MotionSettings};

use super::gate::FaceGate;

/// Per-cycle processing state. Owned by the detection worker while it runs.
pub struct DetectionEngine {
    motion: MotionDetector,
    gate: FaceGate,
    faces: Option<Arc<FacePipeline>>,
    last_result: Option<DetectionResult>,
    sequence: u64,
}

impl DetectionEngine {
    pub fn new(faces: Option<Arc<FacePipeline>>) -> Self {
        Self {
            motion: MotionDetector::new(),
            gate: FaceGate::new(),
            faces,
            last_result: None,
            sequence: 0,
        }
    }

    /// Forget motion history; used after a panic in a cycle.
    pub fn reset(&mut self) {
        self.motion.reset();
        self.gate.reset();
        self.last_result = None;
    }

    /// Result for a cycle that could not run: no motion, no faces.
    /// Keeps the sequence of the cycle that failed.
    pub fn degraded_result(&self, frame: &Frame) -> DetectionResult {
        self.empty_result(frame)
    }

    fn empty_result(&self, frame: &Frame) -> DetectionResult {
        DetectionResult {
            timestamp: Utc::now(),
            sequence: self.sequence,
            source: frame.source().to_string(),
            has_motion: false,
            motion_region: None,
            face_cycle: false,
            faces: Vec::new(),
            timings: StageTimings::default(),
        }
    }

    /// Run one synchronous cycle over `frame` with the given snapshot.
    pub fn process(&mut self, frame: &Frame, config: &DetectionConfig) -> DetectionResult {
        let started = Instant::now();
        self.sequence += 1;
        let mut result = self.empty_result(frame);

        if config.enable_motion_detection {
            let t = Instant::now();
            let report = self.motion.detect(frame, &MotionSettings::from(config));
            result.has_motion = report.has_motion;
            result.motion_region = report.region;
            result.timings.motion_ms = StageTimings::millis(t.elapsed());
        } else if self.motion.is_seeded() {
            // Re-enabling must start from a fresh background
            self.motion.reset();
        }

        // Gate only counts cycles where face work is actually possible
        if config.enable_face_detection {
            if let Some(faces) = self.faces.as_ref() {
                let last_motion = self.last_result.as_ref().map_or(false, |r| r.has_motion);
                if self.gate.should_process(last_motion) {
                    let t = Instant::now();
                    result.face_cycle = true;
                    match faces.process(frame, DetectionMode::from_config(config), FaceThresholds::from(config)) {
                        Ok(observations) => result.faces = observations,
                        Err(e) => log::warn!("Face detection failed on frame {}: {}", result.sequence, e),
                    }
                    result.timings.face_ms = StageTimings::millis(t.elapsed());
                }
            }
        }

        result.timings.total_ms = StageTimings::millis(started.elapsed());
        self.last_result = Some(result.clone());
        result
    }
}

/// Trigger categories a result raises, each at most once, honoring the record_* flags.
pub fn record_triggers(result: &DetectionResult, config: &DetectionConfig) -> Vec<TriggerKind> {
    let mut triggers = Vec::new();
    if result.has_motion && config.record_on_motion {
        triggers.push(TriggerKind::Motion);
    }
    if result.recognized_count() > 0 && config.record_known_faces {
        triggers.push(TriggerKind::KnownFace);
    }
    if result.unknown_count() > 0 && config.record_unknown_faces {
        triggers.push(TriggerKind::UnknownFace);
    }
    if result.faces.len() > 1 && config.record_multiple_faces {
        triggers.push(TriggerKind::MultipleFaces);
    }
    triggers
}
