// Scheduler counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::events::DetectionResult;

#[derive(Debug, Default)]
pub struct SchedulerStats {
    frames_offered: AtomicU64,
    frames_skipped: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    motion_frames: AtomicU64,
    face_cycles: AtomicU64,
    faces_detected: AtomicU64,
    faces_recognized: AtomicU64,
    triggers_emitted: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub frames_offered: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub motion_frames: u64,
    pub face_cycles: u64,
    pub faces_detected: u64,
    pub faces_recognized: u64,
    pub triggers_emitted: u64,
}

impl SchedulerStats {
    pub fn offered(&self) {
        self.frames_offered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn triggers(&self, n: usize) {
        self.triggers_emitted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_result(&self, result: &DetectionResult) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if result.has_motion {
            self.motion_frames.fetch_add(1, Ordering::Relaxed);
        }
        if result.face_cycle {
            self.face_cycles.fetch_add(1, Ordering::Relaxed);
        }
        self.faces_detected.fetch_add(result.faces.len() as u64, Ordering::Relaxed);
        self.faces_recognized
            .fetch_add(result.recognized_count() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            motion_frames: self.motion_frames.load(Ordering::Relaxed),
            face_cycles: self.face_cycles.load(Ordering::Relaxed),
            faces_detected: self.faces_detected.load(Ordering::Relaxed),
            faces_recognized: self.faces_recognized.load(Ordering::Relaxed),
            triggers_emitted: self.triggers_emitted.load(Ordering::Relaxed),
        }
    }
}
