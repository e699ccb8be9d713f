// Event payloads and listener traits
// Listeners are plain observer lists; callbacks are never invoked while a lock is held.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::face::FaceObservation;
use crate::frame::{Frame, Rect};
use crate::recording::RecordingState;

/// Per-stage elapsed time for one detection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub motion_ms: f64,
    pub face_ms: f64,
    pub total_ms: f64,
}

impl StageTimings {
    pub fn millis(d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0
    }
}

/// Published once per consumed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub timestamp: DateTime<Utc>,
    /// Consumption order, starting at 1.
    pub sequence: u64,
    pub source: String,
    pub has_motion: bool,
    pub motion_region: Option<Rect>,
    /// True when face work ran this cycle (faces may still be empty).
    pub face_cycle: bool,
    pub faces: Vec<FaceObservation>,
    pub timings: StageTimings,
}

impl DetectionResult {
    pub fn recognized_count(&self) -> usize {
        self.faces.iter().filter(|f| f.recognized).count()
    }

    pub fn unknown_count(&self) -> usize {
        self.faces.iter().filter(|f| !f.recognized).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerKind {
    Motion,
    KnownFace,
    UnknownFace,
    MultipleFaces,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Motion => "motion",
            TriggerKind::KnownFace => "known_face",
            TriggerKind::UnknownFace => "unknown_face",
            TriggerKind::MultipleFaces => "multiple_faces",
            TriggerKind::Manual => "manual",
        }
    }
}

/// A request to start or extend recording, with the frame that caused it.
#[derive(Debug, Clone)]
pub struct RecordTrigger {
    pub kind: TriggerKind,
    pub frame: Frame,
}

/// Receives detection-side events. All methods default to no-ops.
pub trait DetectionListener: Send + Sync {
    fn on_detection_result(&self, _result: &DetectionResult) {}

    fn on_record_trigger(&self, _trigger: &RecordTrigger) {}

    /// A subsystem failed to initialize or stopped working.
    fn on_subsystem_error(&self, _subsystem: &str, _message: &str) {}
}

/// Receives recording lifecycle events. All methods default to no-ops.
pub trait RecordingListener: Send + Sync {
    fn on_recording_state_changed(&self, _from: RecordingState, _to: RecordingState) {}

    fn on_recording_started(&self, _filename: &str, _session_id: Uuid) {}

    fn on_recording_stopped(&self, _filename: &str, _duration_ms: u64) {}
}

/// Registered listeners of one kind.
pub struct ListenerSet<T: ?Sized> {
    listeners: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<T>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Remove by identity. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|l| !Arc::ptr_eq(l, listener));
        guard.len() != before
    }

    /// Copy of the current list, so callers can notify without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
