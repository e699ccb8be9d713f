// Detection scheduler
//
// Producers call `add_frame` from any thread. A single named worker thread
// drains the queue, runs one synchronous detection cycle per frame and
// publishes results and record triggers to listeners.

pub mod engine;
pub mod gate;
pub mod queue;
pub mod stats;

#[cfg(test)]
mod tests;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ConfigCell;
use crate::constants::{EMPTY_QUEUE_SLEEP_MS, MAX_QUEUE_SIZE};
use crate::error::Result;
use crate::events::{DetectionListener, DetectionResult, ListenerSet, RecordTrigger};
use crate::face::FacePipeline;
use crate::frame::Frame;

pub use engine::{record_triggers, DetectionEngine};
pub use gate::FaceGate;
pub use queue::{FrameQueue, OfferOutcome};
pub use stats::{SchedulerStats, StatsSnapshot};

/// Availability of face work for this scheduler.
pub enum FaceSubsystem {
    Ready(Arc<FacePipeline>),
    /// Initialization failed; reported once to listeners on the first start.
    Unavailable(String),
    Disabled,
}

/// State shared between the scheduler handle and its worker thread.
struct Shared {
    config: Arc<ConfigCell>,
    queue: FrameQueue,
    running: AtomicBool,
    listeners: ListenerSet<dyn DetectionListener>,
    stats: SchedulerStats,
    last_result: Mutex<Option<DetectionResult>>,
}

pub struct DetectionScheduler {
    shared: Arc<Shared>,
    faces: Option<Arc<FacePipeline>>,
    face_error: Option<String>,
    face_error_reported: AtomicBool,
    /// Engine parked here while the worker is stopped.
    engine: Mutex<Option<DetectionEngine>>,
    worker: Mutex<Option<JoinHandle<DetectionEngine>>>,
}

impl DetectionScheduler {
    pub fn new(config: Arc<ConfigCell>, faces: FaceSubsystem) -> Self {
        Self::with_capacity(config, faces, MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(config: Arc<ConfigCell>, faces: FaceSubsystem, capacity: usize) -> Self {
        let (faces, face_error) = match faces {
            FaceSubsystem::Ready(p) => (Some(p), None),
            FaceSubsystem::Unavailable(msg) => (None, Some(msg)),
            FaceSubsystem::Disabled => (None, None),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                queue: FrameQueue::new(capacity),
                running: AtomicBool::new(false),
                listeners: ListenerSet::new(),
                stats: SchedulerStats::default(),
                last_result: Mutex::new(None),
            }),
            engine: Mutex::new(Some(DetectionEngine::new(faces.clone()))),
            faces,
            face_error,
            face_error_reported: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn DetectionListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DetectionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether face work can run at all (backend initialized).
    pub fn face_available(&self) -> bool {
        self.faces.is_some()
    }

    /// Offer a frame from a capture source. Never blocks.
    ///
    /// Ignored while stopped or when the AI master switch is off.
    pub fn add_frame(&self, frame: Frame) {
        if !self.is_running() {
            return;
        }
        let config = self.shared.config.snapshot();
        if !config.enable_ai {
            return;
        }

        self.shared.stats.offered();
        match self.shared.queue.offer(frame, config.skip_frames) {
            OfferOutcome::Skipped => self.shared.stats.skipped(),
            OfferOutcome::Accepted => {}
            OfferOutcome::AcceptedWithEviction => {
                self.shared.stats.dropped();
                log::debug!(
                    "Frame queue full ({} slots), dropped oldest frame",
                    self.shared.queue.capacity()
                );
            }
        }
    }

    /// Spawn the detection worker. A no-op if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }

        if let Some(msg) = &self.face_error {
            if !self.face_error_reported.swap(true, Ordering::SeqCst) {
                log::error!("Face subsystem unavailable, running motion-only: {}", msg);
                for listener in self.shared.listeners.snapshot() {
                    notify("on_subsystem_error", || listener.on_subsystem_error("face", msg));
                }
            }
        }

        let mut engine = self
            .engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| DetectionEngine::new(self.faces.clone()));

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || {
                detection_loop(&shared, &mut engine);
                engine
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("Detection scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                log::error!("Failed to spawn detection worker: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stop the worker. The cycle in progress finishes and is published;
    /// frames still queued are discarded.
    pub fn stop(&self) {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);
        let engine = match handle.join() {
            Ok(engine) => engine,
            Err(_) => {
                log::error!("Detection worker panicked; starting over with a fresh engine");
                DetectionEngine::new(self.faces.clone())
            }
        };
        *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(engine);

        let discarded = self.shared.queue.clear();
        if discarded > 0 {
            log::debug!("Discarded {} queued frames on stop", discarded);
        }
        log::info!("Detection scheduler stopped");
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Most recently published result.
    pub fn last_result(&self) -> Option<DetectionResult> {
        self.shared
            .last_result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for DetectionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn detection_loop(shared: &Shared, engine: &mut DetectionEngine) {
    log::debug!("Detection worker running");
    let idle = Duration::from_millis(EMPTY_QUEUE_SLEEP_MS);

    while shared.running.load(Ordering::SeqCst) {
        let Some(frame) = shared.queue.pop() else {
            std::thread::sleep(idle);
            continue;
        };

        let config = shared.config.snapshot();

        // Catch panics so a bad frame never kills the worker
        let outcome = catch_unwind(AssertUnwindSafe(|| engine.process(&frame, &config)));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                log::error!("Detection cycle panicked (recovered)");
                engine.reset();
                engine.degraded_result(&frame)
            }
        };

        shared.stats.record_result(&result);
        *shared.last_result.lock().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());

        let listeners = shared.listeners.snapshot();
        for listener in &listeners {
            notify("on_detection_result", || listener.on_detection_result(&result));
        }

        let triggers = record_triggers(&result, &config);
        shared.stats.triggers(triggers.len());
        for kind in triggers {
            log::debug!("Record trigger: {} (frame {})", kind.as_str(), result.sequence);
            let trigger = RecordTrigger {
                kind,
                frame: frame.clone(),
            };
            for listener in &listeners {
                notify("on_record_trigger", || listener.on_record_trigger(&trigger));
            }
        }
    }

    log::debug!("Detection worker exiting");
}

/// Run one listener callback; a panicking listener is logged and skipped.
fn notify<F: FnOnce()>(callback: &str, call: F) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        log::error!("Detection listener panicked in {} (recovered)", callback);
    }
}
