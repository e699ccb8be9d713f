// Scheduler tests: queue, gate, engine and the live worker

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use super::*;
use crate::config::DetectionConfig;
use crate::constants::EMBEDDING_DIMENSION;
use crate::events::{DetectionResult, TriggerKind};
use crate::face::{EmbeddingExtractor, FaceCapabilities, FaceDetector, RawDetection};
use crate::identity::{IdentityMetadata, IdentityStore};

// ----- Helpers -----

fn tagged_frame(tag: &str) -> Frame {
    Frame::now(RgbImage::new(8, 8)).with_source(tag)
}

fn flat(w: u32, h: u32) -> Frame {
    Frame::now(RgbImage::from_pixel(w, h, Rgb([20, 20, 20])))
}

fn with_block(w: u32, h: u32) -> Frame {
    let mut img = RgbImage::from_pixel(w, h, Rgb([20, 20, 20]));
    for y in 30..80 {
        for x in 60..110 {
            img.put_pixel(x, y, Rgb([240, 240, 240]));
        }
    }
    Frame::now(img)
}

/// Always reports the same boxes.
struct StaticDetector(Vec<RawDetection>);

impl FaceDetector for StaticDetector {
    fn detect_faces(&self, _image: &RgbImage) -> crate::error::Result<Vec<RawDetection>> {
        Ok(self.0.clone())
    }
}

/// Every face embeds to the first axis.
struct AxisExtractor;

impl EmbeddingExtractor for AxisExtractor {
    fn extract_embedding(&self, _face: &RgbImage) -> crate::error::Result<Vec<f32>> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[0] = 1.0;
        Ok(v)
    }
}

fn face_box(x: f32) -> RawDetection {
    RawDetection { x, y: 10.0, width: 30.0, height: 30.0, confidence: 0.95 }
}

fn face_pipeline(boxes: Vec<RawDetection>, known: bool) -> Arc<FacePipeline> {
    let store = Arc::new(IdentityStore::in_memory());
    if known {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[0] = 1.0;
        store.insert("alice", v, IdentityMetadata::default()).unwrap();
    }
    Arc::new(FacePipeline::new(
        FaceCapabilities {
            detector: Box::new(StaticDetector(boxes)),
            extractor: Box::new(AxisExtractor),
        },
        store,
    ))
}

#[derive(Default)]
struct Recorder {
    results: Mutex<Vec<DetectionResult>>,
    triggers: Mutex<Vec<TriggerKind>>,
    errors: Mutex<Vec<String>>,
}

impl DetectionListener for Recorder {
    fn on_detection_result(&self, result: &DetectionResult) {
        self.results.lock().unwrap().push(result.clone());
    }

    fn on_record_trigger(&self, trigger: &RecordTrigger) {
        self.triggers.lock().unwrap().push(trigger.kind);
    }

    fn on_subsystem_error(&self, subsystem: &str, message: &str) {
        self.errors.lock().unwrap().push(format!("{}: {}", subsystem, message));
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn no_skip_config() -> DetectionConfig {
    DetectionConfig {
        skip_frames: 0,
        ..Default::default()
    }
}

// ----- FrameQueue -----

#[test]
fn test_queue_keeps_newest_frames() {
    let queue = FrameQueue::new(3);
    for i in 0..7 {
        queue.offer(tagged_frame(&format!("f{}", i)), 0);
        assert!(queue.len() <= 3);
    }
    let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|f| f.source().to_string()).collect();
    assert_eq!(order, vec!["f4", "f5", "f6"]);
}

#[test]
fn test_queue_reports_eviction() {
    let queue = FrameQueue::new(1);
    assert_eq!(queue.offer(tagged_frame("a"), 0), OfferOutcome::Accepted);
    assert_eq!(queue.offer(tagged_frame("b"), 0), OfferOutcome::AcceptedWithEviction);
    assert_eq!(queue.pop().unwrap().source(), "b");
    assert!(queue.is_empty());
}

#[test]
fn test_skip_two_accepts_every_third() {
    let queue = FrameQueue::new(3);
    let outcomes: Vec<OfferOutcome> = (0..3).map(|i| queue.offer(tagged_frame(&i.to_string()), 2)).collect();
    assert_eq!(
        outcomes,
        vec![OfferOutcome::Skipped, OfferOutcome::Skipped, OfferOutcome::Accepted]
    );
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop().unwrap().source(), "2");
}

#[test]
fn test_clear_returns_count() {
    let queue = FrameQueue::new(3);
    queue.offer(tagged_frame("a"), 0);
    queue.offer(tagged_frame("b"), 0);
    assert_eq!(queue.clear(), 2);
    assert!(queue.pop().is_none());
}

// ----- FaceGate -----

#[test]
fn test_gate_static_scene_runs_every_fifth() {
    let mut gate = FaceGate::new();
    let ran: Vec<u32> = (1..=10).filter(|_| gate.should_process(false)).collect();
    assert_eq!(ran, vec![5, 10]);
}

#[test]
fn test_gate_with_motion_runs_every_second() {
    let mut gate = FaceGate::new();
    let ran: Vec<u32> = (1..=6).filter(|_| gate.should_process(true)).collect();
    assert_eq!(ran, vec![2, 4, 6]);
}

// ----- DetectionEngine -----

#[test]
fn test_engine_motion_result_and_trigger() {
    let mut engine = DetectionEngine::new(None);
    let config = DetectionConfig::default();

    let first = engine.process(&flat(160, 120), &config);
    assert!(!first.has_motion);
    assert_eq!(first.sequence, 1);

    let second = engine.process(&with_block(160, 120), &config);
    assert!(second.has_motion);
    assert!(second.motion_region.is_some());
    assert!(!second.face_cycle);
    assert_eq!(record_triggers(&second, &config), vec![TriggerKind::Motion]);

    let quiet = DetectionConfig {
        record_on_motion: false,
        ..Default::default()
    };
    assert!(record_triggers(&second, &quiet).is_empty());
}

#[test]
fn test_engine_motion_disabled() {
    let mut engine = DetectionEngine::new(None);
    let config = DetectionConfig {
        enable_motion_detection: false,
        ..Default::default()
    };
    engine.process(&flat(160, 120), &config);
    let result = engine.process(&with_block(160, 120), &config);
    assert!(!result.has_motion);
}

#[test]
fn test_engine_face_work_follows_gate() {
    let mut engine = DetectionEngine::new(Some(face_pipeline(vec![face_box(10.0)], true)));
    let config = DetectionConfig {
        enable_motion_detection: false,
        ..Default::default()
    };

    let face_cycles: Vec<u64> = (0..10)
        .map(|_| engine.process(&flat(160, 120), &config))
        .filter(|r| r.face_cycle)
        .map(|r| r.sequence)
        .collect();
    assert_eq!(face_cycles, vec![5, 10]);
}

#[test]
fn test_engine_face_triggers() {
    let mut engine = DetectionEngine::new(Some(face_pipeline(vec![face_box(10.0), face_box(80.0)], true)));
    let config = DetectionConfig {
        enable_motion_detection: false,
        ..Default::default()
    };

    let result = (0..5)
        .map(|_| engine.process(&flat(160, 120), &config))
        .last()
        .unwrap();
    assert!(result.face_cycle);
    assert_eq!(result.faces.len(), 2);
    assert_eq!(result.recognized_count(), 2);

    assert_eq!(
        record_triggers(&result, &config),
        vec![TriggerKind::KnownFace, TriggerKind::MultipleFaces]
    );

    let known_off = DetectionConfig {
        record_known_faces: false,
        record_multiple_faces: false,
        ..config.clone()
    };
    assert!(record_triggers(&result, &known_off).is_empty());
}

#[test]
fn test_engine_unknown_face_in_detect_only_mode() {
    let mut engine = DetectionEngine::new(Some(face_pipeline(vec![face_box(10.0)], true)));
    let config = DetectionConfig {
        enable_motion_detection: false,
        enable_face_recognition: false,
        ..Default::default()
    };
    let result = (0..5)
        .map(|_| engine.process(&flat(160, 120), &config))
        .last()
        .unwrap();
    assert_eq!(result.unknown_count(), 1);
    assert_eq!(record_triggers(&result, &config), vec![TriggerKind::UnknownFace]);
}

#[test]
fn test_engine_face_detection_disabled_skips_gate() {
    let mut engine = DetectionEngine::new(Some(face_pipeline(vec![face_box(10.0)], false)));
    let off = DetectionConfig {
        enable_motion_detection: false,
        enable_face_detection: false,
        ..Default::default()
    };
    for _ in 0..7 {
        assert!(!engine.process(&flat(64, 64), &off).face_cycle);
    }

    // Disabled cycles did not advance the duty cycle
    let on = DetectionConfig {
        enable_motion_detection: false,
        ..Default::default()
    };
    let cycles: Vec<bool> = (0..5).map(|_| engine.process(&flat(64, 64), &on).face_cycle).collect();
    assert_eq!(cycles, vec![false, false, false, false, true]);
}

// ----- DetectionScheduler -----

#[test]
fn test_add_frame_ignored_while_stopped() {
    let scheduler = DetectionScheduler::new(Arc::new(ConfigCell::default()), FaceSubsystem::Disabled);
    scheduler.add_frame(flat(32, 32));
    assert_eq!(scheduler.queue_len(), 0);
    assert_eq!(scheduler.stats().frames_offered, 0);
}

#[test]
fn test_add_frame_ignored_when_ai_disabled() {
    let config = Arc::new(ConfigCell::new(DetectionConfig {
        enable_ai: false,
        ..Default::default()
    }).unwrap());
    let scheduler = DetectionScheduler::new(config, FaceSubsystem::Disabled);
    scheduler.start().unwrap();
    scheduler.add_frame(flat(32, 32));
    assert_eq!(scheduler.stats().frames_offered, 0);
    scheduler.stop();
}

#[test]
fn test_worker_publishes_results_and_triggers() {
    let config = Arc::new(ConfigCell::new(no_skip_config()).unwrap());
    let scheduler = DetectionScheduler::new(config, FaceSubsystem::Disabled);
    let recorder = Arc::new(Recorder::default());
    scheduler.add_listener(recorder.clone());
    scheduler.start().unwrap();

    scheduler.add_frame(flat(160, 120));
    assert!(wait_for(|| recorder.results.lock().unwrap().len() == 1));
    scheduler.add_frame(with_block(160, 120));
    assert!(wait_for(|| recorder.results.lock().unwrap().len() == 2));
    assert!(wait_for(|| !recorder.triggers.lock().unwrap().is_empty()));

    scheduler.stop();
    assert!(!scheduler.is_running());

    let results = recorder.results.lock().unwrap();
    assert!(!results[0].has_motion);
    assert!(results[1].has_motion);
    assert_eq!(*recorder.triggers.lock().unwrap(), vec![TriggerKind::Motion]);

    let stats = scheduler.stats();
    assert_eq!(stats.frames_processed, 2);
    assert_eq!(stats.motion_frames, 1);
    assert_eq!(stats.triggers_emitted, 1);
    assert_eq!(scheduler.last_result().unwrap().sequence, 2);
}

#[test]
fn test_unavailable_face_subsystem_reported_once() {
    let scheduler = DetectionScheduler::new(
        Arc::new(ConfigCell::default()),
        FaceSubsystem::Unavailable("models missing".to_string()),
    );
    let recorder = Arc::new(Recorder::default());
    scheduler.add_listener(recorder.clone());
    assert!(!scheduler.face_available());

    scheduler.start().unwrap();
    scheduler.stop();
    scheduler.start().unwrap();
    scheduler.stop();

    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("face"));
}

#[test]
fn test_restart_keeps_motion_state() {
    let config = Arc::new(ConfigCell::new(no_skip_config()).unwrap());
    let scheduler = DetectionScheduler::new(config, FaceSubsystem::Disabled);
    let recorder = Arc::new(Recorder::default());
    scheduler.add_listener(recorder.clone());

    scheduler.start().unwrap();
    scheduler.add_frame(flat(160, 120));
    assert!(wait_for(|| recorder.results.lock().unwrap().len() == 1));
    scheduler.stop();

    scheduler.start().unwrap();
    scheduler.add_frame(with_block(160, 120));
    assert!(wait_for(|| recorder.results.lock().unwrap().len() == 2));
    scheduler.stop();

    let results = recorder.results.lock().unwrap();
    assert_eq!(results[1].sequence, 2);
    assert!(results[1].has_motion, "Background from before the restart is reused");
}

#[test]
fn test_start_is_idempotent() {
    let scheduler = DetectionScheduler::new(Arc::new(ConfigCell::default()), FaceSubsystem::Disabled);
    scheduler.start().unwrap();
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    scheduler.stop();
    scheduler.stop();
    assert!(!scheduler.is_running());
}

/// Panics on its first detection result only.
#[derive(Default)]
struct PanicsOnce {
    fired: std::sync::atomic::AtomicBool,
}

impl DetectionListener for PanicsOnce {
    fn on_detection_result(&self, _result: &DetectionResult) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            panic!("listener bug");
        }
    }
}

#[test]
fn test_panicking_listener_does_not_stop_worker() {
    let config = Arc::new(ConfigCell::new(no_skip_config()).unwrap());
    let scheduler = DetectionScheduler::new(config, FaceSubsystem::Disabled);
    let recorder = Arc::new(Recorder::default());
    scheduler.add_listener(Arc::new(PanicsOnce::default()));
    scheduler.add_listener(recorder.clone());
    scheduler.start().unwrap();

    for n in 1..=3 {
        scheduler.add_frame(flat(64, 48));
        assert!(wait_for(|| recorder.results.lock().unwrap().len() == n));
    }

    assert!(scheduler.is_running());
    assert_eq!(scheduler.queue_len(), 0);
    assert_eq!(scheduler.stats().frames_processed, 3);
    scheduler.stop();
}

/// Panics the first time it is asked to look for faces.
#[derive(Default)]
struct PanickingDetector {
    fired: std::sync::atomic::AtomicBool,
}

impl FaceDetector for PanickingDetector {
    fn detect_faces(&self, _image: &RgbImage) -> crate::error::Result<Vec<RawDetection>> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            panic!("detector crashed");
        }
        Ok(Vec::new())
    }
}

#[test]
fn test_panicked_cycle_publishes_empty_result() {
    let pipeline = Arc::new(FacePipeline::new(
        FaceCapabilities {
            detector: Box::new(PanickingDetector::default()),
            extractor: Box::new(AxisExtractor),
        },
        Arc::new(IdentityStore::in_memory()),
    ));
    let config = Arc::new(ConfigCell::new(no_skip_config()).unwrap());
    let scheduler = DetectionScheduler::new(config, FaceSubsystem::Ready(pipeline));
    let recorder = Arc::new(Recorder::default());
    scheduler.add_listener(recorder.clone());
    scheduler.start().unwrap();

    // Static scene: face work first runs on the fifth cycle, which panics
    for n in 1..=6 {
        scheduler.add_frame(flat(64, 48));
        assert!(wait_for(|| recorder.results.lock().unwrap().len() == n));
    }
    scheduler.stop();

    let results = recorder.results.lock().unwrap();
    let failed = &results[4];
    assert_eq!(failed.sequence, 5);
    assert!(!failed.has_motion);
    assert!(!failed.face_cycle);
    assert!(failed.faces.is_empty());
    assert_eq!(results[5].sequence, 6);
}
