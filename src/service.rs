// Vision service
// Wires config, identities, face pipeline, scheduler and recording into one handle.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;

use crate::config::{ConfigCell, DetectionConfig};
use crate::error::Result;
use crate::events::{DetectionListener, RecordingListener};
use crate::face::{FaceBackend, FacePipeline};
use crate::frame::Frame;
use crate::identity::IdentityStore;
use crate::recording::{RecordingController, RecordingState};
use crate::scheduler::{DetectionScheduler, FaceSubsystem, StatsSnapshot};

pub struct VisionService {
    config: Arc<ConfigCell>,
    identities: Arc<IdentityStore>,
    faces: Option<Arc<FacePipeline>>,
    scheduler: Arc<DetectionScheduler>,
    recording: Arc<RecordingController>,
}

impl VisionService {
    /// Build the service. A face backend that fails to load leaves the
    /// service running motion-only; the failure is reported to detection
    /// listeners when the service starts.
    pub fn new(
        config: DetectionConfig,
        identities: Arc<IdentityStore>,
        backend: &dyn FaceBackend,
    ) -> Result<Self> {
        Self::with_face_image_dir(config, identities, backend, None)
    }

    /// Like `new`, but registration crops are saved under `face_image_dir`.
    pub fn with_face_image_dir(
        config: DetectionConfig,
        identities: Arc<IdentityStore>,
        backend: &dyn FaceBackend,
        face_image_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let config = Arc::new(ConfigCell::new(config)?);

        let (faces, subsystem) = match FacePipeline::load(backend, Arc::clone(&identities)) {
            Ok(pipeline) => {
                let pipeline = match face_image_dir {
                    Some(dir) => pipeline.with_image_dir(dir),
                    None => pipeline,
                };
                let pipeline = Arc::new(pipeline);
                (Some(Arc::clone(&pipeline)), FaceSubsystem::Ready(pipeline))
            }
            Err(e) => {
                log::warn!("Face backend '{}' failed to initialize: {}", backend.name(), e);
                (None, FaceSubsystem::Unavailable(e.to_string()))
            }
        };

        let scheduler = Arc::new(DetectionScheduler::new(Arc::clone(&config), subsystem));
        let recording = Arc::new(RecordingController::new(Arc::clone(&config)));
        scheduler.add_listener(recording.clone());

        Ok(Self {
            config,
            identities,
            faces,
            scheduler,
            recording,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.recording.start()?;
        self.scheduler.start()?;
        log::info!(
            "Vision service started ({} identities, faces {})",
            self.identities.count(),
            if self.faces.is_some() { "available" } else { "unavailable" }
        );
        Ok(())
    }

    /// Stop detection first so no trigger lands after recording shuts down.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.recording.shutdown();
    }

    /// Entry point for capture sources.
    pub fn add_frame(&self, frame: Frame) {
        self.scheduler.add_frame(frame);
    }

    pub fn scheduler(&self) -> Arc<DetectionScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn config(&self) -> Arc<DetectionConfig> {
        self.config.snapshot()
    }

    /// Replace the whole config; takes effect from the next cycle.
    pub fn set_config(&self, config: DetectionConfig) -> Result<()> {
        self.config.replace(config)?;
        log::info!("Detection config updated");
        Ok(())
    }

    pub fn face_available(&self) -> bool {
        self.faces.is_some()
    }

    /// Register a person from a photo using the current detection threshold.
    /// False when faces are unavailable or registration fails.
    pub fn register_face(&self, name: &str, image: &RgbImage) -> bool {
        match &self.faces {
            Some(pipeline) => {
                let threshold = self.config.snapshot().face_detection_threshold;
                pipeline.register(name, image, threshold)
            }
            None => {
                log::warn!("Cannot register '{}': face subsystem unavailable", name);
                false
            }
        }
    }

    pub fn remove_face(&self, name: &str) -> Result<bool> {
        self.identities.remove(name)
    }

    pub fn list_names(&self) -> Vec<String> {
        self.identities.list_names()
    }

    pub fn count(&self) -> usize {
        self.identities.count()
    }

    pub fn identities(&self) -> &Arc<IdentityStore> {
        &self.identities
    }

    pub fn manual_trigger(&self) {
        self.recording.manual_trigger();
    }

    pub fn stop_recording(&self) {
        self.recording.stop_recording();
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.scheduler.stats()
    }

    pub fn add_detection_listener(&self, listener: Arc<dyn DetectionListener>) {
        self.scheduler.add_listener(listener);
    }

    pub fn add_recording_listener(&self, listener: Arc<dyn RecordingListener>) {
        self.recording.add_listener(listener);
    }
}

impl Drop for VisionService {
    fn drop(&mut self) {
        self.stop();
    }
}
