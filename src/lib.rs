// Secure Vision - surveillance pipeline library
// Motion screening, face matching and triggered recording over live frames.

pub mod constants;
pub mod error;
pub mod frame;
pub mod config;
pub mod db;
pub mod motion;
pub mod identity;
pub mod face;
pub mod events;
pub mod scheduler;
pub mod recording;
pub mod capture;
pub mod service;

pub use config::{ConfigCell, DetectionConfig, RecordingTimings};
pub use error::{Result, SecureVisionError};
pub use events::{DetectionListener, DetectionResult, RecordTrigger, RecordingListener, TriggerKind};
pub use face::{FaceBackend, FaceObservation, FacePipeline};
pub use frame::{Frame, Rect};
pub use identity::{IdentityStore, MatchOutcome};
pub use motion::MotionDetector;
pub use recording::{RecordingController, RecordingState, RecordingStateMachine};
pub use scheduler::DetectionScheduler;
pub use service::VisionService;
