// Secure Vision Constants
// Defaults for the detection pipeline. Config values override the tunable ones at runtime.

// Paths
pub const APP_DATA_DIR: &str = ".securevision";
pub const IDENTITY_DB_FILENAME: &str = "faces.db";
pub const FACE_IMAGE_DIR: &str = "faces";
pub const FACE_IMAGE_EXTENSION: &str = "jpg";
pub const CONFIG_FILENAME: &str = "config.json";

// Frame queue
pub const MAX_QUEUE_SIZE: usize = 3;
pub const EMPTY_QUEUE_SLEEP_MS: u64 = 33; // ~30fps
pub const DEFAULT_SKIP_FRAMES: u32 = 2;

// Motion detection (background-model differencing)
pub const MOTION_BLUR_KERNEL: u32 = 21;
pub const MOTION_DIFF_THRESHOLD: u8 = 25;
pub const MOTION_MORPH_KERNEL: usize = 5;
pub const MOTION_MIN_CONTOUR_AREA: u32 = 500;
pub const BACKGROUND_LEARNING_RATE: f32 = 0.05;

// Adaptive face scheduling: run face work every Nth eligible cycle
pub const FACE_INTERVAL_WITH_MOTION: u64 = 2;
pub const FACE_INTERVAL_WITHOUT_MOTION: u64 = 5;

// Face pipeline
pub const EMBEDDING_DIMENSION: usize = 512;
pub const DEFAULT_FACE_DETECTION_THRESHOLD: f32 = 0.5;
pub const DEFAULT_FACE_RECOGNITION_THRESHOLD: f32 = 0.7;
pub const FACE_MAX_INPUT_WIDTH: u32 = 1920;
pub const FACE_MAX_INPUT_HEIGHT: u32 = 1080;
pub const SLOW_STAGE_LOG_MS: u128 = 100;

// Recording state machine (milliseconds)
pub const PRE_RECORD_DELAY_MS: u64 = 1000;
pub const POST_RECORD_DELAY_MS: u64 = 5000;
pub const MIN_RECORD_DURATION_MS: u64 = 10_000;
pub const COOLDOWN_PERIOD_MS: u64 = 3000;
pub const MAX_RECORD_DURATION_MS: u64 = 300_000;
pub const RECORD_RECHECK_INTERVAL_MS: u64 = 1000;
pub const RECORDING_TICK_MS: u64 = 20;

// Recording filenames
pub const RECORD_FILE_EXTENSION: &str = "mp4";
pub const RECORD_FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const RECORD_PREFIX_DETECTION: &str = "motion";
pub const RECORD_PREFIX_MANUAL: &str = "manual";

// Capture adapters
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 33;
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
