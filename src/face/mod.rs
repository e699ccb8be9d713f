// Face pipeline
// Detection -> embedding -> identity lookup, per frame.
// Detection and embedding are external capabilities supplied through traits.

pub mod preprocess;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::constants::{
    FACE_IMAGE_EXTENSION, FACE_MAX_INPUT_HEIGHT, FACE_MAX_INPUT_WIDTH, RECORD_FILE_TIME_FORMAT,
    SLOW_STAGE_LOG_MS,
};
use crate::error::{Result, SecureVisionError};
use crate::frame::{Frame, Rect};
use crate::identity::{IdentityMetadata, IdentityStore, MatchOutcome};

/// One box reported by a detector, in the coordinates of the image it was given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Pluggable face detection capability (ONNX, dlib, a remote service...).
pub trait FaceDetector: Send + Sync {
    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Pluggable embedding capability. Given a face crop, returns a fixed-length vector.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract_embedding(&self, face: &RgbImage) -> Result<Vec<f32>>;
}

/// The pair of capabilities a backend provides once initialized.
pub struct FaceCapabilities {
    pub detector: Box<dyn FaceDetector>,
    pub extractor: Box<dyn EmbeddingExtractor>,
}

/// Something that can initialize the face capabilities (load models etc.).
pub trait FaceBackend {
    fn name(&self) -> &str;
    fn load(&self) -> Result<FaceCapabilities>;
}

/// Backend used when no face models are built in. Always fails to load.
pub struct UnavailableBackend;

impl FaceBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn load(&self) -> Result<FaceCapabilities> {
        Err(SecureVisionError::FaceSubsystemUnavailable(
            "no face detection backend is configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMode {
    DetectOnly,
    DetectAndRecognize,
}

impl DetectionMode {
    pub fn from_config(config: &DetectionConfig) -> Self {
        if config.enable_face_recognition {
            DetectionMode::DetectAndRecognize
        } else {
            DetectionMode::DetectOnly
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceThresholds {
    pub detection: f32,
    pub recognition: f32,
}

impl From<&DetectionConfig> for FaceThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            detection: config.face_detection_threshold,
            recognition: config.face_recognition_threshold,
        }
    }
}

/// A face found in a frame, with its identity when recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceObservation {
    /// Bounding box in original frame coordinates.
    pub bbox: Rect,
    pub confidence: f32,
    pub identity_id: Option<i64>,
    pub name: Option<String>,
    /// Best similarity seen, even when below the recognition threshold.
    pub similarity: f32,
    pub recognized: bool,
}

impl FaceObservation {
    fn unrecognized(bbox: Rect, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            identity_id: None,
            name: None,
            similarity: 0.0,
            recognized: false,
        }
    }
}

pub struct FacePipeline {
    detector: Box<dyn FaceDetector>,
    extractor: Box<dyn EmbeddingExtractor>,
    identities: Arc<IdentityStore>,
    /// Where registration crops are kept; none means they are not saved.
    image_dir: Option<PathBuf>,
}

impl FacePipeline {
    pub fn new(capabilities: FaceCapabilities, identities: Arc<IdentityStore>) -> Self {
        Self {
            detector: capabilities.detector,
            extractor: capabilities.extractor,
            identities,
            image_dir: None,
        }
    }

    /// Save each registration crop under `dir` and record its path on the identity.
    pub fn with_image_dir(mut self, dir: PathBuf) -> Self {
        self.image_dir = Some(dir);
        self
    }

    /// Initialize the backend and build a pipeline on top of it.
    pub fn load(backend: &dyn FaceBackend, identities: Arc<IdentityStore>) -> Result<Self> {
        let capabilities = backend.load()?;
        log::info!("Face subsystem initialized with backend '{}'", backend.name());
        Ok(Self::new(capabilities, identities))
    }

    pub fn identities(&self) -> &Arc<IdentityStore> {
        &self.identities
    }

    /// Detect faces in `frame` and, in recognize mode, match each one.
    ///
    /// A detector failure fails the call. Per-face embedding failures only
    /// leave that face unrecognized.
    pub fn process(
        &self,
        frame: &Frame,
        mode: DetectionMode,
        thresholds: FaceThresholds,
    ) -> Result<Vec<FaceObservation>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let boxes = self.detect_boxes(frame.image(), thresholds.detection)?;

        let mut observations = Vec::with_capacity(boxes.len());
        for (bbox, confidence) in boxes {
            let observation = match mode {
                DetectionMode::DetectOnly => FaceObservation::unrecognized(bbox, confidence),
                DetectionMode::DetectAndRecognize => {
                    self.recognize(frame.image(), bbox, confidence, thresholds.recognition)
                }
            };
            observations.push(observation);
        }

        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_STAGE_LOG_MS {
            log::debug!(
                "Face processing took {}ms for {} faces ({:?})",
                elapsed,
                observations.len(),
                mode
            );
        }

        Ok(observations)
    }

    /// Run the detector on a size-limited copy and return boxes in original
    /// coordinates that pass the confidence threshold.
    fn detect_boxes(&self, image: &RgbImage, min_confidence: f32) -> Result<Vec<(Rect, f32)>> {
        let (prepared, scale) =
            preprocess::fit_within(image, FACE_MAX_INPUT_WIDTH, FACE_MAX_INPUT_HEIGHT);
        let raw = self.detector.detect_faces(&prepared)?;

        Ok(raw
            .iter()
            .filter(|d| d.confidence >= min_confidence)
            .filter_map(|d| {
                preprocess::map_to_original(d, scale, image.width(), image.height())
                    .map(|rect| (rect, d.confidence))
            })
            .collect())
    }

    fn recognize(&self, image: &RgbImage, bbox: Rect, confidence: f32, threshold: f32) -> FaceObservation {
        let mut observation = FaceObservation::unrecognized(bbox, confidence);

        let Some(face) = preprocess::crop(image, &bbox) else {
            log::debug!("Skipping recognition for degenerate crop {:?}", bbox);
            return observation;
        };

        let embedding = match self.extractor.extract_embedding(&face) {
            Ok(e) if e.is_empty() => {
                log::debug!("Embedding extractor returned an empty vector for {:?}", bbox);
                return observation;
            }
            Ok(e) => e,
            Err(e) => {
                log::warn!("Embedding extraction failed for face at {:?}: {}", bbox, e);
                return observation;
            }
        };

        match self.identities.find_best_match(&embedding, threshold) {
            MatchOutcome::Match { id, name, similarity } => {
                if let Err(e) = self.identities.record_hit(id) {
                    log::warn!("Failed to record hit for identity {}: {}", id, e);
                }
                observation.identity_id = Some(id);
                observation.name = Some(name);
                observation.similarity = similarity;
                observation.recognized = true;
            }
            MatchOutcome::NoMatch { best_similarity } => {
                observation.similarity = best_similarity;
            }
        }
        observation
    }

    /// Register a person from a photo. Returns false on any failure.
    pub fn register(&self, name: &str, image: &RgbImage, min_confidence: f32) -> bool {
        match self.register_with_metadata(name, image, IdentityMetadata::default(), min_confidence) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to register '{}': {}", name, e);
                false
            }
        }
    }

    /// Register using the largest face at or above `min_confidence`, or the
    /// whole image when no face is found.
    pub fn register_with_metadata(
        &self,
        name: &str,
        image: &RgbImage,
        mut metadata: IdentityMetadata,
        min_confidence: f32,
    ) -> Result<i64> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SecureVisionError::Capability("registration image is empty".to_string()));
        }

        let boxes = self.detect_boxes(image, min_confidence)?;
        let largest = boxes
            .iter()
            .map(|(rect, _)| *rect)
            .fold(None::<Rect>, |best, r| match best {
                Some(b) if b.area() >= r.area() => Some(b),
                _ => Some(r),
            });

        let face = match largest.and_then(|r| preprocess::crop(image, &r)) {
            Some(face) => face,
            None => {
                log::info!("No face found in registration image for '{}', using whole image", name);
                image.clone()
            }
        };

        let embedding = self.extractor.extract_embedding(&face)?;

        if metadata.image_path.is_none() {
            if let Some(dir) = &self.image_dir {
                match save_face_image(dir, name, &face) {
                    Ok(path) => metadata.image_path = Some(path.to_string_lossy().into_owned()),
                    Err(e) => log::warn!("Failed to save face image for '{}': {}", name, e),
                }
            }
        }

        self.identities.insert(name, embedding, metadata)
    }
}

/// `<dir>/<name>_yyyyMMdd_HHmmss.jpg`, with the name reduced to filename-safe characters.
fn save_face_image(dir: &Path, name: &str, face: &RgbImage) -> Result<PathBuf> {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let filename = format!(
        "{}_{}.{}",
        stem,
        Utc::now().format(RECORD_FILE_TIME_FORMAT),
        FACE_IMAGE_EXTENSION
    );

    std::fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    face.save_with_format(&path, image::ImageFormat::Jpeg)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EMBEDDING_DIMENSION;
    use image::Rgb;

    /// Returns preset boxes, scaled into whatever image it is handed.
    struct FixedDetector {
        boxes: Vec<RawDetection>,
        reference_width: u32,
    }

    impl FaceDetector for FixedDetector {
        fn detect_faces(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
            let k = image.width() as f32 / self.reference_width as f32;
            Ok(self
                .boxes
                .iter()
                .map(|b| RawDetection {
                    x: b.x * k,
                    y: b.y * k,
                    width: b.width * k,
                    height: b.height * k,
                    confidence: b.confidence,
                })
                .collect())
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect_faces(&self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
            Err(SecureVisionError::Capability("model crashed".to_string()))
        }
    }

    /// Red-dominant crops map to axis 0, blue-dominant to axis 1, anything else fails.
    struct ColorExtractor;

    impl EmbeddingExtractor for ColorExtractor {
        fn extract_embedding(&self, face: &RgbImage) -> Result<Vec<f32>> {
            let (mut r, mut b) = (0u64, 0u64);
            for p in face.pixels() {
                r += p[0] as u64;
                b += p[2] as u64;
            }
            let axis = if r > b * 2 {
                0
            } else if b > r * 2 {
                1
            } else {
                return Err(SecureVisionError::Capability("unreadable face".to_string()));
            };
            let mut v = vec![0.0; EMBEDDING_DIMENSION];
            v[axis] = 1.0;
            Ok(v)
        }
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[i] = 1.0;
        v
    }

    fn det(x: f32, y: f32, size: f32, confidence: f32) -> RawDetection {
        RawDetection { x, y, width: size, height: size, confidence }
    }

    /// Left half red, right half blue, bottom strip grey.
    fn scene(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if y > h * 3 / 4 {
                Rgb([128, 128, 128])
            } else if x < w / 2 {
                Rgb([220, 10, 10])
            } else {
                Rgb([10, 10, 220])
            }
        })
    }

    fn pipeline(boxes: Vec<RawDetection>, reference_width: u32) -> (FacePipeline, Arc<IdentityStore>) {
        let store = Arc::new(IdentityStore::in_memory());
        let caps = FaceCapabilities {
            detector: Box::new(FixedDetector { boxes, reference_width }),
            extractor: Box::new(ColorExtractor),
        };
        (FacePipeline::new(caps, Arc::clone(&store)), store)
    }

    fn thresholds() -> FaceThresholds {
        FaceThresholds { detection: 0.5, recognition: 0.7 }
    }

    #[test]
    fn test_low_confidence_boxes_dropped() {
        let (pipeline, _) = pipeline(vec![det(10.0, 10.0, 40.0, 0.9), det(200.0, 10.0, 40.0, 0.3)], 320);
        let frame = Frame::now(scene(320, 240));
        let faces = pipeline.process(&frame, DetectionMode::DetectOnly, thresholds()).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, Rect::new(10, 10, 40, 40));
        assert!(!faces[0].recognized);
    }

    #[test]
    fn test_each_face_recognized_independently() {
        let (pipeline, store) = pipeline(vec![det(10.0, 10.0, 40.0, 0.9), det(200.0, 10.0, 40.0, 0.8)], 320);
        let alice = store.insert("alice", axis(0), IdentityMetadata::default()).unwrap();

        let frame = Frame::now(scene(320, 240));
        let faces = pipeline
            .process(&frame, DetectionMode::DetectAndRecognize, thresholds())
            .unwrap();
        assert_eq!(faces.len(), 2);

        assert!(faces[0].recognized);
        assert_eq!(faces[0].identity_id, Some(alice));
        assert_eq!(faces[0].name.as_deref(), Some("alice"));

        // Blue face is unknown; its best score against alice is 0
        assert!(!faces[1].recognized);
        assert_eq!(faces[1].similarity, 0.0);

        assert_eq!(store.get(alice).unwrap().match_count, 1);
    }

    #[test]
    fn test_detect_only_never_touches_store() {
        let (pipeline, store) = pipeline(vec![det(10.0, 10.0, 40.0, 0.9)], 320);
        let alice = store.insert("alice", axis(0), IdentityMetadata::default()).unwrap();

        let frame = Frame::now(scene(320, 240));
        let faces = pipeline.process(&frame, DetectionMode::DetectOnly, thresholds()).unwrap();
        assert!(!faces[0].recognized);
        assert_eq!(store.get(alice).unwrap().match_count, 0);
    }

    #[test]
    fn test_embedding_failure_leaves_face_unrecognized() {
        // Box over the grey strip: extractor refuses it
        let (pipeline, store) = pipeline(vec![det(10.0, 200.0, 30.0, 0.9), det(10.0, 10.0, 40.0, 0.9)], 320);
        store.insert("alice", axis(0), IdentityMetadata::default()).unwrap();

        let frame = Frame::now(scene(320, 240));
        let faces = pipeline
            .process(&frame, DetectionMode::DetectAndRecognize, thresholds())
            .unwrap();
        assert_eq!(faces.len(), 2);
        assert!(!faces[0].recognized);
        assert!(faces[1].recognized);
    }

    #[test]
    fn test_boxes_remapped_after_downscale() {
        // Detector sees a 1920-wide copy of a 3840-wide frame
        let (pipeline, _) = pipeline(vec![det(100.0, 100.0, 200.0, 0.9)], 3840);
        let frame = Frame::now(scene(3840, 2160));
        let faces = pipeline.process(&frame, DetectionMode::DetectOnly, thresholds()).unwrap();
        assert_eq!(faces.len(), 1);
        let b = faces[0].bbox;
        assert!(b.x.abs_diff(100) <= 2 && b.y.abs_diff(100) <= 2);
        assert!(b.width.abs_diff(200) <= 4);
    }

    #[test]
    fn test_detector_failure_propagates() {
        let store = Arc::new(IdentityStore::in_memory());
        let pipeline = FacePipeline::new(
            FaceCapabilities {
                detector: Box::new(FailingDetector),
                extractor: Box::new(ColorExtractor),
            },
            store,
        );
        let frame = Frame::now(scene(64, 64));
        assert!(pipeline.process(&frame, DetectionMode::DetectOnly, thresholds()).is_err());
    }

    #[test]
    fn test_register_uses_largest_face() {
        // Small red face and larger blue face: registration must embed the blue one
        let (pipeline, store) = pipeline(vec![det(10.0, 10.0, 20.0, 0.9), det(200.0, 10.0, 60.0, 0.9)], 320);
        assert!(pipeline.register("bob", &scene(320, 240), 0.5));
        assert_eq!(store.get_by_name("bob").unwrap().embedding, axis(1));

        // Duplicate name fails cleanly
        assert!(!pipeline.register("BOB", &scene(320, 240), 0.5));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_register_falls_back_to_whole_image() {
        let (pipeline, store) = pipeline(Vec::new(), 64);
        let red = RgbImage::from_pixel(64, 64, Rgb([200, 0, 0]));
        assert!(pipeline.register("carol", &red, 0.5));
        assert_eq!(store.get_by_name("carol").unwrap().embedding, axis(0));
    }

    #[test]
    fn test_register_honours_detection_threshold() {
        // Large blue face is a weak detection; the small red one is confident
        let boxes = vec![det(10.0, 10.0, 20.0, 0.9), det(200.0, 10.0, 60.0, 0.6)];

        let (lenient, store) = pipeline(boxes.clone(), 320);
        assert!(lenient.register("dave", &scene(320, 240), 0.5));
        assert_eq!(store.get_by_name("dave").unwrap().embedding, axis(1));

        let (strict, store) = pipeline(boxes, 320);
        assert!(strict.register("dave", &scene(320, 240), 0.8));
        assert_eq!(store.get_by_name("dave").unwrap().embedding, axis(0));
    }

    #[test]
    fn test_register_saves_face_crop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let faces_dir = tmp.path().join("faces");
        let (pipeline, store) = pipeline(vec![det(200.0, 10.0, 60.0, 0.9)], 320);
        let pipeline = pipeline.with_image_dir(faces_dir.clone());

        assert!(pipeline.register("Eve Smith", &scene(320, 240), 0.5));

        let path = PathBuf::from(store.get_by_name("eve smith").unwrap().metadata.image_path.unwrap());
        assert_eq!(path.parent(), Some(faces_dir.as_path()));
        let filename = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(filename.starts_with("Eve_Smith_"));
        assert!(filename.ends_with(".jpg"));

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (60, 60));
    }

    #[test]
    fn test_register_without_image_dir_keeps_no_path() {
        let (pipeline, store) = pipeline(vec![det(200.0, 10.0, 60.0, 0.9)], 320);
        assert!(pipeline.register("frank", &scene(320, 240), 0.5));
        assert!(store.get_by_name("frank").unwrap().metadata.image_path.is_none());
    }

    #[test]
    fn test_unavailable_backend_fails_to_load() {
        let store = Arc::new(IdentityStore::in_memory());
        let err = FacePipeline::load(&UnavailableBackend, store).err().unwrap();
        assert!(matches!(err, SecureVisionError::FaceSubsystemUnavailable(_)));
    }
}
