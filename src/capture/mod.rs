// Capture adapters
// One producer thread per source pushes frames into a sink (normally the scheduler).

pub mod directory;
pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbImage;

use crate::error::Result;
use crate::frame::Frame;
use crate::scheduler::DetectionScheduler;

pub use directory::DirectorySource;
pub use synthetic::SyntheticSource;

/// A producer of raw images (camera, file set, generator...).
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Next image, or None once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Receives captured frames. Must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

impl FrameSink for DetectionScheduler {
    fn on_frame(&self, frame: Frame) {
        self.add_frame(frame);
    }
}

/// Handle to a running producer thread.
pub struct CaptureHandle {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl CaptureHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the source is exhausted or `stop` is called.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the producer and return how many frames it delivered.
    pub fn stop(mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.join_inner()
    }

    /// Wait for the source to run dry.
    pub fn wait(mut self) -> u64 {
        self.join_inner()
    }

    fn join_inner(&mut self) -> u64 {
        match self.handle.take().map(|h| h.join()) {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                log::error!("Capture thread '{}' panicked", self.name);
                0
            }
            None => 0,
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_inner();
    }
}

/// Spawn a producer that pulls from `source` every `interval` and pushes into `sink`.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    interval: Duration,
    sink: Arc<dyn FrameSink>,
) -> Result<CaptureHandle> {
    let name = source.name().to_string();
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let source_name = name.clone();

    let handle = std::thread::Builder::new()
        .name(format!("capture-{}", name))
        .spawn(move || {
            let mut delivered = 0u64;
            while flag.load(Ordering::SeqCst) {
                match source.next_frame() {
                    Ok(Some(image)) => {
                        sink.on_frame(Frame::now(image).with_source(&source_name));
                        delivered += 1;
                    }
                    Ok(None) => {
                        log::info!("Capture source '{}' exhausted after {} frames", source_name, delivered);
                        break;
                    }
                    Err(e) => {
                        log::warn!("Capture source '{}' failed to produce a frame: {}", source_name, e);
                    }
                }
                std::thread::sleep(interval);
            }
            delivered
        })?;

    log::info!("Capture '{}' started", name);
    Ok(CaptureHandle {
        name,
        running,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Counted {
        remaining: usize,
    }

    impl FrameSource for Counted {
        fn name(&self) -> &str {
            "counted"
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbImage::new(4, 4)))
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl FrameSink for Collect {
        fn on_frame(&self, frame: Frame) {
            self.0.lock().unwrap().push(frame.source().to_string());
        }
    }

    #[test]
    fn test_capture_runs_until_exhausted() {
        let sink = Arc::new(Collect::default());
        let handle = spawn_capture(
            Box::new(Counted { remaining: 4 }),
            Duration::from_millis(1),
            sink.clone(),
        )
        .unwrap();
        assert_eq!(handle.wait(), 4);

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|s| s == "counted"));
    }

    #[test]
    fn test_stop_ends_endless_source() {
        let sink = Arc::new(Collect::default());
        let handle = spawn_capture(
            Box::new(Counted { remaining: usize::MAX }),
            Duration::from_millis(2),
            sink.clone(),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(handle.is_active());
        let delivered = handle.stop();
        assert!(delivered > 0);
        assert_eq!(sink.0.lock().unwrap().len() as u64, delivered);
    }
}
