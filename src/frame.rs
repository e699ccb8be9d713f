// Frame and geometry types shared by every pipeline stage

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clip this rectangle to an image of `width` x `height`.
    /// Returns None when nothing of it lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        let clipped = Rect::new(self.x, self.y, w, h);
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// Translate a rectangle expressed relative to `origin` back into absolute coordinates.
    pub fn offset_by(&self, origin: &Rect) -> Rect {
        Rect::new(self.x + origin.x, self.y + origin.y, self.width, self.height)
    }
}

/// An immutable captured image.
///
/// The pixel buffer sits behind an `Arc`, so cloning a frame to hand it to a
/// listener never copies the image and nothing can mutate it after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: DateTime<Utc>,
    source: Arc<str>,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
            source: Arc::from("default"),
        }
    }

    /// Frame stamped with the current wall-clock time.
    pub fn now(image: RgbImage) -> Self {
        Self::new(image, Utc::now())
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Arc::from(source);
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_clips_overhang() {
        let r = Rect::new(90, 40, 20, 20);
        assert_eq!(r.clamp_to(100, 50), Some(Rect::new(90, 40, 10, 10)));
    }

    #[test]
    fn test_clamp_to_outside_is_none() {
        assert_eq!(Rect::new(100, 0, 5, 5).clamp_to(100, 50), None);
        assert_eq!(Rect::new(10, 10, 0, 5).clamp_to(100, 50), None);
    }

    #[test]
    fn test_frame_clone_shares_buffer() {
        let frame = Frame::now(RgbImage::new(4, 4)).with_source("cam0");
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.image(), copy.image()));
        assert_eq!(copy.source(), "cam0");
    }
}
