// Image preparation for the face capabilities

use std::borrow::Cow;

use image::imageops::FilterType;
use image::RgbImage;

use super::RawDetection;
use crate::frame::Rect;

/// Downscale (aspect preserved) so the image fits within `max_width` x `max_height`.
/// Returns the image to feed the detector and the factor mapping its
/// coordinates back to the original (1.0 when untouched).
pub fn fit_within(image: &RgbImage, max_width: u32, max_height: u32) -> (Cow<'_, RgbImage>, f32) {
    let (w, h) = image.dimensions();
    if w <= max_width && h <= max_height {
        return (Cow::Borrowed(image), 1.0);
    }

    let ratio = (max_width as f32 / w as f32).min(max_height as f32 / h as f32);
    let new_w = ((w as f32 * ratio).round() as u32).max(1);
    let new_h = ((h as f32 * ratio).round() as u32).max(1);
    log::debug!("Downscaling {}x{} to {}x{} for face detection", w, h, new_w, new_h);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    (Cow::Owned(resized), w as f32 / new_w as f32)
}

/// Map a detector box back into original-image pixels, clipped to the image.
/// None for boxes that are degenerate or entirely outside.
pub fn map_to_original(det: &RawDetection, scale: f32, width: u32, height: u32) -> Option<Rect> {
    if !(det.x.is_finite() && det.y.is_finite() && det.width.is_finite() && det.height.is_finite()) {
        return None;
    }
    if det.width <= 0.0 || det.height <= 0.0 {
        return None;
    }

    let x0 = (det.x * scale).floor().max(0.0);
    let y0 = (det.y * scale).floor().max(0.0);
    let x1 = ((det.x + det.width) * scale).ceil().min(width as f32);
    let y1 = ((det.y + det.height) * scale).ceil().min(height as f32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(Rect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Copy out the pixels under `rect`.
pub fn crop(image: &RgbImage, rect: &Rect) -> Option<RgbImage> {
    let rect = rect.clamp_to(image.width(), image.height())?;
    Some(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_small_image_is_untouched() {
        let img = RgbImage::new(640, 480);
        let (out, scale) = fit_within(&img, 1920, 1080);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_large_image_keeps_aspect() {
        let img = RgbImage::new(3840, 2160);
        let (out, scale) = fit_within(&img, 1920, 1080);
        assert_eq!(out.dimensions(), (1920, 1080));
        assert!((scale - 2.0).abs() < 1e-6);

        let tall = RgbImage::new(1000, 2160);
        let (out, _) = fit_within(&tall, 1920, 1080);
        assert_eq!(out.height(), 1080);
        assert_eq!(out.width(), 500);
    }

    #[test]
    fn test_box_mapped_back_and_clipped() {
        let rect = map_to_original(&det(100.0, 50.0, 40.0, 40.0), 2.0, 3840, 2160).unwrap();
        assert_eq!(rect, Rect::new(200, 100, 80, 80));

        let clipped = map_to_original(&det(-10.0, -10.0, 30.0, 30.0), 1.0, 100, 100).unwrap();
        assert_eq!(clipped, Rect::new(0, 0, 20, 20));
    }

    #[test]
    fn test_degenerate_boxes_rejected() {
        assert!(map_to_original(&det(10.0, 10.0, 0.0, 5.0), 1.0, 100, 100).is_none());
        assert!(map_to_original(&det(200.0, 10.0, 5.0, 5.0), 1.0, 100, 100).is_none());
        assert!(map_to_original(&det(f32::NAN, 10.0, 5.0, 5.0), 1.0, 100, 100).is_none());
    }
}
