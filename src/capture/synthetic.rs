// Generated scene: static noisy background with a square that wanders in and out

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::FrameSource;
use crate::error::Result;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    rng: StdRng,
    frame_index: u64,
    limit: Option<u64>,
    /// Frames per phase: the object is absent for one phase, present (moving) for the next.
    phase_length: u64,
    object_size: u32,
    position: (i64, i64),
    velocity: (i64, i64),
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let object_size = (width.min(height) / 4).max(4);
        let position = (
            rng.gen_range(0..=(width - object_size.min(width)) as i64),
            rng.gen_range(0..=(height - object_size.min(height)) as i64),
        );
        Self {
            width: width.max(1),
            height: height.max(1),
            rng,
            frame_index: 0,
            limit: None,
            phase_length: 30,
            object_size,
            position,
            velocity: (3, 2),
        }
    }

    /// Stop after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn with_phase_length(mut self, frames: u64) -> Self {
        self.phase_length = frames.max(1);
        self
    }

    fn object_visible(&self) -> bool {
        (self.frame_index / self.phase_length) % 2 == 1
    }

    fn advance_object(&mut self) {
        let max_x = (self.width.saturating_sub(self.object_size)) as i64;
        let max_y = (self.height.saturating_sub(self.object_size)) as i64;
        let (mut x, mut y) = (self.position.0 + self.velocity.0, self.position.1 + self.velocity.1);
        if x < 0 || x > max_x {
            self.velocity.0 = -self.velocity.0;
            x = x.clamp(0, max_x);
        }
        if y < 0 || y > max_y {
            self.velocity.1 = -self.velocity.1;
            y = y.clamp(0, max_y);
        }
        self.position = (x, y);
    }

    fn render(&mut self) -> RgbImage {
        let mut image = RgbImage::new(self.width, self.height);
        for pixel in image.pixels_mut() {
            // Low-amplitude sensor noise around a dark background
            let v = 40u8.saturating_add(self.rng.gen_range(0..6));
            *pixel = Rgb([v, v, v]);
        }

        if self.object_visible() {
            let (ox, oy) = (self.position.0 as u32, self.position.1 as u32);
            for y in oy..(oy + self.object_size).min(self.height) {
                for x in ox..(ox + self.object_size).min(self.width) {
                    image.put_pixel(x, y, Rgb([230, 220, 200]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.limit.map_or(false, |limit| self.frame_index >= limit) {
            return Ok(None);
        }
        let image = self.render();
        if self.object_visible() {
            self.advance_object();
        }
        self.frame_index += 1;
        Ok(Some(image))
    }
}
