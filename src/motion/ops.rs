// Low-level image operations for background-model differencing

use std::collections::VecDeque;

use image::{GrayImage, RgbImage};

use crate::constants::MOTION_MORPH_KERNEL;
use crate::frame::Rect;

/// 5x5 elliptical structuring element (matches the classic ellipse kernel shape).
const ELLIPSE_5X5: [[bool; MOTION_MORPH_KERNEL]; MOTION_MORPH_KERNEL] = [
    [false, false, true, false, false],
    [true, true, true, true, true],
    [true, true, true, true, true],
    [true, true, true, true, true],
    [false, false, true, false, false],
];

/// Binary image: `true` marks a changed pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }
}

/// A connected outer region of the mask (holes included in its area).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub bounds: Rect,
    pub area: u32,
}

/// Single-channel intensity image.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Gaussian blur sized by an odd kernel width, using the usual sigma-from-kernel rule.
pub fn gaussian_blur(image: &GrayImage, kernel: u32) -> GrayImage {
    let k = kernel.max(3) as f32;
    let sigma = 0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8;
    image::imageops::blur(image, sigma)
}

/// |background - current| > threshold, per pixel.
pub fn diff_mask(background: &[f32], current: &GrayImage, threshold: u8) -> Mask {
    let mut mask = Mask::new(current.width(), current.height());
    let limit = threshold as f32;
    for (i, (bg, px)) in background.iter().zip(current.as_raw().iter()).enumerate() {
        mask.data[i] = (bg - *px as f32).abs() > limit;
    }
    mask
}

/// Exponentially-weighted running average: bg = (1 - rate)·bg + rate·current.
pub fn accumulate(background: &mut [f32], current: &GrayImage, rate: f32) {
    for (bg, px) in background.iter_mut().zip(current.as_raw().iter()) {
        *bg = (1.0 - rate) * *bg + rate * *px as f32;
    }
}

/// Erosion: a pixel survives only if every kernel neighbour inside the image is set.
pub fn erode(mask: &Mask) -> Mask {
    morph(mask, true)
}

/// Dilation: a pixel is set if any kernel neighbour inside the image is set.
pub fn dilate(mask: &Mask) -> Mask {
    morph(mask, false)
}

/// Opening removes speckle smaller than the kernel.
pub fn open(mask: &Mask) -> Mask {
    dilate(&erode(mask))
}

/// Closing fills gaps smaller than the kernel.
pub fn close(mask: &Mask) -> Mask {
    erode(&dilate(mask))
}

fn morph(mask: &Mask, erode: bool) -> Mask {
    let mut out = Mask::new(mask.width, mask.height);
    let (w, h) = (mask.width as i64, mask.height as i64);
    let r = (ELLIPSE_5X5.len() / 2) as i64;

    for y in 0..h {
        for x in 0..w {
            let mut hit = erode;
            'kernel: for (ky, row) in ELLIPSE_5X5.iter().enumerate() {
                for (kx, on) in row.iter().enumerate() {
                    if !on {
                        continue;
                    }
                    let nx = x + kx as i64 - r;
                    let ny = y + ky as i64 - r;
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let set = mask.get(nx as u32, ny as u32);
                    if erode && !set {
                        hit = false;
                        break 'kernel;
                    }
                    if !erode && set {
                        hit = true;
                        break 'kernel;
                    }
                }
            }
            out.set(x as u32, y as u32, hit);
        }
    }
    out
}

/// Outermost regions of the mask in raster scan order (by first top-left pixel).
///
/// Holes enclosed by a region count toward its area and anything nested inside
/// a hole belongs to the enclosing region, so only external outlines are reported.
pub fn external_regions(mask: &Mask) -> Vec<Region> {
    let filled = fill_holes(mask);
    let (w, h) = (mask.width, mask.height);
    let mut seen = vec![false; w as usize * h as usize];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let start = filled.idx(x, y);
            if !filled.data[start] || seen[start] {
                continue;
            }

            seen[start] = true;
            stack.push((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut area = 0u32;

            while let Some((cx, cy)) = stack.pop() {
                area += 1;
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx as i64 + dx;
                        let ny = cy as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                            continue;
                        }
                        let ni = filled.idx(nx as u32, ny as u32);
                        if filled.data[ni] && !seen[ni] {
                            seen[ni] = true;
                            stack.push((nx as u32, ny as u32));
                        }
                    }
                }
            }

            regions.push(Region {
                bounds: Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
                area,
            });
        }
    }

    regions
}

/// Set every unset pixel that cannot reach the image border (4-connected).
fn fill_holes(mask: &Mask) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut outside = vec![false; w as usize * h as usize];
    let mut queue = VecDeque::new();
    if w == 0 || h == 0 {
        return Mask::new(w, h);
    }

    let seed = |x: u32, y: u32, outside: &mut [bool], queue: &mut VecDeque<(u32, u32)>| {
        let i = mask.idx(x, y);
        if !mask.data[i] && !outside[i] {
            outside[i] = true;
            queue.push_back((x, y));
        }
    };

    for x in 0..w {
        seed(x, 0, &mut outside, &mut queue);
        if h > 1 {
            seed(x, h - 1, &mut outside, &mut queue);
        }
    }
    for y in 0..h {
        seed(0, y, &mut outside, &mut queue);
        if w > 1 {
            seed(w - 1, y, &mut outside, &mut queue);
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let neighbours = [
            (x as i64 - 1, y as i64),
            (x as i64 + 1, y as i64),
            (x as i64, y as i64 - 1),
            (x as i64, y as i64 + 1),
        ];
        for (nx, ny) in neighbours {
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let i = mask.idx(nx as u32, ny as u32);
            if !mask.data[i] && !outside[i] {
                outside[i] = true;
                queue.push_back((nx as u32, ny as u32));
            }
        }
    }

    Mask {
        width: w,
        height: h,
        data: outside.into_iter().map(|o| !o).collect(),
    }
}
