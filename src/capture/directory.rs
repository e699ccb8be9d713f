// Replays the still images of a directory as a frame stream

use std::path::{Path, PathBuf};

use image::RgbImage;
use walkdir::WalkDir;

use super::FrameSource;
use crate::constants::IMAGE_EXTENSIONS;
use crate::error::{Result, SecureVisionError};

pub struct DirectorySource {
    name: String,
    files: Vec<PathBuf>,
    position: usize,
    looping: bool,
}

impl DirectorySource {
    /// Collect every supported image under `root`, sorted by path.
    pub fn open(root: &Path, looping: bool) -> Result<Self> {
        let files = discover_images(root);
        if files.is_empty() {
            return Err(SecureVisionError::Other(format!(
                "No images found in {}",
                root.display()
            )));
        }
        log::info!("Directory source {}: {} images", root.display(), files.len());

        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("directory")
            .to_string();

        Ok(Self {
            name,
            files,
            position: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return Ok(None);
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;
        let image = image::open(path)?.to_rgb8();
        Ok(Some(image))
    }
}

/// Supported image files under `root` (or `root` itself), sorted.
pub fn discover_images(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if root.is_file() {
        if is_image_file(root) {
            files.push(root.to_path_buf());
        }
    } else if root.is_dir() {
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && is_image_file(path) {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files
}

pub fn is_image_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(6, 4, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_replays_images_in_path_order() {
        let tmp = TempDir::new().unwrap();
        write_png(tmp.path(), "b.png", 20);
        write_png(tmp.path(), "a.png", 10);
        std::fs::write(tmp.path().join("notes.txt"), "ignore me").unwrap();

        let mut source = DirectorySource::open(tmp.path(), false).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 10);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0)[0], 20);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_looping_wraps_around() {
        let tmp = TempDir::new().unwrap();
        write_png(tmp.path(), "only.png", 42);

        let mut source = DirectorySource::open(tmp.path(), true).unwrap();
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_some());
        }
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(DirectorySource::open(tmp.path(), false).is_err());
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert!(is_image_file(Path::new("/x/FRAME.JPG")));
        assert!(!is_image_file(Path::new("/x/clip.mp4")));
        assert!(!is_image_file(Path::new("/x/noext")));
    }
}
