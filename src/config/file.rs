// Config file persistence (~/.securevision/config.json)

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::DetectionConfig;
use crate::constants::{APP_DATA_DIR, CONFIG_FILENAME, FACE_IMAGE_DIR};

/// Per-user data directory: ~/.securevision
pub fn default_data_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.home_dir().join(APP_DATA_DIR))
}

/// Default config location: ~/.securevision/config.json
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(CONFIG_FILENAME))
}

/// Saved registration crops: ~/.securevision/faces
pub fn default_face_image_dir() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(FACE_IMAGE_DIR))
}

/// Load a config file. Missing keys fall back to defaults; the result is validated.
pub fn load_config(path: &Path) -> Result<DetectionConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e))?;
    let config: DetectionConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Load the config if the file exists, otherwise return defaults.
pub fn load_or_default(path: &Path) -> Result<DetectionConfig> {
    if path.exists() {
        load_config(path)
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Ok(DetectionConfig::default())
    }
}

/// Write the config as pretty JSON, creating the parent directory if needed.
pub fn save_config(path: &Path, config: &DetectionConfig) -> Result<()> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}
