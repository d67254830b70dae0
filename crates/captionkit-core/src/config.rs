//! Centralized configuration constants for captionkit.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "captionkit";
    pub const USER_AGENT: &'static str = "captionkit";
}

/// Shared directory and file names under the data root.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "captionkit-data";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
    pub const TRASH_DIR_NAME: &'static str = "trash";
    pub const MANIFEST_FILENAME: &'static str = "requirements.txt";
    /// A directory holding this file is treated as a local model.
    pub const MODEL_CONFIG_FILENAME: &'static str = "config.json";
}

/// Network-related configuration for the inference backend.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_INFERENCE_URL: &'static str = "http://127.0.0.1:8400";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    /// Loading a multi-gigabyte vision-language model can take minutes.
    pub const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(600);
    pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);
}

/// Image list behaviour.
pub struct ImageListConfig;

impl ImageListConfig {
    pub const DEFAULT_IMAGE_WIDTH: u32 = 200;
    pub const DEFAULT_TAG_SEPARATOR: &'static str = ",";
    pub const CAPTION_EXTENSION: &'static str = "txt";
    pub const IMAGE_EXTENSIONS: &'static [&'static str] = &[
        "bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp", "jfif",
    ];
}
