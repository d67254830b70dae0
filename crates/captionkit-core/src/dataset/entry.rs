//! A single image and its sidecar tags.

use crate::config::ImageListConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub path: PathBuf,
    /// `(width, height)` from the image header, if readable.
    pub dimensions: Option<(u32, u32)>,
    pub tags: Vec<String>,
}

impl ImageEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The `.txt` file next to the image.
    pub fn caption_path(&self) -> PathBuf {
        caption_path_for(&self.path)
    }

    /// Tags joined with `separator`, as stored in the sidecar.
    pub fn caption(&self, separator: &str) -> String {
        self.tags.join(separator)
    }

    /// Display size when scaled to `width`; square if dimensions are unknown.
    /// The height is rounded and kept within `1..=u32::MAX`.
    pub fn scaled_size(&self, width: u32) -> (u32, u32) {
        match self.dimensions {
            Some((w, h)) if w > 0 => {
                let (w, h) = (u64::from(w), u64::from(h));
                let height = (u64::from(width) * h + w / 2) / w;
                (width, u32::try_from(height.max(1)).unwrap_or(u32::MAX))
            }
            _ => (width, width),
        }
    }
}

pub(crate) fn caption_path_for(image_path: &Path) -> PathBuf {
    image_path.with_extension(ImageListConfig::CAPTION_EXTENSION)
}

/// Whether the extension marks a file as an image.
pub(crate) fn is_image_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| ImageListConfig::IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Read `(width, height)` from the image header without decoding pixels.
pub(crate) fn read_dimensions(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(dimensions) => Some(dimensions),
        Err(e) => {
            debug!("Could not read dimensions of {}: {}", path.display(), e);
            None
        }
    }
}

/// Split sidecar text into tags; empty text means no tags.
pub(crate) fn split_tags(text: &str, separator: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(separator).map(String::from).collect()
}
