//! The image directory currently open for tagging.

use super::filter::Filter;
use super::entry::{caption_path_for, is_image_path, read_dimensions, split_tags, ImageEntry};
use crate::storage::{atomic_read_text, atomic_write_text};
use crate::{CaptionKitError, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a bulk file operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<TransferFailure>,
    /// Where the files went.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Move,
    Copy,
}

/// Images of one directory, sorted by file name, with their tags.
#[derive(Debug, Clone)]
pub struct ImageLibrary {
    directory: Option<PathBuf>,
    separator: String,
    images: Vec<ImageEntry>,
}

impl ImageLibrary {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            directory: None,
            separator: separator.into(),
            images: Vec::new(),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Change the separator; takes effect for the next load and write.
    pub fn set_separator(&mut self, separator: impl Into<String>) {
        self.separator = separator.into();
    }

    pub fn images(&self) -> &[ImageEntry] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&ImageEntry> {
        self.images.iter().find(|image| image.path == path)
    }

    /// Replace the contents with the images found directly in `dir`.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Err(CaptionKitError::FileNotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(CaptionKitError::NotADirectory(dir.to_path_buf()));
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| CaptionKitError::io_with_path(e, dir))? {
            let entry = entry.map_err(|e| CaptionKitError::io_with_path(e, dir))?;
            let path = entry.path();
            if !path.is_file() || !is_image_path(&path) {
                continue;
            }

            let tags = match atomic_read_text(&caption_path_for(&path)) {
                Ok(Some(text)) => split_tags(&text, &self.separator),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!("Failed to read tags for {}: {}", path.display(), e);
                    Vec::new()
                }
            };
            images.push(ImageEntry {
                dimensions: read_dimensions(&path),
                path,
                tags,
            });
        }
        images.sort_by_key(|image| image.file_name());

        info!("Loaded {} images from {}", images.len(), dir.display());
        self.directory = Some(dir.to_path_buf());
        self.images = images;
        Ok(self.images.len())
    }

    /// Reload the current directory, if any.
    pub fn reload(&mut self) -> Result<usize> {
        match self.directory.clone() {
            Some(dir) => self.load_directory(&dir),
            None => Ok(0),
        }
    }

    /// Set an image's tags and write its sidecar.
    pub fn update_tags(&mut self, path: &Path, tags: Vec<String>) -> Result<()> {
        let separator = self.separator.clone();
        let image = self
            .images
            .iter_mut()
            .find(|image| image.path == path)
            .ok_or_else(|| CaptionKitError::ImageNotFound(path.to_path_buf()))?;

        image.tags = tags;
        let caption_path = image.caption_path();
        atomic_write_text(&caption_path, &image.caption(&separator)).map_err(|e| {
            CaptionKitError::Io {
                message: format!("Failed to save the tags for {}: {}", image.file_name(), e),
                path: Some(caption_path.clone()),
                source: None,
            }
        })?;
        debug!("Saved {} tags for {}", image.tags.len(), image.path.display());
        Ok(())
    }

    /// Split `text` on the separator and apply the tags to every path.
    pub fn paste_tags(&mut self, text: &str, paths: &[PathBuf]) -> Result<usize> {
        let tags = split_tags(text, &self.separator);
        for path in paths {
            self.update_tags(path, tags.clone())?;
        }
        Ok(paths.len())
    }

    /// One line per image, each image's tags joined by the separator.
    pub fn tags_text(&self, paths: &[PathBuf]) -> Result<String> {
        let lines = paths
            .iter()
            .map(|path| {
                self.get(path)
                    .map(|image| image.caption(&self.separator))
                    .ok_or_else(|| CaptionKitError::ImageNotFound(path.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(lines.join("\n"))
    }

    /// Move images and their sidecars into `dest`, then reload.
    pub fn move_images(&mut self, paths: &[PathBuf], dest: &Path) -> Result<TransferReport> {
        let report = self.transfer(paths, dest, Transfer::Move)?;
        self.reload()?;
        Ok(report)
    }

    /// Copy images and their sidecars into `dest`.
    pub fn copy_images(&self, paths: &[PathBuf], dest: &Path) -> Result<TransferReport> {
        self.transfer(paths, dest, Transfer::Copy)
    }

    /// Move images and sidecars into a fresh timestamped folder under
    /// `trash_root`, then reload.
    pub fn delete_images(&mut self, paths: &[PathBuf], trash_root: &Path) -> Result<TransferReport> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let dest = trash_root.join(stamp);
        fs::create_dir_all(&dest).map_err(|e| CaptionKitError::io_with_path(e, &dest))?;
        info!("Moving {} images to trash at {}", paths.len(), dest.display());
        self.move_images(paths, &dest)
    }

    fn transfer(&self, paths: &[PathBuf], dest: &Path, kind: Transfer) -> Result<TransferReport> {
        if !dest.is_dir() {
            return Err(CaptionKitError::NotADirectory(dest.to_path_buf()));
        }

        let mut report = TransferReport {
            destination: Some(dest.to_path_buf()),
            ..Default::default()
        };
        for path in paths {
            let result = match self.get(path) {
                None => Err(CaptionKitError::ImageNotFound(path.clone())),
                Some(image) => transfer_with_sidecar(&image.path, dest, kind),
            };
            match result {
                Ok(()) => report.succeeded.push(path.clone()),
                Err(e) => {
                    warn!("Failed to transfer {} to {}: {}", path.display(), dest.display(), e);
                    report.failed.push(TransferFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Images passing `filter`, in library order.
    pub fn filtered(&self, filter: Option<&Filter>) -> Vec<&ImageEntry> {
        self.images
            .iter()
            .filter(|image| filter.map_or(true, |f| f.matches(image, &self.separator)))
            .collect()
    }

    /// Index into the filtered view of the first image without tags; the
    /// last index when everything is tagged, `None` when the view is empty.
    pub fn first_untagged_index(&self, filter: Option<&Filter>) -> Option<usize> {
        let view = self.filtered(filter);
        if view.is_empty() {
            return None;
        }
        Some(
            view.iter()
                .position(|image| image.tags.is_empty())
                .unwrap_or(view.len() - 1),
        )
    }
}

fn transfer_with_sidecar(image_path: &Path, dest: &Path, kind: Transfer) -> Result<()> {
    transfer_file(image_path, dest, kind)?;
    let caption_path = caption_path_for(image_path);
    if caption_path.exists() {
        transfer_file(&caption_path, dest, kind)?;
    }
    Ok(())
}

fn transfer_file(src: &Path, dest_dir: &Path, kind: Transfer) -> Result<()> {
    let file_name = src
        .file_name()
        .ok_or_else(|| CaptionKitError::Other(format!("{} has no file name", src.display())))?;
    let target = dest_dir.join(file_name);

    match kind {
        Transfer::Copy => {
            fs::copy(src, &target).map_err(|e| CaptionKitError::io_with_path(e, &target))?;
        }
        Transfer::Move => {
            // rename fails across filesystems; fall back to copy and remove.
            if fs::rename(src, &target).is_err() {
                fs::copy(src, &target).map_err(|e| CaptionKitError::io_with_path(e, &target))?;
                fs::remove_file(src).map_err(|e| CaptionKitError::io_with_path(e, src))?;
            }
        }
    }
    Ok(())
}
