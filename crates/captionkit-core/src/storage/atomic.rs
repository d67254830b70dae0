//! Atomic file operations.
//!
//! Writes go to a temp file carrying a PID+TID suffix, are synced to disk and
//! then renamed over the target. An optional `.bak` copy of the previous
//! contents is kept for JSON documents.

use crate::{CaptionKitError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::{debug, warn};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(contents) = atomic_read_text(path)? else {
        return Ok(None);
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| CaptionKitError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Read a UTF-8 text file, returning `None` if it doesn't exist.
pub fn atomic_read_text(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| CaptionKitError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })
}

/// Write data to a JSON file atomically, optionally keeping a `.bak` copy.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| CaptionKitError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            // Not fatal; the new contents are still written.
            warn!("Failed to create backup {}: {}", backup_path.display(), e);
        } else {
            debug!("Created backup: {}", backup_path.display());
        }
    }

    write_replacing(path, serialized.as_bytes())
}

/// Write a text file atomically.
pub fn atomic_write_text(path: &Path, contents: &str) -> Result<()> {
    write_replacing(path, contents.as_bytes())
}

fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| CaptionKitError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let temp_path = temp_path_for(path);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| CaptionKitError::Io {
                message: format!("Failed to create temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;

        file.write_all(bytes).map_err(|e| CaptionKitError::Io {
            message: format!("Failed to write temp file {}", temp_path.display()),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;

        file.sync_all().map_err(|e| CaptionKitError::Io {
            message: format!("Failed to sync temp file {}", temp_path.display()),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(CaptionKitError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        });
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Temp file next to the target, so the final rename stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, process::id(), thread_id()))
}

fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}
