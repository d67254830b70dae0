//! Persisted user settings.

use crate::caption::CaptionSettings;
use crate::config::{ImageListConfig, NetworkConfig, PathsConfig};
use crate::storage::atomic::{atomic_read_json, atomic_write_json};
use crate::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Contents of `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Last opened image directory.
    pub directory_path: Option<PathBuf>,
    /// Directory searched for local captioning models.
    pub models_directory_path: Option<PathBuf>,
    pub tag_separator: String,
    pub insert_space_after_tag_separator: bool,
    pub image_list_image_width: u32,
    pub inference_server_url: String,
    pub caption_settings: CaptionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory_path: None,
            models_directory_path: None,
            tag_separator: ImageListConfig::DEFAULT_TAG_SEPARATOR.to_string(),
            insert_space_after_tag_separator: true,
            image_list_image_width: ImageListConfig::DEFAULT_IMAGE_WIDTH,
            inference_server_url: NetworkConfig::DEFAULT_INFERENCE_URL.to_string(),
            caption_settings: CaptionSettings::default(),
        }
    }
}

impl Settings {
    /// The separator used to split and join sidecar tags.
    pub fn separator(&self) -> String {
        if self.insert_space_after_tag_separator {
            format!("{} ", self.tag_separator)
        } else {
            self.tag_separator.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tag_separator.is_empty() {
            return Err(CaptionKitError::validation(
                "tagSeparator",
                "separator must not be empty",
            ));
        }
        if self.image_list_image_width == 0 {
            return Err(CaptionKitError::validation(
                "imageListImageWidth",
                "width must be positive",
            ));
        }
        if url::Url::parse(&self.inference_server_url).is_err() {
            return Err(CaptionKitError::validation(
                "inferenceServerUrl",
                format!("'{}' is not a valid URL", self.inference_server_url),
            ));
        }
        self.caption_settings.validate()
    }

    /// Apply a partial JSON object on top of these settings.
    ///
    /// Keys absent from `patch` keep their current value; nested objects
    /// (caption settings, generation parameters) merge recursively.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self> {
        if !patch.is_object() {
            return Err(CaptionKitError::InvalidParams {
                message: "settings patch must be a JSON object".to_string(),
            });
        }
        let mut current = serde_json::to_value(self)?;
        merge_json(&mut current, patch);
        let updated: Settings =
            serde_json::from_value(current).map_err(|e| CaptionKitError::InvalidParams {
                message: format!("Invalid settings: {}", e),
            })?;
        updated.validate()?;
        Ok(updated)
    }
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(|v| v.is_object());
                match target.get_mut(key) {
                    Some(existing) if nested => merge_json(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Reads and writes `settings.json` under the data directory.
pub struct SettingsStore {
    path: PathBuf,
    write_lock: RwLock<()>,
}

impl SettingsStore {
    /// Store rooted at `<data_root>/captionkit-data/settings.json`.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self::at_path(
            data_root
                .as_ref()
                .join(PathsConfig::DATA_DIR_NAME)
                .join(PathsConfig::SETTINGS_FILENAME),
        )
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields defaults.
    pub fn load(&self) -> Result<Settings> {
        debug!("Loading settings from {}", self.path.display());
        Ok(atomic_read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let _lock = self.write_lock.write().map_err(|_| {
            CaptionKitError::Other("Failed to acquire write lock for settings".to_string())
        })?;
        debug!("Saving settings to {}", self.path.display());
        atomic_write_json(&self.path, settings, true)
    }

    /// Load, modify and save in one step, returning the saved settings.
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load()?;
        f(&mut settings);
        settings.validate()?;
        self.save(&settings)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::CaptionPosition;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::new(temp_dir.path());
        let settings = store.load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.separator(), ", ");
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::new(temp_dir.path());

        let saved = store
            .update(|s| {
                s.tag_separator = ";".to_string();
                s.insert_space_after_tag_separator = false;
                s.directory_path = Some(PathBuf::from("/data/cats"));
            })
            .unwrap();
        assert_eq!(saved.separator(), ";");

        let reloaded = SettingsStore::new(temp_dir.path()).load().unwrap();
        assert_eq!(reloaded, saved);
        assert!(store.path().ends_with("captionkit-data/settings.json"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"imageListImageWidth": 320}"#).unwrap();

        let settings = SettingsStore::at_path(&path).load().unwrap();
        assert_eq!(settings.image_list_image_width, 320);
        assert_eq!(settings.tag_separator, ",");
    }

    #[test]
    fn test_merge_nested_patch() {
        let settings = Settings::default();
        let merged = settings
            .merged(&json!({
                "captionSettings": {
                    "captionPosition": "after_last_tag",
                    "generationParameters": { "num_beams": 4 }
                }
            }))
            .unwrap();
        assert_eq!(
            merged.caption_settings.caption_position,
            CaptionPosition::AfterLastTag
        );
        assert_eq!(merged.caption_settings.generation_parameters.num_beams, 4);
        assert_eq!(
            merged.caption_settings.generation_parameters.max_new_tokens,
            100
        );
        assert_eq!(merged.tag_separator, ",");
    }

    #[test]
    fn test_merge_rejects_invalid_values() {
        let settings = Settings::default();
        assert!(settings.merged(&json!({ "tagSeparator": "" })).is_err());
        assert!(settings
            .merged(&json!({ "imageListImageWidth": "wide" }))
            .is_err());
        assert!(settings.merged(&json!([1, 2])).is_err());
    }
}
