//! Captioning model catalogue and local model discovery.

use super::settings::Device;
use crate::config::PathsConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Hub models offered by default, first entry is the default selection.
pub const MODELS: &[&str] = &[
    "THUDM/cogvlm-chat-hf",
    "llava-hf/llava-1.5-7b-hf",
    "llava-hf/llava-1.5-13b-hf",
    "llava-hf/bakLlava-v1-hf",
    "Salesforce/instructblip-vicuna-7b",
    "Salesforce/instructblip-vicuna-13b",
    "Salesforce/instructblip-flan-t5-xl",
    "Salesforce/instructblip-flan-t5-xxl",
    "Salesforce/blip2-opt-2.7b",
    "Salesforce/blip2-opt-6.7b",
    "Salesforce/blip2-opt-6.7b-coco",
    "Salesforce/blip2-flan-t5-xl",
    "Salesforce/blip2-flan-t5-xxl",
    "microsoft/kosmos-2-patch14-224",
];

/// Name under which a models directory that is itself a model is listed.
const CURRENT_DIR: &str = ".";

/// Directories under `models_dir` (itself included) that hold a model
/// `config.json`, as sorted paths relative to `models_dir`. `models_dir`
/// itself is listed as `.`.
///
/// A missing or non-directory path gives an empty list.
pub fn list_local_model_paths(models_dir: &Path) -> Vec<String> {
    if !models_dir.is_dir() {
        return Vec::new();
    }
    info!(
        "Loading local captioning model paths under {}",
        models_dir.display()
    );

    let mut paths: Vec<String> = WalkDir::new(models_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable model path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.path().join(PathsConfig::MODEL_CONFIG_FILENAME).is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(models_dir)
                .ok()
                .map(|rel| {
                    if rel.as_os_str().is_empty() {
                        CURRENT_DIR.to_string()
                    } else {
                        rel.to_string_lossy().replace('\\', "/")
                    }
                })
        })
        .collect();
    paths.sort();

    info!("Found {} local model paths", paths.len());
    paths
}

/// Every selectable model: local paths first, then the hub catalogue.
pub fn available_models(models_dir: Option<&Path>) -> Vec<String> {
    let mut models = models_dir.map(list_local_model_paths).unwrap_or_default();
    models.extend(MODELS.iter().map(|m| m.to_string()));
    models
}

/// Resolve a model selection to what the backend should load: a local
/// directory when `<models_dir>/<model_id>/config.json` exists, otherwise
/// the id unchanged.
pub fn resolve_model_id(model_id: &str, models_dir: Option<&Path>) -> String {
    if let Some(dir) = models_dir {
        let candidate: PathBuf = match model_id {
            CURRENT_DIR => dir.to_path_buf(),
            _ => dir.join(model_id),
        };
        if candidate.join(PathsConfig::MODEL_CONFIG_FILENAME).is_file() {
            debug!("Using local model at {}", candidate.display());
            return candidate.to_string_lossy().into_owned();
        }
    }
    model_id.to_string()
}

/// Only GPUs support 4-bit quantisation, and only with bitsandbytes present.
pub fn effective_load_in_4_bit(requested: bool, device: ResolvedDevice, supported: bool) -> bool {
    requested && supported && device == ResolvedDevice::Cuda
}

/// The device a model actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedDevice {
    Cuda,
    Cpu,
}

impl ResolvedDevice {
    pub fn resolve(requested: Device, cuda_available: bool) -> Self {
        match requested {
            Device::Gpu if cuda_available => Self::Cuda,
            _ => Self::Cpu,
        }
    }

    /// Device string as understood by the inference server.
    pub fn as_server_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda:0",
            Self::Cpu => "cpu",
        }
    }
}
