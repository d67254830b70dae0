//! Captioning handlers.

use super::{get_object_param, require_paths_param};
use crate::server::AppState;
use captionkit_core::caption::{available_models, CaptionSettings};
use captionkit_core::{CaptionKitError, Result};
use serde_json::{json, Value};

/// Stored caption settings, with an optional partial `settings` object merged
/// on top. The result is validated.
fn caption_settings_from_params(state: &AppState, params: &Value) -> Result<CaptionSettings> {
    let stored = state.settings.load()?;
    match get_object_param(params, "settings", "settings") {
        Some(patch) => Ok(stored
            .merged(&json!({ "captionSettings": patch }))?
            .caption_settings),
        None => Ok(stored.caption_settings),
    }
}

pub async fn get_caption_settings(state: &AppState, _params: &Value) -> Result<Value> {
    Ok(serde_json::to_value(state.settings.load()?.caption_settings)?)
}

pub async fn save_caption_settings(state: &AppState, params: &Value) -> Result<Value> {
    let caption_settings = caption_settings_from_params(state, params)?;
    let saved = state.settings.update(|settings| {
        settings.caption_settings = caption_settings;
    })?;
    Ok(json!({
        "success": true,
        "settings": serde_json::to_value(&saved.caption_settings)?,
    }))
}

pub async fn list_caption_models(state: &AppState, _params: &Value) -> Result<Value> {
    let models_dir = state.settings.load()?.models_directory_path;
    Ok(json!(available_models(models_dir.as_deref())))
}

pub async fn generate_captions(state: &AppState, params: &Value) -> Result<Value> {
    let paths = require_paths_param(params, "paths", "paths")?;
    if paths.is_empty() {
        return Err(CaptionKitError::InvalidParams {
            message: "paths must not be empty".to_string(),
        });
    }
    let caption_settings = caption_settings_from_params(state, params)?;
    let models_dir = state.settings.load()?.models_directory_path;

    let total = state
        .captions
        .start(state.library.clone(), &paths, caption_settings, models_dir)
        .await?;
    Ok(json!({
        "success": true,
        "total": total,
    }))
}

pub async fn get_caption_progress(state: &AppState, _params: &Value) -> Result<Value> {
    Ok(serde_json::to_value(state.captions.progress())?)
}

pub async fn cancel_captioning(state: &AppState, _params: &Value) -> Result<Value> {
    Ok(json!(state.captions.cancel()))
}
