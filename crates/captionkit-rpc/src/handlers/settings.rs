//! User settings handlers.

use super::get_object_param;
use crate::server::AppState;
use captionkit_core::Result;
use serde_json::{json, Value};
use tracing::info;

pub async fn get_settings(state: &AppState, _params: &Value) -> Result<Value> {
    Ok(serde_json::to_value(state.settings.load()?)?)
}

/// Merge a partial settings object (either `params.settings` or the params
/// themselves) into the stored settings.
pub async fn update_settings(state: &AppState, params: &Value) -> Result<Value> {
    let patch = get_object_param(params, "settings", "settings").unwrap_or(params);
    let previous = state.settings.load()?;
    let updated = previous.merged(patch)?;
    state.settings.save(&updated)?;

    if updated.separator() != previous.separator() {
        let mut library = state.library.write().await;
        library.set_separator(updated.separator());
        let count = library.reload()?;
        info!("Tag separator changed, reloaded {} images", count);
    }

    // The inference client is built once at startup.
    let restart_required = updated.inference_server_url != previous.inference_server_url;

    Ok(json!({
        "success": true,
        "settings": serde_json::to_value(&updated)?,
        "restartRequired": restart_required,
    }))
}
