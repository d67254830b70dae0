//! Dependency manifest handlers.

use super::get_str_param;
use crate::server::AppState;
use captionkit_core::config::PathsConfig;
use captionkit_core::manifest::{
    detect_python_version, lint_manifest, load_manifest, parse_manifest, Manifest,
    MarkerEnvironment,
};
use captionkit_core::Result;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Parse inline `text` if given, else the file at `path`, else the manifest
/// in the data root.
fn manifest_from_params(state: &AppState, params: &Value) -> Result<(Manifest, Option<PathBuf>)> {
    if let Some(text) = get_str_param(params, "text", "text") {
        return Ok((parse_manifest(text)?, None));
    }
    let path = get_str_param(params, "path", "path")
        .map(PathBuf::from)
        .unwrap_or_else(|| state.data_root.join(PathsConfig::MANIFEST_FILENAME));
    Ok((load_manifest(&path)?, Some(path)))
}

pub async fn check_manifest(state: &AppState, params: &Value) -> Result<Value> {
    let (manifest, _) = manifest_from_params(state, params)?;
    let report = lint_manifest(&manifest);
    let mut value = serde_json::to_value(&report)?;
    value["clean"] = json!(report.is_clean());
    Ok(value)
}

pub async fn resolve_manifest(state: &AppState, params: &Value) -> Result<Value> {
    let (manifest, path) = manifest_from_params(state, params)?;

    let python_version = match get_str_param(params, "python_version", "pythonVersion") {
        Some(version) => version.to_string(),
        None => detect_python_version()
            .await
            .unwrap_or_else(|| "3.11".to_string()),
    };
    let env = match get_str_param(params, "platform_system", "platformSystem") {
        Some(system) => MarkerEnvironment::for_platform(system, &python_version),
        None => MarkerEnvironment::host(&python_version),
    };

    let active: Vec<_> = manifest.active_requirements(&env).collect();
    Ok(json!({
        "success": true,
        "path": path,
        "environment": serde_json::to_value(&env)?,
        "requirements": serde_json::to_value(&active)?,
        "pins": manifest.render_pins(&env),
    }))
}
