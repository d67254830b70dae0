//! JSON-RPC request handlers, split by domain.

mod caption;
mod dataset;
mod manifest;
mod settings;

use crate::server::AppState;
use crate::wrapper::wrap_response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use captionkit_core::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

fn get_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    params.get(snake).or_else(|| params.get(camel))
}

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    get_param(params, snake, camel).and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(params: &Value, snake: &str, camel: &str) -> Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| CaptionKitError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract a required list of paths.
pub(crate) fn require_paths_param(params: &Value, snake: &str, camel: &str) -> Result<Vec<PathBuf>> {
    let value = get_param(params, snake, camel).ok_or_else(|| CaptionKitError::InvalidParams {
        message: format!("Missing required parameter: {}", snake),
    })?;
    let items = value.as_array().ok_or_else(|| CaptionKitError::InvalidParams {
        message: format!("{} must be an array of paths", snake),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(PathBuf::from)
                .ok_or_else(|| CaptionKitError::InvalidParams {
                    message: format!("{} must contain only strings", snake),
                })
        })
        .collect()
}

/// Extract a required list of strings.
pub(crate) fn require_str_list_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> Result<Vec<String>> {
    Ok(require_paths_param(params, snake, camel)?
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}

/// Extract an optional object parameter, supporting both snake_case and camelCase.
pub(crate) fn get_object_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    get_param(params, snake, camel).filter(|v| v.is_object())
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    // Dispatch to API methods
    let result = dispatch_method(&state, method, &params).await;

    match result {
        Ok(value) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> Result<Value> {
    match method {
        // Status
        "health_check" => health_check(state).await,

        // Manifest
        "check_manifest" => manifest::check_manifest(state, params).await,
        "resolve_manifest" => manifest::resolve_manifest(state, params).await,

        // Settings
        "get_settings" => settings::get_settings(state, params).await,
        "update_settings" => settings::update_settings(state, params).await,

        // Dataset
        "load_directory" => dataset::load_directory(state, params).await,
        "get_images" => dataset::get_images(state, params).await,
        "filter_images" => dataset::filter_images(state, params).await,
        "update_tags" => dataset::update_tags(state, params).await,
        "paste_tags" => dataset::paste_tags(state, params).await,
        "get_tags_text" => dataset::get_tags_text(state, params).await,
        "move_images" => dataset::move_images(state, params).await,
        "copy_images" => dataset::copy_images(state, params).await,
        "delete_images" => dataset::delete_images(state, params).await,
        "first_untagged_image" => dataset::first_untagged_image(state, params).await,

        // Captioning
        "get_caption_settings" => caption::get_caption_settings(state, params).await,
        "save_caption_settings" => caption::save_caption_settings(state, params).await,
        "list_caption_models" => caption::list_caption_models(state, params).await,
        "generate_captions" => caption::generate_captions(state, params).await,
        "get_caption_progress" => caption::get_caption_progress(state, params).await,
        "cancel_captioning" => caption::cancel_captioning(state, params).await,

        // Unknown method
        _ => {
            warn!("Method not found: {}", method);
            Err(CaptionKitError::MethodNotFound(method.to_string()))
        }
    }
}

async fn health_check(state: &AppState) -> Result<Value> {
    let inference = state.backend.health_check().await.unwrap_or(false);
    Ok(json!({
        "status": "ok",
        "inference_server": inference,
        "captioning": state.captions.is_running(),
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"data": "test"}));
        assert!(response.error.is_none());
        assert!(response.result.is_some());
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32600, "Test error".into());
        assert!(response.error.is_some());
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[test]
    fn test_params_accept_both_cases() {
        let params = json!({"directoryPath": "/a", "tag_separator": ","});
        assert_eq!(get_str_param(&params, "directory_path", "directoryPath"), Some("/a"));
        assert_eq!(get_str_param(&params, "tag_separator", "tagSeparator"), Some(","));
        assert!(require_str_param(&params, "path", "path").is_err());
    }

    #[test]
    fn test_require_paths_param() {
        let params = json!({"paths": ["/a.png", "/b.png"]});
        let paths = require_paths_param(&params, "paths", "paths").unwrap();
        assert_eq!(paths, vec![PathBuf::from("/a.png"), PathBuf::from("/b.png")]);

        let err = require_paths_param(&json!({"paths": "/a.png"}), "paths", "paths").unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32602);

        let err = require_paths_param(&json!({"paths": [1]}), "paths", "paths").unwrap_err();
        assert!(matches!(err, CaptionKitError::InvalidParams { .. }));
    }
}
