//! Response wrapping for frontend compatibility.
//!
//! The frontend expects responses in the format `{success: bool, ...data, error?: string}`.
//! Handlers that return raw data are wrapped here; handlers that build the
//! structured response themselves pass through.

use serde_json::{json, Value};

/// Wrap handler results to match the frontend's expected format.
pub fn wrap_response(method: &str, result: Value) -> Value {
    match method {
        // List wrappers
        "get_images" | "filter_images" => {
            json!({
                "success": true,
                "images": if result.is_null() { json!([]) } else { result }
            })
        }

        "list_caption_models" => {
            json!({
                "success": true,
                "models": if result.is_null() { json!([]) } else { result }
            })
        }

        // Dict wrappers
        "get_settings" | "get_caption_settings" => {
            json!({
                "success": true,
                "settings": if result.is_null() { json!({}) } else { result }
            })
        }

        "get_caption_progress" => {
            json!({
                "success": true,
                "progress": if result.is_null() { json!({}) } else { result }
            })
        }

        "check_manifest" => {
            json!({
                "success": true,
                "report": if result.is_null() { json!({}) } else { result }
            })
        }

        // Bool methods
        "update_tags" | "cancel_captioning" => {
            json!({
                "success": result.as_bool().unwrap_or(false)
            })
        }

        // Structured response methods (handler returns {success, ...} directly)
        "resolve_manifest"
        | "update_settings"
        | "save_caption_settings"
        | "load_directory"
        | "paste_tags"
        | "get_tags_text"
        | "move_images"
        | "copy_images"
        | "delete_images"
        | "first_untagged_image"
        | "generate_captions" => result,

        // Default: return as-is (for methods not explicitly handled)
        _ => result,
    }
}
