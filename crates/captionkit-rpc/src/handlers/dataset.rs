//! Image directory and tag editing handlers.

use super::{get_str_param, require_paths_param, require_str_list_param, require_str_param};
use crate::server::AppState;
use captionkit_core::dataset::{Filter, ImageEntry, TransferReport};
use captionkit_core::Result;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// An image as the frontend lists it.
fn image_json(entry: &ImageEntry, separator: &str, width: u32) -> Value {
    let (thumb_width, thumb_height) = entry.scaled_size(width);
    json!({
        "path": entry.path,
        "fileName": entry.file_name(),
        "dimensions": entry.dimensions,
        "tags": entry.tags,
        "caption": entry.caption(separator),
        "thumbnailSize": [thumb_width, thumb_height],
    })
}

fn report_json(report: TransferReport) -> Result<Value> {
    let mut value = serde_json::to_value(report)?;
    value["success"] = json!(true);
    Ok(value)
}

fn filter_param(params: &Value) -> Result<Option<Filter>> {
    match get_str_param(params, "filter", "filter") {
        Some(text) => Filter::parse(text),
        None => Ok(None),
    }
}

async fn list_images(state: &AppState, filter: Option<&Filter>) -> Result<Value> {
    let width = state.settings.load()?.image_list_image_width;
    let library = state.library.read().await;
    let images: Vec<Value> = library
        .filtered(filter)
        .into_iter()
        .map(|entry| image_json(entry, library.separator(), width))
        .collect();
    Ok(Value::Array(images))
}

pub async fn load_directory(state: &AppState, params: &Value) -> Result<Value> {
    let path = PathBuf::from(require_str_param(params, "path", "path")?);

    let count = {
        let mut library = state.library.write().await;
        library.load_directory(&path)?
    };
    state.settings.update(|settings| {
        settings.directory_path = Some(path.clone());
    })?;
    info!("Opened {} ({} images)", path.display(), count);

    Ok(json!({
        "success": true,
        "directory": path,
        "count": count,
    }))
}

pub async fn get_images(state: &AppState, _params: &Value) -> Result<Value> {
    list_images(state, None).await
}

pub async fn filter_images(state: &AppState, params: &Value) -> Result<Value> {
    let filter = filter_param(params)?;
    list_images(state, filter.as_ref()).await
}

pub async fn update_tags(state: &AppState, params: &Value) -> Result<Value> {
    let path = PathBuf::from(require_str_param(params, "path", "path")?);
    let tags = require_str_list_param(params, "tags", "tags")?;
    state.library.write().await.update_tags(&path, tags)?;
    Ok(json!(true))
}

pub async fn paste_tags(state: &AppState, params: &Value) -> Result<Value> {
    let text = require_str_param(params, "text", "text")?;
    let paths = require_paths_param(params, "paths", "paths")?;
    let updated = state.library.write().await.paste_tags(&text, &paths)?;
    Ok(json!({
        "success": true,
        "updated": updated,
    }))
}

pub async fn get_tags_text(state: &AppState, params: &Value) -> Result<Value> {
    let paths = require_paths_param(params, "paths", "paths")?;
    let text = state.library.read().await.tags_text(&paths)?;
    Ok(json!({
        "success": true,
        "text": text,
    }))
}

pub async fn move_images(state: &AppState, params: &Value) -> Result<Value> {
    let paths = require_paths_param(params, "paths", "paths")?;
    let destination = require_str_param(params, "destination", "destination")?;
    let report = state
        .library
        .write()
        .await
        .move_images(&paths, Path::new(&destination))?;
    report_json(report)
}

pub async fn copy_images(state: &AppState, params: &Value) -> Result<Value> {
    let paths = require_paths_param(params, "paths", "paths")?;
    let destination = require_str_param(params, "destination", "destination")?;
    let report = state
        .library
        .read()
        .await
        .copy_images(&paths, Path::new(&destination))?;
    report_json(report)
}

pub async fn delete_images(state: &AppState, params: &Value) -> Result<Value> {
    let paths = require_paths_param(params, "paths", "paths")?;
    let trash = state.trash_dir();
    let report = state.library.write().await.delete_images(&paths, &trash)?;
    report_json(report)
}

pub async fn first_untagged_image(state: &AppState, params: &Value) -> Result<Value> {
    let filter = filter_param(params)?;
    let library = state.library.read().await;
    let index = library.first_untagged_index(filter.as_ref());
    let path = index.and_then(|i| {
        library
            .filtered(filter.as_ref())
            .get(i)
            .map(|entry| entry.path.clone())
    });
    Ok(json!({
        "success": true,
        "index": index,
        "path": path,
    }))
}
