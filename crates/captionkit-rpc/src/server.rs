//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use captionkit_core::config::PathsConfig;
use captionkit_core::{CaptionBackend, CaptionManager, ImageLibrary, SettingsStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// The open image directory
    pub library: Arc<RwLock<ImageLibrary>>,
    /// Persisted user settings
    pub settings: SettingsStore,
    /// Background captioning
    pub captions: CaptionManager,
    /// Inference server used by `captions`, kept for health checks
    pub backend: Arc<dyn CaptionBackend>,
    /// Root for settings and trash
    pub data_root: PathBuf,
}

impl AppState {
    /// Deleted images are moved here.
    pub fn trash_dir(&self) -> PathBuf {
        self.data_root
            .join(PathsConfig::DATA_DIR_NAME)
            .join(PathsConfig::TRASH_DIR_NAME)
    }
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .with_state(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use captionkit_core::RemoteCaptionBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(RemoteCaptionBackend::new(None).unwrap());
        let state = Arc::new(AppState {
            library: Arc::new(RwLock::new(ImageLibrary::new(","))),
            settings: SettingsStore::new(temp_dir.path()),
            captions: CaptionManager::new(backend.clone()),
            backend,
            data_root: temp_dir.path().to_path_buf(),
        });

        let addr = start_server(state.clone(), "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
        assert!(state.trash_dir().ends_with("captionkit-data/trash"));
    }
}
