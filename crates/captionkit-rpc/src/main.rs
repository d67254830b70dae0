//! CaptionKit RPC Server - JSON-RPC backend for the tagging frontend.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the captionkit-core
//! library: dataset editing, manifest checks and background captioning.

mod handlers;
mod server;
mod wrapper;

use anyhow::Result;
use captionkit_core::config::AppConfig;
use captionkit_core::{CaptionManager, ImageLibrary, RemoteCaptionBackend, SettingsStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "captionkit-rpc")]
#[command(about = "JSON-RPC server for CaptionKit")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Root directory for settings and trash (defaults to the user data dir)
    #[arg(long)]
    data_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting CaptionKit RPC Server");

    let data_root = match args.data_root {
        Some(path) => path,
        None => match dirs::data_dir() {
            Some(dir) => dir.join(AppConfig::APP_NAME),
            None => std::env::current_dir()?,
        },
    };
    info!("Data root: {}", data_root.display());

    let settings_store = SettingsStore::new(&data_root);
    let settings = settings_store.load()?;

    let backend = Arc::new(RemoteCaptionBackend::new(Some(settings.inference_server_url.as_str()))?);
    info!("Inference server: {}", backend.base_url());
    let captions = CaptionManager::new(backend.clone());

    // Reopen the last directory like the desktop app did
    let mut library = ImageLibrary::new(settings.separator());
    if let Some(dir) = settings.directory_path.as_deref() {
        match library.load_directory(dir) {
            Ok(count) => info!("Reopened {} ({} images)", dir.display(), count),
            Err(e) => warn!("Could not reopen {}: {}", dir.display(), e),
        }
    }

    let state = Arc::new(server::AppState {
        library: Arc::new(tokio::sync::RwLock::new(library)),
        settings: settings_store,
        captions,
        backend,
        data_root,
    });

    // Start the server
    let addr = server::start_server(state.clone(), &args.host, args.port).await?;

    // Print port for the frontend to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    if let Err(e) = state.captions.shutdown().await {
        warn!("Failed to unload caption model: {}", e);
    }

    Ok(())
}
