//! CaptionKit Core - Headless library for image captioning datasets.
//!
//! This crate covers everything an image tagging frontend needs below the UI:
//!
//! - [`manifest`]: parse and lint the pinned Python dependency manifest of the
//!   model runtime (PEP 508 requirements, environment markers, wheel URLs).
//! - [`dataset`]: load image directories with `.txt` tag sidecars, edit tags,
//!   filter, move, copy and delete images.
//! - [`caption`]: caption settings, prompt templates and caption cleanup, and a
//!   background runner that drives an external inference server.
//! - [`storage`]: atomic file writes and persisted user settings.
//!
//! # Example
//!
//! ```rust,no_run
//! use captionkit_core::manifest::{lint_manifest, load_manifest};
//! use std::path::Path;
//!
//! fn main() -> captionkit_core::Result<()> {
//!     let manifest = load_manifest(Path::new("requirements.txt"))?;
//!     let report = lint_manifest(&manifest);
//!     for issue in &report.issues {
//!         println!("{}", issue);
//!     }
//!     println!("{} requirements, clean: {}", report.requirement_count, report.is_clean());
//!     Ok(())
//! }
//! ```

pub mod caption;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod manifest;
pub mod storage;

// Re-export commonly used types
pub use caption::{
    CaptionBackend, CaptionManager, CaptionProgress, CaptionSettings, CaptionState, Captioner,
    RemoteCaptionBackend,
};
pub use cancel::{CancellationToken, CancelledError};
pub use config::AppConfig;
pub use dataset::{Filter, ImageEntry, ImageLibrary};
pub use error::{CaptionKitError, Result};
pub use manifest::{lint_manifest, load_manifest, parse_manifest, LintReport, Manifest};
pub use storage::{Settings, SettingsStore};
