//! Persistence helpers.
//!
//! Settings files and caption sidecars are both written through the atomic
//! helpers here so a crash never leaves a half-written file behind.

mod atomic;
mod settings;

pub use atomic::{atomic_read_json, atomic_read_text, atomic_write_json, atomic_write_text};
pub use settings::{Settings, SettingsStore};
