//! Automatic captioning.
//!
//! Settings and prompt handling live here; model execution is delegated to a
//! [`CaptionBackend`]. [`CaptionManager`] runs one captioning job at a time in
//! the background and writes the resulting tags back through the library.

mod backend;
mod models;
mod prompt;
mod runner;
mod settings;

pub use backend::{
    CaptionBackend, DeviceCapabilities, GenerationRequest, ModelLoadRequest, RemoteCaptionBackend,
};
pub use models::{
    available_models, effective_load_in_4_bit, list_local_model_paths, resolve_model_id,
    ResolvedDevice, MODELS,
};
pub use prompt::{
    caption_from_generated_text, format_cogvlm_prompt, input_text, parse_forced_words,
    processed_prompt, strip_kosmos_markup, CaptionCleanup, ModelType,
};
pub use runner::{
    CaptionJob, CaptionManager, CaptionProgress, CaptionResult, CaptionState, Captioner,
};
pub use settings::{
    add_caption_to_tags, CaptionPosition, CaptionSettings, Device, GenerationParameters,
};
