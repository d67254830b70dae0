//! Caption settings and where generated captions go.

use crate::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};

/// Where a generated caption is placed in an image's tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPosition {
    #[default]
    BeforeFirstTag,
    AfterLastTag,
    OverwriteFirstTag,
    OverwriteAllTags,
    DoNotAdd,
}

impl CaptionPosition {
    pub const ALL: [CaptionPosition; 5] = [
        Self::BeforeFirstTag,
        Self::AfterLastTag,
        Self::OverwriteFirstTag,
        Self::OverwriteAllTags,
        Self::DoNotAdd,
    ];

    /// Human-readable label for selection lists.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BeforeFirstTag => "Insert before first tag",
            Self::AfterLastTag => "Insert after last tag",
            Self::OverwriteFirstTag => "Overwrite first tag",
            Self::OverwriteAllTags => "Overwrite all tags",
            Self::DoNotAdd => "Do not add to tags",
        }
    }
}

/// Return `tags` with `caption` added according to `position`.
///
/// The input is never modified.
pub fn add_caption_to_tags(tags: &[String], caption: &str, position: CaptionPosition) -> Vec<String> {
    let mut tags = tags.to_vec();
    match position {
        CaptionPosition::DoNotAdd => {}
        CaptionPosition::BeforeFirstTag => tags.insert(0, caption.to_string()),
        CaptionPosition::AfterLastTag => tags.push(caption.to_string()),
        CaptionPosition::OverwriteFirstTag => match tags.first_mut() {
            Some(first) => *first = caption.to_string(),
            None => tags.push(caption.to_string()),
        },
        CaptionPosition::OverwriteAllTags => tags = vec![caption.to_string()],
    }
    tags
}

/// Requested device for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// GPU if the backend reports one, otherwise CPU.
    #[default]
    Gpu,
    Cpu,
}

impl Device {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gpu => "GPU if available",
            Self::Cpu => "CPU",
        }
    }
}

/// Keyword arguments for the model's `generate` call, hence snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    pub min_new_tokens: u32,
    pub max_new_tokens: u32,
    pub num_beams: u32,
    pub length_penalty: f64,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub repetition_penalty: f64,
    pub no_repeat_ngram_size: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            min_new_tokens: 1,
            max_new_tokens: 100,
            num_beams: 1,
            length_penalty: 1.0,
            do_sample: false,
            temperature: 1.0,
            top_k: 50,
            top_p: 1.0,
            repetition_penalty: 1.0,
            no_repeat_ngram_size: 3,
        }
    }
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(CaptionKitError::validation(
            field,
            format!("{} is outside {}..={}", value, min, max),
        ));
    }
    Ok(())
}

impl GenerationParameters {
    pub fn validate(&self) -> Result<()> {
        check_range("min_new_tokens", self.min_new_tokens, 1, 999)?;
        check_range("max_new_tokens", self.max_new_tokens, 1, 999)?;
        if self.min_new_tokens > self.max_new_tokens {
            return Err(CaptionKitError::validation(
                "min_new_tokens",
                "minimum tokens must not exceed maximum tokens",
            ));
        }
        check_range("num_beams", self.num_beams, 1, 99)?;
        check_range("length_penalty", self.length_penalty, -5.0, 5.0)?;
        check_range("temperature", self.temperature, 0.01, 2.0)?;
        check_range("top_k", self.top_k, 0, 200)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("repetition_penalty", self.repetition_penalty, 1.0, 2.0)?;
        check_range("no_repeat_ngram_size", self.no_repeat_ngram_size, 0, 5)?;
        Ok(())
    }
}

/// Everything the auto-captioner needs besides the images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptionSettings {
    pub prompt: String,
    /// Text the caption is forced to start with.
    pub caption_start: String,
    /// Words to include, see [`parse_forced_words`](super::parse_forced_words).
    pub forced_words: String,
    pub caption_position: CaptionPosition,
    /// Hub model id or a path relative to the models directory.
    pub model: String,
    pub device: Device,
    pub load_in_4_bit: bool,
    pub remove_tag_separators: bool,
    pub generation_parameters: GenerationParameters,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            caption_start: String::new(),
            forced_words: String::new(),
            caption_position: CaptionPosition::default(),
            model: super::MODELS[0].to_string(),
            device: Device::default(),
            load_in_4_bit: true,
            remove_tag_separators: true,
            generation_parameters: GenerationParameters::default(),
        }
    }
}

impl CaptionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(CaptionKitError::validation("model", "no model selected"));
        }
        self.generation_parameters.validate()?;
        // Constrained beam search needs more than one beam.
        if !self.forced_words.trim().is_empty() && self.generation_parameters.num_beams < 2 {
            return Err(CaptionKitError::validation(
                "num_beams",
                "Number of beams must be greater than 1 when forced words are set",
            ));
        }
        Ok(())
    }
}
