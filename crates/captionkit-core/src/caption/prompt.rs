//! Prompt shaping and caption post-processing.
//!
//! Each model family expects its own prompt template and echoes the prompt
//! back differently, so both directions are keyed on [`ModelType`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const DEFAULT_PROMPT: &str = "Describe the image in twenty words or less.";

/// Grounding markup emitted by Kosmos-2.
static KOSMOS_MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<object>.*?</object>|</?phrase>|</?grounding>|<patch_index_\d+>|</delimiter_of_multi_objects/>")
        .expect("kosmos markup regex must compile")
});

static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("space regex must compile"));

/// Model families with special prompt handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Llava,
    Kosmos,
    Cogvlm,
    Other,
}

impl ModelType {
    pub fn from_model_id(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("llava") {
            Self::Llava
        } else if id.contains("kosmos") {
            Self::Kosmos
        } else if id.contains("cogvlm") {
            Self::Cogvlm
        } else {
            Self::Other
        }
    }
}

/// Wrap the user's prompt in the model's template.
pub fn processed_prompt(prompt: &str, model_type: ModelType) -> String {
    match model_type {
        ModelType::Llava => {
            let prompt = if prompt.is_empty() { DEFAULT_PROMPT } else { prompt };
            format!("USER: <image>\n{}\nASSISTANT:", prompt)
        }
        ModelType::Kosmos => format!("<grounding>{}", prompt),
        ModelType::Cogvlm if prompt.is_empty() => DEFAULT_PROMPT.to_string(),
        ModelType::Cogvlm | ModelType::Other => prompt.to_string(),
    }
}

/// Text fed to the processor alongside the image.
///
/// CogVLM gets the bare prompt; its caption start is applied through
/// [`format_cogvlm_prompt`] instead.
pub fn input_text(prompt: &str, caption_start: &str, model_type: ModelType) -> String {
    if model_type == ModelType::Cogvlm {
        prompt.to_string()
    } else if !prompt.is_empty() && !caption_start.is_empty() {
        format!("{} {}", prompt, caption_start)
    } else {
        format!("{}{}", prompt, caption_start)
    }
}

pub fn format_cogvlm_prompt(prompt: &str, caption_start: &str) -> String {
    let mut formatted = format!("Question: {} Answer:", prompt);
    if !caption_start.trim().is_empty() {
        formatted.push(' ');
        formatted.push_str(caption_start);
    }
    formatted
}

/// Strip Kosmos-2 grounding markup from generated text.
pub fn strip_kosmos_markup(text: &str) -> String {
    let stripped = KOSMOS_MARKUP_RE.replace_all(text, "");
    MULTI_SPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Options that shape the final caption.
#[derive(Debug, Clone, Copy)]
pub struct CaptionCleanup<'a> {
    pub caption_start: &'a str,
    /// Replace occurrences of this separator with a space.
    pub remove_separator: Option<&'a str>,
}

/// Turn decoded model output into a caption.
///
/// `prompt` is the processed prompt that was sent. The prompt echo is removed
/// and the caption start is kept at the front.
pub fn caption_from_generated_text(
    generated_text: &str,
    prompt: &str,
    model_type: ModelType,
    cleanup: CaptionCleanup<'_>,
) -> String {
    let (generated, prompt) = match model_type {
        ModelType::Llava => (generated_text.to_string(), prompt.replace("<image>", " ")),
        ModelType::Kosmos => (
            strip_kosmos_markup(generated_text),
            prompt.replace("<grounding>", ""),
        ),
        ModelType::Cogvlm => (
            generated_text.to_string(),
            format!("Question: {} Answer:", prompt),
        ),
        ModelType::Other => (generated_text.to_string(), prompt.to_string()),
    };

    let caption_start = cleanup.caption_start;
    let caption = if !prompt.trim().is_empty() && generated.starts_with(&prompt) {
        generated[prompt.len()..].to_string()
    } else if !caption_start.trim().is_empty() && generated.starts_with(caption_start) {
        generated
    } else {
        format!("{} {}", caption_start.trim(), generated.trim())
    };

    let caption = caption.trim();
    match cleanup.remove_separator {
        Some(separator) if !separator.is_empty() => caption.replace(separator, " "),
        _ => caption.to_string(),
    }
}

/// Parse the forced-words field into groups of alternatives.
///
/// Groups are comma separated and alternatives inside a group are `|`
/// separated; `\,` and `\|` escape the delimiters. Blank input means none.
pub fn parse_forced_words(input: &str) -> Option<Vec<Vec<String>>> {
    if input.trim().is_empty() {
        return None;
    }
    let groups = split_unescaped(input, ',')
        .into_iter()
        .map(|group| {
            let group = group.trim().replace("\\,", ",");
            split_unescaped(&group, '|')
                .into_iter()
                .map(|word| word.trim().replace("\\|", "|"))
                .collect()
        })
        .collect();
    Some(groups)
}

/// Split on `delimiter` unless it follows a backslash. Escapes are kept.
fn split_unescaped(input: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut previous = None;
    for c in input.chars() {
        if c == delimiter && previous != Some('\\') {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        previous = Some(c);
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleanup<'a>(caption_start: &'a str, separator: Option<&'a str>) -> CaptionCleanup<'a> {
        CaptionCleanup {
            caption_start,
            remove_separator: separator,
        }
    }

    #[test]
    fn test_model_type_detection() {
        assert_eq!(ModelType::from_model_id("llava-hf/bakLlava-v1-hf"), ModelType::Llava);
        assert_eq!(
            ModelType::from_model_id("microsoft/kosmos-2-patch14-224"),
            ModelType::Kosmos
        );
        assert_eq!(ModelType::from_model_id("THUDM/CogVLM-chat-hf"), ModelType::Cogvlm);
        assert_eq!(
            ModelType::from_model_id("Salesforce/blip2-opt-2.7b"),
            ModelType::Other
        );
    }

    #[test]
    fn test_processed_prompts() {
        assert_eq!(
            processed_prompt("", ModelType::Llava),
            "USER: <image>\nDescribe the image in twenty words or less.\nASSISTANT:"
        );
        assert_eq!(processed_prompt("A photo of", ModelType::Kosmos), "<grounding>A photo of");
        assert_eq!(processed_prompt("", ModelType::Cogvlm), DEFAULT_PROMPT);
        assert_eq!(processed_prompt("", ModelType::Other), "");
    }

    #[test]
    fn test_input_text() {
        assert_eq!(input_text("Describe", "A cat", ModelType::Other), "Describe A cat");
        assert_eq!(input_text("", "A cat", ModelType::Other), "A cat");
        assert_eq!(input_text("Describe", "A cat", ModelType::Cogvlm), "Describe");
        assert_eq!(
            format_cogvlm_prompt("Describe", "A cat"),
            "Question: Describe Answer: A cat"
        );
        assert_eq!(format_cogvlm_prompt("Describe", "  "), "Question: Describe Answer:");
    }

    #[test]
    fn test_llava_prompt_echo_removed() {
        let prompt = processed_prompt("Describe the cat.", ModelType::Llava);
        let generated = "USER:  \nDescribe the cat.\nASSISTANT: A tabby cat, asleep.";
        assert_eq!(
            caption_from_generated_text(generated, &prompt, ModelType::Llava, cleanup("", Some(", "))),
            "A tabby cat asleep."
        );
    }

    #[test]
    fn test_caption_start_is_kept() {
        assert_eq!(
            caption_from_generated_text(
                "a cat sitting on a mat",
                "",
                ModelType::Other,
                cleanup("a cat", None)
            ),
            "a cat sitting on a mat"
        );
        assert_eq!(
            caption_from_generated_text("sitting on a mat", "", ModelType::Other, cleanup("a cat ", None)),
            "a cat sitting on a mat"
        );
    }

    #[test]
    fn test_cogvlm_echo() {
        let generated = "Question: Describe Answer: A dog running";
        assert_eq!(
            caption_from_generated_text(generated, "Describe", ModelType::Cogvlm, cleanup("", None)),
            "A dog running"
        );
    }

    #[test]
    fn test_kosmos_markup() {
        let generated = "<grounding> A photo of<phrase> a snowman</phrase><object><patch_index_0044><patch_index_0863></object> warming himself";
        let caption = caption_from_generated_text(
            generated,
            "<grounding>A photo of",
            ModelType::Kosmos,
            cleanup("", None),
        );
        assert_eq!(caption, "a snowman warming himself");
    }

    #[test]
    fn test_forced_words() {
        assert_eq!(parse_forced_words("   "), None);
        assert_eq!(
            parse_forced_words("cat|kitten, black\\, white, a\\|b"),
            Some(vec![
                vec!["cat".to_string(), "kitten".to_string()],
                vec!["black, white".to_string()],
                vec!["a|b".to_string()],
            ])
        );
    }
}
