//! System prompt assembly.
//!
//! The prompt is built from three layers:
//!
//! 1. **Core prompt** ([`CORE_PROMPT`]): voice output rules, always present.
//! 2. **Personality**: the contents of `personality.prompt_file`, or
//!    [`DEFAULT_PERSONALITY`] when no file is configured.
//! 3. **Add-on**: the inline `personality.system_prompt` text.

use crate::config::PersonalityConfig;
use crate::error::{Result, SpeechError};
use std::path::Path;

/// Output rules for a spoken assistant.
pub const CORE_PROMPT: &str = "\
You are a voice assistant. Your replies are spoken aloud, so respond in 1-3 short sentences.\n\
Do not use emojis, markdown, lists, or stage directions.\n\
If you do not know the answer, say so briefly.";

/// Built-in character used when no personality file is configured.
pub const DEFAULT_PERSONALITY: &str = "\
Your name is Friday. You are a calm, capable personal assistant with a dry sense of humour.\n\
You remember what the user has told you and use it when it helps.";

/// Read a personality file.
///
/// # Errors
///
/// Returns a config error if the file cannot be read.
pub fn load_personality(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        SpeechError::Config(format!(
            "cannot read personality file {}: {e}",
            path.display()
        ))
    })
}

/// Assemble the full system prompt. Empty layers are skipped.
///
/// # Errors
///
/// Returns a config error if a configured personality file cannot be read.
pub fn assemble_prompt(config: &PersonalityConfig) -> Result<String> {
    let personality = match config.prompt_file {
        Some(ref path) => load_personality(path)?,
        None => DEFAULT_PERSONALITY.to_owned(),
    };

    let mut parts: Vec<&str> = Vec::with_capacity(3);
    parts.push(CORE_PROMPT);
    let personality = personality.trim();
    if !personality.is_empty() {
        parts.push(personality);
    }
    let add_on = config.system_prompt.trim();
    if !add_on.is_empty() {
        parts.push(add_on);
    }
    Ok(parts.join("\n\n"))
}
