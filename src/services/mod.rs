//! Speech-to-text, language model and text-to-speech collaborators.
//!
//! The turn engine treats all three as opaque, possibly slow, possibly
//! failing services behind these traits. [`openai`] talks to any
//! OpenAI-compatible HTTP server; [`tts_cache`] wraps a synthesizer with a
//! content-addressed cache.

pub mod openai;
pub mod tts_cache;

use crate::audio::Waveform;
use crate::error::Result;
use crate::memory::ContextMessage;
use async_trait::async_trait;
use std::path::Path;

/// Turns a recorded utterance into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe the WAV file at `wav_path`.
    ///
    /// Silence yields an empty string, not an error.
    ///
    /// # Errors
    ///
    /// Returns an STT error when the audio is malformed or the service fails.
    async fn transcribe(&self, wav_path: &Path) -> Result<String>;
}

/// Produces the assistant's reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` given the conversation so far.
    ///
    /// `context` may already end with `prompt` as a user message.
    ///
    /// # Errors
    ///
    /// Returns an LLM error when the service fails.
    async fn complete(&self, prompt: &str, context: &[ContextMessage]) -> Result<String>;
}

/// Turns reply text into audio.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text`. `None` means there is nothing to play.
    ///
    /// # Errors
    ///
    /// Returns a TTS error when synthesis fails.
    async fn synthesize(&self, text: &str) -> Result<Option<Waveform>>;
}
