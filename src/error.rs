//! Error types for the turn-taking engine.

/// Top-level error type for the voice agent.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// A capture read lost samples because the device buffer overflowed.
    ///
    /// Recoverable: callers skip the frame and keep going.
    #[error("audio overflow: {0}")]
    Overflow(String),

    /// A frame read or write did not complete within the device timeout.
    ///
    /// Recoverable, like [`SpeechError::Overflow`].
    #[error("audio frame timeout: {0}")]
    FrameTimeout(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Conversation memory storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Turn orchestration error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpeechError {
    /// Whether this error only costs a single frame and the loop may continue.
    #[must_use]
    pub fn is_recoverable_frame_error(&self) -> bool {
        matches!(self, Self::Overflow(_) | Self::FrameTimeout(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
