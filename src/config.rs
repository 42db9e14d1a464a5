//! Configuration types for the turn-taking engine.

use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FridayConfig {
    /// Audio device settings.
    pub audio: AudioConfig,
    /// Voice classifier settings shared by every gate.
    pub vad: VadConfig,
    /// End-of-utterance recording settings.
    pub recorder: RecorderConfig,
    /// Interruptible playback settings.
    pub barge_in: BargeInConfig,
    /// Short-term context and long-term memory settings.
    pub memory: MemoryConfig,
    /// Speech-to-text collaborator.
    pub stt: SttConfig,
    /// Language model collaborator.
    pub llm: LlmConfig,
    /// Text-to-speech collaborator.
    pub tts: TtsConfig,
    /// Assistant persona settings.
    pub personality: PersonalityConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. Frames handed to the gate are always at this rate.
    pub input_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Upper bound on a single frame read or write, in milliseconds.
    ///
    /// A read that does not complete in time is reported as a recoverable
    /// frame timeout instead of blocking the loop.
    pub io_timeout_ms: u64,
    /// Capacity of the device-side sample queues, in milliseconds of audio.
    pub device_buffer_ms: u32,
    /// Sample rate of synthesized speech. A playback chunk at this rate must
    /// fit in the device buffer.
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            input_device: None,
            output_device: None,
            io_timeout_ms: 250,
            device_buffer_ms: 2_000,
            output_sample_rate: 24_000,
        }
    }
}

/// Voice classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Analysis window length in milliseconds (10, 20 or 30).
    pub window_ms: u32,
    /// RMS thresholds for aggressiveness levels 0..=3, on samples scaled to \[-1, 1\].
    ///
    /// Higher levels are more sensitive to speech, so their thresholds are lower.
    pub energy_thresholds: [f32; 4],
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            window_ms: 30,
            energy_thresholds: [0.040, 0.025, 0.015, 0.010],
        }
    }
}

/// Timing and sensitivity for one voice activity gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Classifier aggressiveness, 0..=3 (higher = more sensitive to speech).
    pub aggressiveness: u8,
    /// Continuous speech needed to leave IDLE, in seconds.
    pub speech_seconds: f32,
    /// Continuous silence after speech needed to reach SUCCESS, in seconds.
    pub silence_seconds: f32,
    /// Optional cap on one utterance, in seconds. Exceeding it yields TIMEOUT.
    pub max_seconds: Option<f32>,
}

impl GateConfig {
    /// Slow, strict profile used to detect the end of a user utterance.
    #[must_use]
    pub fn end_of_utterance() -> Self {
        Self {
            aggressiveness: 3,
            speech_seconds: 0.3,
            silence_seconds: 0.5,
            max_seconds: None,
        }
    }

    /// Fast, loose profile used to detect the user talking over playback.
    #[must_use]
    pub fn barge_in() -> Self {
        Self {
            aggressiveness: 2,
            speech_seconds: 0.1,
            silence_seconds: 0.25,
            max_seconds: None,
        }
    }

    /// Validate the profile.
    ///
    /// # Errors
    ///
    /// Returns a config error for an aggressiveness above 3 or non-positive durations.
    pub fn validate(&self) -> Result<()> {
        if self.aggressiveness > 3 {
            return Err(SpeechError::Config(format!(
                "VAD aggressiveness must be 0..=3, got {}",
                self.aggressiveness
            )));
        }
        if self.silence_seconds.is_nan() || self.silence_seconds <= 0.0 {
            return Err(SpeechError::Config(
                "silence_seconds must be positive".into(),
            ));
        }
        if self.speech_seconds < 0.0 {
            return Err(SpeechError::Config(
                "speech_seconds must not be negative".into(),
            ));
        }
        if let Some(max) = self.max_seconds
            && (max.is_nan() || max <= 0.0)
        {
            return Err(SpeechError::Config("max_seconds must be positive".into()));
        }
        Ok(())
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::end_of_utterance()
    }
}

/// End-of-utterance recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Samples per capture frame.
    pub frame_samples: usize,
    /// Gate profile used while recording.
    pub gate: GateConfig,
    /// Directory that receives the transient WAV artifact handed to STT.
    pub scratch_dir: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_samples: 960,
            gate: GateConfig::end_of_utterance(),
            scratch_dir: crate::app_dirs::scratch_dir(),
        }
    }
}

/// Interruptible playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Whether assistant speech can be interrupted by the user.
    pub enabled: bool,
    /// Samples per capture frame polled between playback chunks.
    pub capture_frame_samples: usize,
    /// Samples per playback chunk written each loop iteration.
    pub playback_chunk_samples: usize,
    /// Gate profile used to detect barge-in.
    pub gate: GateConfig,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_frame_samples: 512,
            playback_chunk_samples: 1536,
            gate: GateConfig::barge_in(),
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// JSON file backing the long-term store.
    pub store_path: PathBuf,
    /// Maximum messages kept in the short-term context window.
    pub max_context: usize,
    /// Seconds of inactivity after which non-important context is dropped.
    pub inactivity_timeout_secs: u64,
    /// Optional JSON file mirroring the short-term context window.
    pub context_path: Option<PathBuf>,
    /// Maximum long-term records recalled per turn.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store_path: crate::app_dirs::memory_dir().join("conversation_memory.json"),
            max_context: 10,
            inactivity_timeout_secs: 300,
            context_path: None,
            recall_limit: 3,
        }
    }
}

/// Speech-to-text collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Base URL of an OpenAI-compatible transcription server.
    pub api_url: String,
    /// Model name to request.
    pub model: String,
    /// API key (empty for local servers).
    pub api_key: String,
    /// Optional language hint (ISO-639-1).
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_owned(),
            model: "base.en".to_owned(),
            api_key: String::new(),
            language: Some("en".to_owned()),
        }
    }
}

/// Language model collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions server.
    pub api_url: String,
    /// Model name to request.
    pub model: String,
    /// API key (empty for local servers).
    pub api_key: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Top-p (nucleus) sampling threshold.
    pub top_p: f64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:1234".to_owned(),
            model: "local-model".to_owned(),
            api_key: "lm-studio".to_owned(),
            max_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            timeout_secs: 60,
        }
    }
}

/// Text-to-speech collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of an OpenAI-compatible speech server.
    pub api_url: String,
    /// Model name to request.
    pub model: String,
    /// API key (empty for local servers).
    pub api_key: String,
    /// Voice identifier.
    pub voice: String,
    /// Synthesized waveforms kept in the in-memory cache (0 disables caching).
    pub cache_entries: usize,
    /// Fade-out applied to the tail of new waveforms, in milliseconds.
    pub fade_out_ms: u32,
    /// Silence appended after new waveforms, in milliseconds.
    pub tail_padding_ms: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8880".to_owned(),
            model: "tts-1".to_owned(),
            api_key: String::new(),
            voice: "default".to_owned(),
            cache_entries: 32,
            fade_out_ms: 300,
            tail_padding_ms: 100,
        }
    }
}

/// Assistant persona configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalityConfig {
    /// Text file whose contents become the system prompt.
    pub prompt_file: Option<PathBuf>,
    /// Inline prompt appended after the file contents.
    pub system_prompt: String,
}

impl FridayConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| SpeechError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_dir().join("config.toml")
    }

    /// Check the cross-field invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a config error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.recorder.gate.validate()?;
        self.barge_in.gate.validate()?;
        if self.audio.input_sample_rate == 0 {
            return Err(SpeechError::Config("input_sample_rate must be positive".into()));
        }
        if !matches!(self.vad.window_ms, 10 | 20 | 30) {
            return Err(SpeechError::Config(format!(
                "vad.window_ms must be 10, 20 or 30, got {}",
                self.vad.window_ms
            )));
        }
        if self.recorder.frame_samples == 0
            || self.barge_in.capture_frame_samples == 0
            || self.barge_in.playback_chunk_samples == 0
        {
            return Err(SpeechError::Config("frame sizes must be positive".into()));
        }
        let buffer_samples =
            crate::audio::ms_to_samples(self.audio.output_sample_rate, self.audio.device_buffer_ms);
        if self.barge_in.playback_chunk_samples > buffer_samples {
            return Err(SpeechError::Config(format!(
                "barge_in.playback_chunk_samples ({}) exceeds the {}ms device buffer at {}Hz ({buffer_samples} samples)",
                self.barge_in.playback_chunk_samples,
                self.audio.device_buffer_ms,
                self.audio.output_sample_rate
            )));
        }
        if self.memory.max_context == 0 {
            return Err(SpeechError::Config("memory.max_context must be positive".into()));
        }
        Ok(())
    }
}
