//! Friday: real-time turn-taking engine for a voice assistant.
//!
//! One conversation turn runs as:
//! Microphone → VAD gate → STT → memory + LLM → TTS → interruptible playback
//!
//! # Architecture
//!
//! - **Audio**: frame-oriented capture/playback streams behind an explicit
//!   device manager (`cpal` for real hardware, a scripted device for tests)
//! - **VAD**: a per-window voice classifier plus a hysteresis gate that
//!   reports when an utterance has finished
//! - **Recorder**: captures one utterance and hands it to speech-to-text
//! - **Player**: plays a reply while listening for the user to barge in
//! - **Memory**: bounded short-term context plus a long-term JSON store
//! - **Orchestrator**: sequences turns and owns the cancellation token

pub mod app_dirs;
pub mod audio;
pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod personality;
pub mod player;
pub mod recorder;
pub mod runtime;
pub mod services;
pub mod vad;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::FridayConfig;
pub use error::{Result, SpeechError};
pub use memory::ConversationMemory;
pub use orchestrator::{Collaborators, TurnOrchestrator};
pub use player::{BargeInPlayer, PlaybackOutcome, PlaybackReport};
pub use recorder::{RecordOutcome, TurnRecorder};
pub use runtime::{RuntimeEvent, SessionEnd, TurnPhase};
pub use vad::{VoiceActivityGate, VoiceCommandState};
