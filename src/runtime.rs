//! Runtime events emitted by the turn engine for frontends and logging.
//!
//! Payloads stay small so the orchestrator can emit them without holding up
//! the next turn. Sends are best-effort: a lagging or absent receiver never
//! affects the conversation.

use crate::player::PlaybackReport;

/// Where the orchestrator is in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Waiting for the user to start talking.
    Listening,
    /// Capturing and transcribing the user's utterance.
    Recording,
    /// Consulting memory and the language model.
    Thinking,
    /// Playing the assistant's reply.
    Speaking,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => f.write_str("listening"),
            Self::Recording => f.write_str("recording"),
            Self::Thinking => f.write_str("thinking"),
            Self::Speaking => f.write_str("speaking"),
        }
    }
}

/// Why a conversation session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user said the exit word.
    ExitCommand,
    /// The cancellation token fired.
    Cancelled,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExitCommand => f.write_str("exit command"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Pipeline stage that produced a [`RuntimeEvent::TurnFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Record,
    Complete,
    Memory,
    Synthesize,
    Play,
}

impl std::fmt::Display for TurnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record => f.write_str("record"),
            Self::Complete => f.write_str("complete"),
            Self::Memory => f.write_str("memory"),
            Self::Synthesize => f.write_str("synthesize"),
            Self::Play => f.write_str("play"),
        }
    }
}

/// Events that describe what the engine is doing right now.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The orchestrator entered a new phase.
    Phase { turn: u64, phase: TurnPhase },
    /// Speech-to-text produced a non-empty transcript.
    Transcription { turn: u64, text: String },
    /// The language model replied.
    AssistantReply { turn: u64, text: String },
    /// The exchange was written to the long-term store.
    MemorySaved { turn: u64, category: String },
    /// Playback of the reply finished.
    Playback { turn: u64, report: PlaybackReport },
    /// A collaborator failed; the turn continued or was skipped.
    TurnFailed {
        turn: u64,
        stage: TurnStage,
        error: String,
    },
    /// The session loop returned.
    SessionEnded(SessionEnd),
}
