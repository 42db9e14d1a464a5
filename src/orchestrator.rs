//! The conversation loop.
//!
//! [`TurnOrchestrator`] sequences one turn at a time:
//!
//! ```text
//! LISTENING → RECORDING → THINKING → SPEAKING → LISTENING …
//! ```
//!
//! Recording and playback run on the blocking pool and are awaited, so the
//! streams of one turn are closed before the next turn opens new ones.
//! Collaborator failures are logged and end the current turn only; the
//! session ends on the exit word or when the cancellation token fires.

use crate::error::{Result, SpeechError};
use crate::memory::{ContextMessage, ConversationMemory, MemoryRecord, Role, should_remember};
use crate::player::{BargeInPlayer, PlaybackOutcome, StopHandle};
use crate::recorder::{RecordOutcome, TurnRecorder};
use crate::runtime::{RuntimeEvent, SessionEnd, TurnPhase, TurnStage};
use crate::services::{LanguageModel, SpeechToText, TextToSpeech};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Word that ends the session.
pub const EXIT_COMMAND: &str = "exit";

/// Pause after a failed turn before listening again.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of long-term records recalled per turn.
const DEFAULT_RECALL_LIMIT: usize = 3;

/// The three external services a turn depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

/// Whether `transcript` is the exit word, ignoring case, whitespace and
/// surrounding punctuation.
pub fn is_exit_command(transcript: &str) -> bool {
    transcript
        .trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .eq_ignore_ascii_case(EXIT_COMMAND)
}

/// Drives record → think → speak turns until told to stop.
pub struct TurnOrchestrator {
    recorder: TurnRecorder,
    player: BargeInPlayer,
    memory: Arc<ConversationMemory>,
    services: Collaborators,
    recall_limit: usize,
    cancel: CancellationToken,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    turn: u64,
}

impl TurnOrchestrator {
    pub fn new(
        recorder: TurnRecorder,
        player: BargeInPlayer,
        memory: Arc<ConversationMemory>,
        services: Collaborators,
    ) -> Self {
        Self {
            recorder,
            player,
            memory,
            services,
            recall_limit: DEFAULT_RECALL_LIMIT,
            cancel: CancellationToken::new(),
            runtime_tx: None,
            turn: 0,
        }
    }

    /// Maximum long-term records passed to the language model per turn.
    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    /// Attach a runtime event broadcaster for frontends and observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Token that ends the session from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle that cuts the current reply short without ending the session.
    pub fn stop_handle(&self) -> StopHandle {
        self.player.stop_handle()
    }

    /// Turns started so far.
    pub fn turns(&self) -> u64 {
        self.turn
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Run turns until the exit word is heard or the session is cancelled.
    ///
    /// # Errors
    ///
    /// Never fails once constructed: collaborator and device errors are
    /// logged and the loop goes back to listening. The `Result` is kept for
    /// callers that compose setup and run.
    pub async fn run(&mut self) -> Result<SessionEnd> {
        info!("conversation started");
        let end = loop {
            if self.cancel.is_cancelled() {
                break SessionEnd::Cancelled;
            }
            self.turn += 1;
            match self.run_turn().await {
                TurnResult::Continue => {}
                TurnResult::Failed => {
                    tokio::select! {
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                        () = self.cancel.cancelled() => {}
                    }
                }
                TurnResult::End(end) => break end,
            }
        };
        info!("conversation ended after {} turns: {end}", self.turn);
        self.emit(RuntimeEvent::SessionEnded(end));
        Ok(end)
    }

    async fn run_turn(&mut self) -> TurnResult {
        let turn = self.turn;
        self.phase(TurnPhase::Listening);

        // ── Record ──
        self.phase(TurnPhase::Recording);
        let outcome = self
            .recorder
            .record(self.services.stt.as_ref(), &self.cancel)
            .await;
        let text = match outcome {
            Ok(RecordOutcome::Transcript(text)) => text,
            Ok(RecordOutcome::Interrupted) => return TurnResult::End(SessionEnd::Cancelled),
            Ok(RecordOutcome::TimedOut) => {
                warn!("turn {turn}: utterance cap reached, listening again");
                return TurnResult::Continue;
            }
            Err(e) => {
                self.fail(TurnStage::Record, &e);
                return TurnResult::Failed;
            }
        };
        if text.is_empty() {
            return TurnResult::Continue;
        }
        info!("user: {text}");
        self.emit(RuntimeEvent::Transcription {
            turn,
            text: text.clone(),
        });
        if is_exit_command(&text) {
            return TurnResult::End(SessionEnd::ExitCommand);
        }

        // ── Think ──
        self.phase(TurnPhase::Thinking);
        self.memory
            .add_message(Role::User, text.as_str(), should_remember(&text));
        let context = self.request_context(&text);
        let reply = match self.services.llm.complete(&text, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                self.fail(TurnStage::Complete, &e);
                String::new()
            }
        };
        if reply.trim().is_empty() {
            return TurnResult::Failed;
        }
        info!("friday: {reply}");
        self.emit(RuntimeEvent::AssistantReply {
            turn,
            text: reply.clone(),
        });
        self.memory.add_message(Role::Assistant, reply.as_str(), false);
        match self.memory.save(&text, &reply) {
            Ok(Some(record)) => self.emit(RuntimeEvent::MemorySaved {
                turn,
                category: record.category,
            }),
            Ok(None) => {}
            Err(e) => self.fail(TurnStage::Memory, &e),
        }

        // ── Speak ──
        let waveform = match self.services.tts.synthesize(&reply).await {
            Ok(Some(waveform)) => waveform,
            Ok(None) => return TurnResult::Continue,
            Err(e) => {
                self.fail(TurnStage::Synthesize, &e);
                return TurnResult::Continue;
            }
        };
        self.phase(TurnPhase::Speaking);
        match self.player.play_async(waveform, true, &self.cancel).await {
            Ok(report) => {
                if report.outcome == PlaybackOutcome::Interrupted {
                    info!(
                        "user barged in after {}/{} chunks",
                        report.chunks_written, report.total_chunks
                    );
                }
                self.emit(RuntimeEvent::Playback { turn, report });
                TurnResult::Continue
            }
            Err(e) => {
                self.fail(TurnStage::Play, &e);
                TurnResult::Failed
            }
        }
    }

    /// Recalled long-term memories as a system message, then the window.
    fn request_context(&self, prompt: &str) -> Vec<ContextMessage> {
        let recalled = self.memory.search(prompt, self.recall_limit);
        let window = self.memory.get_context();
        let mut context = Vec::with_capacity(window.len() + 1);
        if let Some(message) = recall_message(&recalled) {
            context.push(message);
        }
        context.extend(window);
        context
    }

    fn phase(&self, phase: TurnPhase) {
        self.emit(RuntimeEvent::Phase {
            turn: self.turn,
            phase,
        });
    }

    fn fail(&self, stage: TurnStage, e: &SpeechError) {
        error!("turn {} {stage} failed: {e}", self.turn);
        self.emit(RuntimeEvent::TurnFailed {
            turn: self.turn,
            stage,
            error: e.to_string(),
        });
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(ref tx) = self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("recorder", &self.recorder)
            .field("player", &self.player)
            .field("recall_limit", &self.recall_limit)
            .field("turn", &self.turn)
            .finish_non_exhaustive()
    }
}

enum TurnResult {
    Continue,
    Failed,
    End(SessionEnd),
}

fn recall_message(records: &[MemoryRecord]) -> Option<ContextMessage> {
    if records.is_empty() {
        return None;
    }
    let mut content = String::from("Earlier conversations that may be relevant:");
    for record in records {
        let _ = write!(
            content,
            "\n- [{}] User: {} | You: {}",
            record.timestamp.format("%Y-%m-%d"),
            record.user,
            record.assistant
        );
    }
    Some(ContextMessage::new(Role::System, content))
}
