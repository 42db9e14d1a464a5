//! Whole conversations driven through the public API on a scripted device.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use friday::audio::scripted::{ScriptedDevice, silence_frame, speech_frame};
use friday::audio::{StreamDirection, Waveform};
use friday::memory::{ContextMessage, Role};
use friday::runtime::TurnStage;
use friday::services::{LanguageModel, SpeechToText, TextToSpeech};
use friday::vad::{EnergyClassifier, VoiceClassifier};
use friday::{
    BargeInPlayer, Collaborators, ConversationMemory, FridayConfig, PlaybackOutcome, RuntimeEvent,
    SessionEnd, SpeechError, TurnOrchestrator, TurnRecorder,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

// ── Collaborator doubles ──

/// Hands out scripted transcripts; `Err` entries fail that call.
struct QueueStt(Mutex<VecDeque<Result<&'static str, &'static str>>>);

impl QueueStt {
    fn new(script: impl IntoIterator<Item = Result<&'static str, &'static str>>) -> Self {
        Self(Mutex::new(script.into_iter().collect()))
    }
}

#[async_trait]
impl SpeechToText for QueueStt {
    async fn transcribe(&self, wav_path: &Path) -> friday::Result<String> {
        assert!(wav_path.is_file(), "utterance artifact should exist");
        match self.0.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text.to_owned()),
            Some(Err(msg)) => Err(SpeechError::Stt(msg.to_owned())),
            None => Ok(String::new()),
        }
    }
}

/// Repeats the prompt back.
struct EchoLlm;

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, prompt: &str, _context: &[ContextMessage]) -> friday::Result<String> {
        Ok(format!("You said: {prompt}"))
    }
}

/// Returns `samples` of a quiet tone, or nothing when `samples` is zero.
struct FixedTts {
    samples: usize,
    calls: AtomicUsize,
}

impl FixedTts {
    fn new(samples: usize) -> Self {
        Self {
            samples,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextToSpeech for FixedTts {
    async fn synthesize(&self, _text: &str) -> friday::Result<Option<Waveform>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.samples > 0).then(|| Waveform::new(vec![2_000; self.samples], 16_000)))
    }
}

// ── Fixture ──

fn config(dir: &Path) -> FridayConfig {
    let mut config = FridayConfig::default();
    config.recorder.scratch_dir = dir.join("scratch");
    config.memory.store_path = dir.join("memory.json");
    config
}

/// 10 speech frames then 9 silence frames of 960 samples: one complete utterance.
fn push_utterance(device: &ScriptedDevice) {
    device.push_frames(&speech_frame(960), 10);
    device.push_frames(&silence_frame(960), 9);
}

fn orchestrator(
    device: &ScriptedDevice,
    config: &FridayConfig,
    stt: QueueStt,
    tts: Arc<FixedTts>,
) -> TurnOrchestrator {
    let audio = Arc::new(device.clone());
    let classifier: Arc<dyn VoiceClassifier> =
        Arc::new(EnergyClassifier::new(&config.vad).unwrap());
    let recorder = TurnRecorder::new(audio.clone(), Arc::clone(&classifier), config).unwrap();
    let player = BargeInPlayer::new(audio, classifier, config).unwrap();
    let memory = Arc::new(ConversationMemory::open(&config.memory).unwrap());
    TurnOrchestrator::new(
        recorder,
        player,
        memory,
        Collaborators {
            stt: Arc::new(stt),
            llm: Arc::new(EchoLlm),
            tts,
        },
    )
}

fn drain(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn assert_streams_released(device: &ScriptedDevice) {
    for direction in [StreamDirection::Capture, StreamDirection::Playback] {
        assert!(!device.is_open(direction));
        assert_eq!(device.open_count(direction), device.close_count(direction));
    }
}

// ── Tests ──

#[tokio::test]
async fn user_can_talk_over_the_reply_and_keep_going() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let device = ScriptedDevice::new();
    push_utterance(&device);
    // Polled during playback in 512-sample frames: the barge-in gate hears
    // speech and completes on the 17th read, before the 17th chunk is written.
    device.push_frames(&silence_frame(512), 3);
    device.push_frames(&speech_frame(512), 6);
    device.push_frames(&silence_frame(512), 8);
    push_utterance(&device);

    let tts = Arc::new(FixedTts::new(1536 * 40));
    let (tx, mut rx) = broadcast::channel(128);
    let mut session = orchestrator(
        &device,
        &config,
        QueueStt::new([Ok("tell me a long story"), Ok("exit")]),
        tts,
    )
    .with_runtime_events(tx);

    assert_eq!(session.run().await.unwrap(), SessionEnd::ExitCommand);

    let playback = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            RuntimeEvent::Playback { report, .. } => Some(report),
            _ => None,
        })
        .expect("reply should have been played");
    assert_eq!(playback.outcome, PlaybackOutcome::Interrupted);
    assert_eq!(playback.chunks_written, 16);
    assert_eq!(playback.total_chunks, 40);
    assert_eq!(device.played_chunks().len(), 16);
    assert_eq!(device.remaining_capture(), 0);
    assert_streams_released(&device);
}

#[tokio::test]
async fn transcription_failure_skips_the_turn() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let device = ScriptedDevice::new();
    push_utterance(&device);
    push_utterance(&device);

    let tts = Arc::new(FixedTts::new(1_000));
    let (tx, mut rx) = broadcast::channel(128);
    let mut session = orchestrator(
        &device,
        &config,
        QueueStt::new([Err("server unavailable"), Ok("Exit")]),
        tts.clone(),
    )
    .with_runtime_events(tx);

    assert_eq!(session.run().await.unwrap(), SessionEnd::ExitCommand);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::TurnFailed {
            turn: 1,
            stage: TurnStage::Record,
            ..
        }
    )));
    assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.memory().context_len(), 0);
    assert_streams_released(&device);
}

#[tokio::test]
async fn nothing_to_say_skips_playback_but_keeps_the_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let device = ScriptedDevice::new();
    push_utterance(&device);
    push_utterance(&device);

    let tts = Arc::new(FixedTts::new(0));
    let mut session = orchestrator(
        &device,
        &config,
        QueueStt::new([Ok("I prefer tea over coffee"), Ok("exit")]),
        tts.clone(),
    );

    assert_eq!(session.run().await.unwrap(), SessionEnd::ExitCommand);
    assert_eq!(tts.calls.load(Ordering::SeqCst), 1);
    assert_eq!(device.open_count(StreamDirection::Playback), 0);

    let context = session.memory().get_context();
    assert_eq!(context.len(), 2);
    assert_eq!(context[0].role, Role::User);
    assert!(context[0].important);
    assert_eq!(context[1].content, "You said: I prefer tea over coffee");

    let saved = session.memory().recent(5, Some("preference"));
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].category, "preference");
}

#[tokio::test]
async fn stop_handle_and_cancellation_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let device = ScriptedDevice::new();
    let session = orchestrator(&device, &config, QueueStt::new([]), Arc::new(FixedTts::new(0)));

    let cancel = session.cancellation_token();
    session.stop_handle().stop();
    assert!(!cancel.is_cancelled());

    let mut session = session;
    cancel.cancel();
    assert_eq!(session.run().await.unwrap(), SessionEnd::Cancelled);
    assert_eq!(session.turns(), 0);
}
