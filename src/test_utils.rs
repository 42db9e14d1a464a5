//! Shared test utilities used across multiple test modules.
//!
//! Collaborator doubles record what they were given so tests can assert on
//! the traffic a turn produced.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::audio::{Waveform, wav};
use crate::config::FridayConfig;
use crate::error::{Result, SpeechError};
use crate::memory::ContextMessage;
use crate::services::{LanguageModel, SpeechToText, TextToSpeech};
use crate::vad::{EnergyClassifier, VoiceClassifier};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Default configuration with every file inside `dir`.
pub fn test_config(dir: &Path) -> FridayConfig {
    let mut config = FridayConfig::default();
    config.recorder.scratch_dir = dir.join("scratch");
    config.memory.store_path = dir.join("memory.json");
    config.memory.context_path = None;
    config
}

/// The default energy classifier.
pub fn energy_classifier() -> Arc<dyn VoiceClassifier> {
    Arc::new(EnergyClassifier::new(&FridayConfig::default().vad).unwrap())
}

// ── Speech-to-text ──

/// Returns scripted transcripts in order, then empty strings.
///
/// Every WAV it is asked to transcribe is decoded and kept.
#[derive(Debug, Default)]
pub struct RecordingStt {
    responses: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Waveform>>,
}

impl RecordingStt {
    pub fn new<'a>(responses: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Waveform> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechToText for RecordingStt {
    async fn transcribe(&self, wav_path: &Path) -> Result<String> {
        let waveform = wav::read_waveform(wav_path)?;
        self.seen.lock().unwrap().push(waveform);
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
}

// ── Language model ──

/// Replies with fixed text, or always fails.
#[derive(Debug)]
pub struct ScriptedLlm {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
    contexts: Mutex<Vec<Vec<ContextMessage>>>,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_owned()),
            prompts: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<Vec<ContextMessage>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, prompt: &str, context: &[ContextMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.contexts.lock().unwrap().push(context.to_vec());
        self.reply
            .clone()
            .ok_or_else(|| SpeechError::Llm("scripted failure".into()))
    }
}

// ── Text-to-speech ──

/// Synthesizes a fixed-length 440 Hz tone at 16 kHz.
#[derive(Debug)]
pub struct ToneTts {
    samples: usize,
    calls: AtomicUsize,
}

impl ToneTts {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToSpeech for ToneTts {
    async fn synthesize(&self, _text: &str) -> Result<Option<Waveform>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let samples = (0..self.samples)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                (8_000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
            })
            .collect();
        Ok(Some(Waveform::new(samples, 16_000)))
    }
}
