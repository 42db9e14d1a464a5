//! Content-addressed cache in front of a synthesizer.
//!
//! Entries are keyed by a BLAKE3 digest of the normalised text. New audio
//! gets a short fade-out and trailing silence before it is cached, so
//! replies do not end with a click and the barge-in gate has a moment of
//! quiet after playback.

use super::TextToSpeech;
use crate::audio::Waveform;
use crate::config::TtsConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Waveform>,
    /// Keys from least to most recently used.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl Entries {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// LRU cache wrapping any [`TextToSpeech`].
pub struct CachedTts {
    inner: Arc<dyn TextToSpeech>,
    capacity: usize,
    fade_out_ms: u32,
    tail_padding_ms: u32,
    entries: Mutex<Entries>,
}

impl CachedTts {
    pub fn new(inner: Arc<dyn TextToSpeech>, config: &TtsConfig) -> Self {
        Self {
            inner,
            capacity: config.cache_entries,
            fade_out_ms: config.fade_out_ms,
            tail_padding_ms: config.tail_padding_ms,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Cache key for `text`: case and surrounding whitespace are ignored.
    pub fn cache_key(text: &str) -> String {
        let normalized = text.trim().to_lowercase();
        blake3::hash(normalized.as_bytes()).to_hex().to_string()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        let entries = self.lock();
        (entries.hits, entries.misses)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<Waveform> {
        let mut entries = self.lock();
        let found = entries.map.get(key).cloned();
        if found.is_some() {
            entries.hits += 1;
            entries.touch(key);
        } else {
            entries.misses += 1;
        }
        found
    }

    fn insert(&self, key: String, waveform: Waveform) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        if entries.map.insert(key.clone(), waveform).is_some() {
            entries.touch(&key);
            return;
        }
        entries.order.push_back(key);
        while entries.order.len() > self.capacity {
            if let Some(evicted) = entries.order.pop_front() {
                entries.map.remove(&evicted);
            }
        }
    }
}

#[async_trait]
impl TextToSpeech for CachedTts {
    async fn synthesize(&self, text: &str) -> Result<Option<Waveform>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let key = Self::cache_key(text);
        if let Some(hit) = self.lookup(&key) {
            debug!("tts cache hit {}", &key[..12]);
            return Ok(Some(hit));
        }

        let Some(raw) = self.inner.synthesize(text).await? else {
            return Ok(None);
        };
        let shaped = raw
            .with_fade_out(self.fade_out_ms)
            .with_tail_padding(self.tail_padding_ms);
        self.insert(key, shaped.clone());
        Ok(Some(shaped))
    }
}

impl std::fmt::Debug for CachedTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTts")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
