//! Conversation memory.
//!
//! Sub-modules:
//! - `context`: bounded short-term window fed to the language model.
//! - `store`: trigger-filtered, tag-indexed long-term store on disk.
//! - `triggers`: phrase tables, topic tags and category priority.
//!
//! [`ConversationMemory`] puts both tiers behind one handle that can be
//! shared across tasks.

pub mod context;
pub mod store;
pub mod triggers;

pub use context::{ContextMessage, ContextWindow, Role};
pub use store::{LongTermStore, MemoryRecord};
pub use triggers::should_remember;

use crate::config::MemoryConfig;
use crate::error::Result;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Short-term context plus long-term store.
#[derive(Debug)]
pub struct ConversationMemory {
    context: Mutex<ContextWindow>,
    store: LongTermStore,
}

impl ConversationMemory {
    /// Open the long-term store and build the context window.
    ///
    /// # Errors
    ///
    /// Returns an error if the long-term file exists but cannot be read, or
    /// cannot be created.
    pub fn open(config: &MemoryConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.inactivity_timeout_secs);
        let context = match config.context_path {
            Some(ref path) => ContextWindow::with_persistence(config.max_context, timeout, path),
            None => ContextWindow::new(config.max_context, timeout),
        };
        Ok(Self {
            context: Mutex::new(context),
            store: LongTermStore::open(&config.store_path)?,
        })
    }

    fn window(&self) -> MutexGuard<'_, ContextWindow> {
        // The window holds no invariants a panicking writer could break halfway.
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`ContextWindow::add_message`].
    pub fn add_message(&self, role: Role, content: impl Into<String>, important: bool) {
        self.window().add_message(role, content, important);
    }

    /// See [`ContextWindow::get_context`].
    pub fn get_context(&self) -> Vec<ContextMessage> {
        self.window().get_context()
    }

    /// Drop non-important short-term messages.
    pub fn clear_context(&self) {
        self.window().clear();
    }

    pub fn context_len(&self) -> usize {
        self.window().len()
    }

    /// See [`LongTermStore::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store file cannot be rewritten.
    pub fn save(&self, user: &str, assistant: &str) -> Result<Option<MemoryRecord>> {
        self.store.save(user, assistant)
    }

    /// See [`LongTermStore::search`].
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryRecord> {
        self.store.search(query, limit)
    }

    /// See [`LongTermStore::recent`].
    pub fn recent(&self, limit: usize, topic: Option<&str>) -> Vec<MemoryRecord> {
        self.store.recent(limit, topic)
    }

    pub fn store(&self) -> &LongTermStore {
        &self.store
    }
}

/// ISO-8601 timestamps on disk.
///
/// Written as RFC 3339 in UTC. Timestamps without an offset are read as
/// local time.
pub(crate) mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc))
    }
}
