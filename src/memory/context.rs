//! Short-term conversation context.
//!
//! A bounded window of recent messages fed to the language model. Messages
//! flagged important survive both trimming and inactivity clears. When the
//! window overflows it is rebuilt as every important message followed by the
//! most recent non-important ones, so important messages move to the front.

use super::timestamp;
use crate::error::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Who said a message.
///
/// `System` messages carry instructions or recalled memories into a model
/// request; conversation turns are `User` or `Assistant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in the context window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub important: bool,
}

impl ContextMessage {
    /// A non-important message stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            important: false,
        }
    }
}

/// Bounded, importance-aware message window.
#[derive(Debug)]
pub struct ContextWindow {
    messages: Vec<ContextMessage>,
    max_context: usize,
    timeout: TimeDelta,
    last_interaction: Option<DateTime<Utc>>,
    path: Option<PathBuf>,
}

impl ContextWindow {
    /// An empty window holding at most `max_context` messages.
    pub fn new(max_context: usize, timeout: std::time::Duration) -> Self {
        Self {
            messages: Vec::new(),
            max_context: max_context.max(1),
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
            last_interaction: None,
            path: None,
        }
    }

    /// A window mirrored to `path` after every change.
    ///
    /// Messages already in the file are reloaded when they are important or
    /// younger than the inactivity timeout. A missing file starts an empty
    /// window; an unreadable one is logged and ignored.
    pub fn with_persistence(
        max_context: usize,
        timeout: std::time::Duration,
        path: impl Into<PathBuf>,
    ) -> Self {
        let mut window = Self::new(max_context, timeout);
        let path = path.into();
        window.reload(&path, Utc::now());
        window.path = Some(path);
        window
    }

    fn reload(&mut self, path: &Path, now: DateTime<Utc>) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("cannot read context file {}: {e}", path.display());
                return;
            }
        };
        let stored: Vec<ContextMessage> = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("ignoring corrupt context file {}: {e}", path.display());
                return;
            }
        };

        self.messages = stored
            .into_iter()
            .filter(|m| m.important || now - m.timestamp <= self.timeout)
            .collect();
        self.last_interaction = self.messages.iter().map(|m| m.timestamp).max();
        self.trim();
        info!(
            "restored {} context messages from {}",
            self.messages.len(),
            path.display()
        );
    }

    /// Append a message stamped with the current time.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>, important: bool) {
        self.add_message_at(role, content, important, Utc::now());
    }

    /// Append a message stamped with `now`.
    ///
    /// If the window has been idle longer than the timeout, non-important
    /// messages are dropped first.
    pub fn add_message_at(
        &mut self,
        role: Role,
        content: impl Into<String>,
        important: bool,
        now: DateTime<Utc>,
    ) {
        if self.expired_at(now) {
            info!("conversation idle past timeout, clearing context");
            self.retain_important();
        }

        self.messages.push(ContextMessage {
            role,
            content: content.into(),
            timestamp: now,
            important,
        });
        self.last_interaction = Some(now);
        self.trim();
        self.persist();
    }

    /// Current messages, or nothing if the window has expired.
    pub fn get_context(&mut self) -> Vec<ContextMessage> {
        self.get_context_at(Utc::now())
    }

    /// [`ContextWindow::get_context`] evaluated at `now`.
    pub fn get_context_at(&mut self, now: DateTime<Utc>) -> Vec<ContextMessage> {
        if self.expired_at(now) {
            self.clear();
            return Vec::new();
        }
        self.messages.clone()
    }

    /// Drop every non-important message.
    pub fn clear(&mut self) {
        self.retain_important();
        self.persist();
        info!("context cleared, {} important messages kept", self.messages.len());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_interaction(&self) -> Option<DateTime<Utc>> {
        self.last_interaction
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.last_interaction
            .is_some_and(|last| now - last > self.timeout)
    }

    fn retain_important(&mut self) {
        self.messages.retain(|m| m.important);
    }

    fn trim(&mut self) {
        if self.messages.len() <= self.max_context {
            return;
        }
        let (mut kept, recent): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.messages)
                .into_iter()
                .partition(|m| m.important);
        let room = self.max_context.saturating_sub(kept.len());
        let skip = recent.len().saturating_sub(room);
        kept.extend(recent.into_iter().skip(skip));
        self.messages = kept;
    }

    fn persist(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        if let Err(e) = write_messages(path, &self.messages) {
            warn!("failed to save context to {}: {e}", path.display());
        }
    }
}

fn write_messages(path: &Path, messages: &[ContextMessage]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(messages)?;
    std::fs::write(path, json)?;
    Ok(())
}
