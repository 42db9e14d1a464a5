//! Long-term conversation store.
//!
//! Exchanges that mention something worth keeping are tagged, categorised
//! and appended to a JSON array on disk. The whole file is rewritten on each
//! save; a crash mid-write can truncate it, which the loader then treats as
//! a corrupt file.

use super::timestamp;
use super::triggers::{self, TriggerCategory};
use crate::error::{Result, SpeechError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Set when the exchange contained an explicit "remember this" request.
    /// Not persisted.
    #[serde(skip)]
    pub important: bool,
}

fn default_category() -> String {
    triggers::DEFAULT_CATEGORY.to_owned()
}

impl MemoryRecord {
    fn joined_tags(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// Append-only store of [`MemoryRecord`]s backed by one JSON file.
///
/// Saves on one instance are serialised; separate instances pointing at the
/// same file are not coordinated.
#[derive(Debug)]
pub struct LongTermStore {
    path: PathBuf,
    records: Mutex<Vec<MemoryRecord>>,
}

impl LongTermStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created holding an empty array. A file that cannot
    /// be parsed is logged and treated as empty; it is replaced on the next
    /// save.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, or a missing
    /// file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_records(&path)?;
        info!(
            "long-term memory: {} records from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<MemoryRecord>>> {
        self.records
            .lock()
            .map_err(|e| SpeechError::Memory(format!("memory store lock poisoned: {e}")))
    }

    /// Persist the exchange if either side contains a trigger phrase.
    ///
    /// Returns the stored record, or `None` when nothing was worth keeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be rewritten; the record is then
    /// not kept in memory either.
    pub fn save(&self, user: &str, assistant: &str) -> Result<Option<MemoryRecord>> {
        self.save_at(user, assistant, Utc::now())
    }

    /// [`LongTermStore::save`] with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`LongTermStore::save`].
    pub fn save_at(
        &self,
        user: &str,
        assistant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MemoryRecord>> {
        let mut hits = triggers::matched_triggers(user);
        hits.extend(triggers::matched_triggers(assistant));
        if hits.is_empty() {
            return Ok(None);
        }

        let tags = triggers::extract_tags(user, assistant);
        let record = MemoryRecord {
            timestamp: now,
            user: user.to_owned(),
            assistant: assistant.to_owned(),
            category: triggers::categorize(&tags).to_owned(),
            tags,
            important: hits.contains(&TriggerCategory::Explicit),
        };

        let mut records = self.lock()?;
        records.push(record.clone());
        if let Err(e) = write_records(&self.path, &records) {
            records.pop();
            error!("failed to save memory to {}: {e}", self.path.display());
            return Err(e);
        }

        info!(
            "saved memory: category={}, tags={:?}",
            record.category, record.tags
        );
        Ok(Some(record))
    }

    /// Records matching `query`, best first.
    ///
    /// Scoring: +2 when the query occurs in the user text, +1 in the
    /// assistant text, +3 in the space-joined tags. Ties go to the newer
    /// record. A blank query matches nothing.
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let Ok(records) = self.lock() else {
            return Vec::new();
        };

        let mut scored: Vec<(u32, &MemoryRecord)> = records
            .iter()
            .filter_map(|r| {
                let mut score = 0;
                if r.user.to_lowercase().contains(&query) {
                    score += 2;
                }
                if r.assistant.to_lowercase().contains(&query) {
                    score += 1;
                }
                if r.joined_tags().contains(&query) {
                    score += 3;
                }
                (score > 0).then_some((score, r))
            })
            .collect();

        scored.sort_by(|(sa, ra), (sb, rb)| sb.cmp(sa).then(rb.timestamp.cmp(&ra.timestamp)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// The newest `limit` records, oldest first, optionally only those tagged `topic`.
    pub fn recent(&self, limit: usize, topic: Option<&str>) -> Vec<MemoryRecord> {
        let Ok(records) = self.lock() else {
            return Vec::new();
        };
        let matching: Vec<&MemoryRecord> = records
            .iter()
            .filter(|r| topic.is_none_or(|t| r.tags.contains(t)))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Snapshot of every record in insertion order.
    pub fn records(&self) -> Vec<MemoryRecord> {
        self.lock().map(|r| r.to_vec()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_records(path: &Path) -> Result<Vec<MemoryRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("creating new memory file at {}", path.display());
            write_records(path, &[])?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(records) => Ok(records),
        Err(e) => {
            warn!(
                "memory file {} is corrupted, starting empty: {e}",
                path.display()
            );
            Ok(Vec::new())
        }
    }
}

fn write_records(path: &Path, records: &[MemoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}
