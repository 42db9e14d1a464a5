//! Remembrance triggers, topic tags and categories.
//!
//! All matching is case-insensitive substring matching on the raw text, so
//! "I'm" triggers on "i'm" and "birthday" tags `personal` even inside a
//! longer word.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Trigger phrases
// ---------------------------------------------------------------------------

/// Why a piece of text is worth keeping long-term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCategory {
    /// The user asked for it to be remembered.
    Explicit,
    /// Facts about the user.
    Personal,
    /// Likes and dislikes.
    Preference,
    /// Reminders and appointments.
    Temporal,
}

const TRIGGERS: &[(TriggerCategory, &[&str])] = &[
    (
        TriggerCategory::Explicit,
        &[
            "remember",
            "don't forget",
            "make a note",
            "save this",
            "store this",
            "memorize",
            "keep this in mind",
            "important",
            "note this",
            "write this down",
        ],
    ),
    (
        TriggerCategory::Personal,
        &[
            "my name is",
            "i am",
            "i'm",
            "my birthday",
            "my address",
            "my phone",
            "my email",
            "call me",
        ],
    ),
    (
        TriggerCategory::Preference,
        &["i like", "i love", "i hate", "i prefer", "favorite", "don't like"],
    ),
    (
        TriggerCategory::Temporal,
        &["remind me", "schedule", "appointment", "meeting", "deadline"],
    ),
];

/// Trigger categories whose phrases occur in `text`, in table order.
pub fn matched_triggers(text: &str) -> Vec<TriggerCategory> {
    let lower = text.to_lowercase();
    TRIGGERS
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| lower.contains(p)))
        .map(|(category, _)| *category)
        .collect()
}

/// Whether `text` contains any trigger phrase.
pub fn should_remember(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRIGGERS
        .iter()
        .any(|(_, phrases)| phrases.iter().any(|p| lower.contains(p)))
}

// ---------------------------------------------------------------------------
// Topic tags
// ---------------------------------------------------------------------------

const TOPICS: &[(&str, &[&str])] = &[
    (
        "personal",
        &[
            "name", "age", "birthday", "family", "friend", "address", "phone", "email", "contact",
        ],
    ),
    (
        "task",
        &[
            "reminder",
            "todo",
            "task",
            "schedule",
            "appointment",
            "deadline",
            "meeting",
            "project",
        ],
    ),
    (
        "preference",
        &[
            "like", "dislike", "prefer", "favorite", "hate", "love", "enjoy", "interest",
        ],
    ),
    (
        "fact",
        &[
            "fact",
            "information",
            "data",
            "detail",
            "knowledge",
            "remember",
            "note",
        ],
    ),
    (
        "temporal",
        &[
            "time",
            "date",
            "schedule",
            "when",
            "appointment",
            "deadline",
            "reminder",
        ],
    ),
];

/// Tag added when the text mentions a calendar date.
pub const DATE_TAG: &str = "date";

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // 23/10/2024, 1-2-24
        r"\d{1,2}[-/]\d{1,2}[-/]\d{2,4}",
        // 23rd October, 1 of May
        r"(?i)\d{1,2}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Whether `text` contains something that looks like a date.
pub fn mentions_date(text: &str) -> bool {
    DATE_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Topic tags for one exchange.
pub fn extract_tags(user: &str, assistant: &str) -> BTreeSet<String> {
    let combined = format!("{user} {assistant}").to_lowercase();
    let mut tags: BTreeSet<String> = TOPICS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
        .map(|(topic, _)| (*topic).to_owned())
        .collect();
    if mentions_date(&combined) {
        tags.insert(DATE_TAG.to_owned());
    }
    tags
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

const CATEGORY_PRIORITY: &[&str] = &["personal", "temporal", "task", "preference", "fact"];

/// Category used when no prioritised tag is present.
pub const DEFAULT_CATEGORY: &str = "general";

/// The single highest-priority category among `tags`.
pub fn categorize(tags: &BTreeSet<String>) -> &'static str {
    CATEGORY_PRIORITY
        .iter()
        .find(|c| tags.contains(**c))
        .copied()
        .unwrap_or(DEFAULT_CATEGORY)
}
