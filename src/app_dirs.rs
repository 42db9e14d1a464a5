//! Application directory paths for Friday.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! | Purpose | Linux default |
//! |---------|---------------|
//! | Data (memory, logs) | `~/.local/share/friday/` |
//! | Config | `~/.config/friday/` |
//! | Cache (WAV scratch) | `~/.cache/friday/` |
//!
//! Overrides: `FRIDAY_DATA_DIR`, `FRIDAY_CONFIG_DIR`, `FRIDAY_CACHE_DIR`.

use std::path::PathBuf;

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/friday/` unless `FRIDAY_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FRIDAY_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("friday"))
        .unwrap_or_else(|| PathBuf::from("/tmp/friday-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/friday/` unless `FRIDAY_CONFIG_DIR` is set.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FRIDAY_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("friday"))
        .unwrap_or_else(|| PathBuf::from("/tmp/friday-config"))
}

/// Application cache directory.
///
/// Resolves to `dirs::cache_dir()/friday/` unless `FRIDAY_CACHE_DIR` is set.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FRIDAY_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("friday"))
        .unwrap_or_else(|| PathBuf::from("/tmp/friday-cache"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Long-term memory directory (`data_dir()/memory/`).
#[must_use]
pub fn memory_dir() -> PathBuf {
    data_dir().join("memory")
}

/// Scratch directory for transient recordings (`cache_dir()/audio/`).
#[must_use]
pub fn scratch_dir() -> PathBuf {
    cache_dir().join("audio")
}
