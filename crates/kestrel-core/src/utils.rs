//! Small helpers — data paths, filenames, string truncation.

use std::path::PathBuf;

/// The Kestrel data directory (`~/.kestrel/`).
pub fn data_path() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".kestrel")
}

/// Sessions directory (`~/.kestrel/sessions/`).
pub fn sessions_path() -> PathBuf {
    data_path().join("sessions")
}

/// Crash sentinel file (`~/.kestrel/crash.sentinel`).
pub fn sentinel_path() -> PathBuf {
    data_path().join("crash.sentinel")
}

/// Truncate to `max_len` characters, appending "..." when shortened.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Sanitize a string for use as a filename.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}
