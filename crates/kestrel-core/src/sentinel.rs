//! Crash sentinel — black-box recorder for unclean shutdowns.
//!
//! Before each turn the loop writes a small JSON record marking the message
//! in flight; the record is deleted on clean completion. A record found at
//! startup means the previous process died mid-turn, so the runtime can send
//! a recovery notice to the affected session instead of silently forgetting.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum user-message preview stored in the record.
const USER_MESSAGE_CAP: usize = 200;

/// The on-disk record. At most one exists at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SentinelRecord {
    pub session_id: String,
    pub message_id: String,
    /// First 200 chars of the user message, for recovery context.
    pub user_message: Option<String>,
    pub pid: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Writes and checks the sentinel file.
pub struct CrashSentinel {
    path: PathBuf,
}

impl CrashSentinel {
    /// Create a sentinel at `path`, creating the parent directory if needed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create sentinel directory");
            }
        }
        CrashSentinel { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark a turn in flight. Write failures are logged and swallowed —
    /// losing crash context must never block message processing.
    pub fn mark_active(&self, session_id: &str, message_id: &str, user_message: &str) {
        let preview: String = user_message.chars().take(USER_MESSAGE_CAP).collect();
        let record = SentinelRecord {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            user_message: if preview.is_empty() { None } else { Some(preview) },
            pid: std::process::id(),
            timestamp: chrono::Utc::now(),
        };

        if let Err(e) = self.write_atomic(&record) {
            warn!(error = %e, "failed to write crash sentinel");
        }
    }

    /// Remove the sentinel on clean turn completion or clean shutdown.
    pub fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("crash sentinel cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to clear crash sentinel"),
        }
    }

    /// Check for a record left behind by a crashed process.
    ///
    /// Returns the record and deletes the file. A corrupted or empty file
    /// is deleted silently and reported as no crash.
    pub fn check_for_crash(&self) -> Option<SentinelRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };

        let record = serde_json::from_str::<SentinelRecord>(&raw).ok();
        self.clear();

        if let Some(ref rec) = record {
            warn!(
                session = %rec.session_id,
                message = %rec.message_id,
                "detected crash from previous run"
            );
        }
        record
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn write_atomic(&self, record: &SentinelRecord) -> std::io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        std::fs::rename(&tmp, &self.path)
    }
}

/// Render the restart notice sent to the affected session.
pub fn format_recovery_message(record: &SentinelRecord) -> String {
    let mut out = format!(
        "I just restarted after an unexpected shutdown.\n\n\
         Last session: {}\n\
         Time: {}\n",
        record.session_id,
        record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(ref preview) = record.user_message {
        out.push_str(&format!("Last message: {preview}\n"));
    }
    out.push_str("\nI'm back online and ready to continue. What were we working on?");
    out
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
