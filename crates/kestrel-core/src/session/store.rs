//! Session persistence and caching.
//!
//! The agent loop owns a session for the duration of one turn; this store
//! hands out clones, serialises writes behind an `RwLock`, and persists
//! best-effort — a failed save is logged and swallowed, never surfaced to
//! the reply path. Sessions whose key starts with `background:` or
//! `isolated:` live only in memory.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Key prefixes that are never persisted to disk.
const EPHEMERAL_PREFIXES: &[&str] = &["background:", "isolated:"];

// ─────────────────────────────────────────────
// Metadata header (first line of each JSONL file)
// ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

// ─────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────

/// Maps `session_key → Session` with create-or-get semantics.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store rooted at `sessions_dir` (defaults to the data dir).
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::sessions_path);
        std::fs::create_dir_all(&dir)?;
        Ok(SessionStore {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn is_ephemeral(key: &str) -> bool {
        EPHEMERAL_PREFIXES.iter().any(|p| key.starts_with(p))
    }

    /// Get an existing session or create a new empty one.
    ///
    /// Lookup order: in-memory cache, then disk, then fresh.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if !Self::is_ephemeral(key) {
            if let Some(session) = self.load_from_disk(key) {
                let mut cache = self.cache.write().unwrap();
                cache.insert(key.to_string(), session.clone());
                return session;
            }
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Persist a session: update the cache, then write to disk best-effort.
    /// Save errors are logged and swallowed — the caller's reply must not
    /// depend on durability.
    pub fn save(&self, session: &Session) {
        let mut stored = session.clone();
        stored.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(stored.key.clone(), stored.clone());
        }

        if Self::is_ephemeral(&stored.key) {
            debug!(key = %stored.key, "ephemeral session, skipping disk write");
            return;
        }

        if let Err(e) = self.write_to_disk(&stored) {
            warn!(key = %stored.key, error = %e, "session save failed");
        }
    }

    /// Append a message to a session and persist.
    pub fn add_message(&self, key: &str, message: Message) {
        let mut session = self.get_or_create(key);
        session.messages.push(message);
        self.save(&session);
    }

    /// The last `max_messages` of a session's history, oldest first.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        session.recent_messages(max_messages).to_vec()
    }

    /// Drop a session's message history, keeping the key binding and metadata.
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.messages.clear();
        self.save(&session);
    }

    /// Remove a session from cache and disk. Returns `true` if a file existed.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key = key, error = %e, "failed to delete session file");
                return false;
            }
            true
        } else {
            false
        }
    }

    /// All sessions found on disk, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read sessions directory");
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let reader = std::io::BufReader::new(file);
            if let Some(Ok(line)) = reader.lines().next() {
                if let Ok(header) = serde_json::from_str::<SessionHeader>(&line) {
                    let key = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(|s| s.replacen('_', ":", 1))
                        .unwrap_or_default();
                    summaries.push(SessionSummary {
                        key,
                        created_at: header.created_at,
                        updated_at: header.updated_at,
                        path: path.clone(),
                    });
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    fn session_path(&self, key: &str) -> PathBuf {
        let safe = utils::safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{safe}.jsonl"))
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(key = key, error = %e, "failed to open session file");
                return None;
            }
        };

        let reader = std::io::BufReader::new(file);
        let mut session = Session::new(key);

        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(header) = serde_json::from_str::<SessionHeader>(&line) {
                if header.record_type == "metadata" {
                    session.created_at = header.created_at;
                    session.updated_at = header.updated_at;
                    session.metadata = header.metadata;
                    continue;
                }
            }

            if let Ok(msg) = serde_json::from_str::<Message>(&line) {
                session.messages.push(msg);
            }
        }

        debug!(key = key, messages = session.messages.len(), "session loaded from disk");
        Some(session)
    }

    fn write_to_disk(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let mut file = std::fs::File::create(&path)?;

        let header = SessionHeader {
            record_type: "metadata".to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        };
        writeln!(file, "{}", serde_json::to_string(&header)?)?;

        for msg in &session.messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }
}

/// Listing entry for a stored session.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
