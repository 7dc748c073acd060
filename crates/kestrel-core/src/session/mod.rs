//! Session store — in-memory cache + JSONL file persistence.
//!
//! # Disk format (JSONL)
//!
//! One `.jsonl` file per session key under the sessions directory.
//! - Line 1: metadata `{"_type": "metadata", "created_at": "...", "updated_at": "...", "metadata": {}}`
//! - Lines 2+: messages `{"role": "user", "content": "hello"}`

pub mod store;

pub use store::{SessionStore, SessionSummary};
