use std::{
    fs,
    path::Path,
    process,
    sync::atomic::{AtomicU32, Ordering},
};

use chrono::Utc;
use tracing::warn;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Client session id attached to every tracking call so the backend can
/// correlate events from one browsing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    /// Read the persisted id, or mint and persist a new one. A failed write
    /// still yields a usable (ephemeral) id.
    pub fn load_or_create(path: &Path) -> Self {
        if let Ok(raw) = fs::read_to_string(path) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Self(trimmed.to_string());
            }
        }

        let sid = Self::generate();
        if let Err(e) = fs::write(path, sid.as_str()) {
            warn!("Failed to persist session id to {}: {e}", path.display());
        }
        sid
    }

    pub fn generate() -> Self {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}-{:x}{:x}",
            Utc::now().timestamp_millis(),
            process::id(),
            n
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
