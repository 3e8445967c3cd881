//! Annotation sessions produced by draw mode
//!
//! The extension posts one session per completed drawing on a tab. A
//! session posted with a name is also appended to a multi-page named
//! session. `draw_mode_start` stamps `last_draw_started_at` so readers can
//! ignore sessions that predate the current drawing.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-tab session cap
pub const MAX_SESSIONS: usize = 100;
/// Named session cap
pub const MAX_NAMED_SESSIONS: usize = 50;
/// Session lifetime
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// One completed drawing on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSession {
    /// Annotations as drawn (rect, text, element summary, ...)
    #[serde(default)]
    pub annotations: Vec<Value>,
    /// Screenshot path written by the extension
    #[serde(default, rename = "screenshot", skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    /// Page URL
    #[serde(default)]
    pub page_url: String,
    /// Browser tab
    #[serde(default)]
    pub tab_id: i64,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

/// Annotations accumulated across pages under one name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSession {
    /// Session name
    pub name: String,
    /// Pages in arrival order
    pub pages: Vec<AnnotationSession>,
    /// Epoch milliseconds of the last append
    pub updated_at: i64,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    expires_at: i64,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<i64, Entry<AnnotationSession>>,
    named: HashMap<String, Entry<NamedSession>>,
    last_draw_started_at: i64,
}

/// In-memory annotation store
#[derive(Debug, Default)]
pub struct AnnotationStore {
    inner: RwLock<Inner>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms() -> i64 {
    SESSION_TTL.as_millis() as i64
}

impl AnnotationStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tab's session, replacing the previous one for that tab
    pub fn store_session(&self, session: AnnotationSession) {
        let now = now_ms();
        let mut inner = self.inner.write();
        inner.sessions.insert(
            session.tab_id,
            Entry {
                value: session,
                expires_at: now + ttl_ms(),
            },
        );
        if inner.sessions.len() > MAX_SESSIONS {
            let oldest = inner
                .sessions
                .iter()
                .min_by_key(|(_, e)| e.value.timestamp)
                .map(|(tab, _)| *tab);
            if let Some(tab) = oldest {
                inner.sessions.remove(&tab);
            }
        }
    }

    /// Append a page to a named session, stamped now
    pub fn append_to_named_session(&self, name: &str, session: AnnotationSession) {
        self.append_to_named_session_at(name, session, now_ms());
    }

    /// Append a page to a named session with an explicit timestamp
    pub fn append_to_named_session_at(&self, name: &str, session: AnnotationSession, at_ms: i64) {
        let mut inner = self.inner.write();
        let entry = inner.named.entry(name.to_string()).or_insert_with(|| Entry {
            value: NamedSession {
                name: name.to_string(),
                pages: Vec::new(),
                updated_at: at_ms,
            },
            expires_at: at_ms + ttl_ms(),
        });
        entry.value.pages.push(session);
        entry.value.updated_at = at_ms;
        entry.expires_at = at_ms + ttl_ms();

        if inner.named.len() > MAX_NAMED_SESSIONS {
            let oldest = inner
                .named
                .iter()
                .min_by_key(|(_, e)| e.value.updated_at)
                .map(|(n, _)| n.clone());
            if let Some(oldest) = oldest {
                inner.named.remove(&oldest);
            }
        }
    }

    /// Record the start of a drawing
    pub fn mark_draw_started(&self) {
        self.mark_draw_started_at(now_ms());
    }

    /// Record the start of a drawing at an explicit time
    pub fn mark_draw_started_at(&self, at_ms: i64) {
        self.inner.write().last_draw_started_at = at_ms;
    }

    /// Epoch milliseconds of the last drawing start (0 = never)
    #[must_use]
    pub fn last_draw_started_at(&self) -> i64 {
        self.inner.read().last_draw_started_at
    }

    /// Live session for a tab
    #[must_use]
    pub fn session(&self, tab_id: i64) -> Option<AnnotationSession> {
        let now = now_ms();
        let inner = self.inner.read();
        inner
            .sessions
            .get(&tab_id)
            .filter(|e| e.expires_at >= now)
            .map(|e| e.value.clone())
    }

    /// Newest live session across tabs
    #[must_use]
    pub fn latest_session(&self) -> Option<AnnotationSession> {
        self.latest_session_since(i64::MIN)
    }

    /// Newest live session created after the last drawing start
    #[must_use]
    pub fn latest_session_since_draw(&self) -> Option<AnnotationSession> {
        let since = self.last_draw_started_at();
        self.latest_session_since(since)
    }

    fn latest_session_since(&self, since: i64) -> Option<AnnotationSession> {
        let now = now_ms();
        let inner = self.inner.read();
        inner
            .sessions
            .values()
            .filter(|e| e.expires_at >= now && e.value.timestamp > since)
            .max_by_key(|e| e.value.timestamp)
            .map(|e| e.value.clone())
    }

    /// Live named session
    #[must_use]
    pub fn named_session(&self, name: &str) -> Option<NamedSession> {
        let now = now_ms();
        let inner = self.inner.read();
        inner
            .named
            .get(name)
            .filter(|e| e.expires_at >= now)
            .map(|e| e.value.clone())
    }

    /// Named session, only if it was updated after the last drawing start
    #[must_use]
    pub fn named_session_since_draw(&self, name: &str) -> Option<NamedSession> {
        let since = self.last_draw_started_at();
        self.named_session(name).filter(|ns| ns.updated_at > since)
    }

    /// Names of live named sessions, sorted
    #[must_use]
    pub fn list_named_sessions(&self) -> Vec<String> {
        let now = now_ms();
        let inner = self.inner.read();
        let mut names: Vec<_> = inner
            .named
            .iter()
            .filter(|(_, e)| e.expires_at >= now)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a named session
    pub fn clear_named_session(&self, name: &str) {
        self.inner.write().named.remove(name);
    }

    /// Drop expired entries
    pub fn evict_expired(&self) {
        let now = now_ms();
        let mut inner = self.inner.write();
        inner.sessions.retain(|_, e| e.expires_at >= now);
        inner.named.retain(|_, e| e.expires_at >= now);
    }
}
