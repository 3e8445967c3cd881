//! Cursor-based pagination over ring-buffer streams
//!
//! A cursor is the opaque token `<timestamp>:<sequence>` where the
//! timestamp is RFC 3339 (or empty) and the sequence is the stream-wide
//! monotonic counter. Agents pass cursors back as `after_cursor` (older
//! entries), `before_cursor` (newer entries) or `since_cursor` (newer or
//! equal). A cursor whose sequence fell off the ring buffer is expired.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Live entry paired with its stream sequence number and timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sequenced<T> {
    /// Stream-wide sequence number
    pub sequence: i64,
    /// RFC 3339 timestamp used for cursor ordering
    pub timestamp: String,
    /// The stored entry
    pub item: T,
}

/// Decoded cursor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor {
    /// RFC 3339 timestamp (may be empty)
    pub timestamp: String,
    /// Sequence number
    pub sequence: i64,
}

impl Cursor {
    /// Encode a cursor token
    #[must_use]
    pub fn build(timestamp: &str, sequence: i64) -> String {
        format!("{}:{}", timestamp, sequence)
    }

    /// Decode a cursor token. The empty string decodes to the zero cursor.
    pub fn parse(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::default());
        }
        let (timestamp, sequence) = token
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidCursor(format!("missing sequence in {:?}", token)))?;

        if !timestamp.is_empty() && parse_timestamp(timestamp).is_none() {
            return Err(Error::InvalidCursor(format!(
                "invalid timestamp {:?}",
                timestamp
            )));
        }
        let sequence = sequence
            .parse::<i64>()
            .map_err(|_| Error::InvalidCursor(format!("invalid sequence {:?}", sequence)))?;

        Ok(Self {
            timestamp: timestamp.to_string(),
            sequence,
        })
    }

    /// Whether `(timestamp, sequence)` sorts strictly before this cursor
    #[must_use]
    pub fn is_older(&self, timestamp: &str, sequence: i64) -> bool {
        self.compare_entry(timestamp, sequence) == Ordering::Less
    }

    /// Whether `(timestamp, sequence)` sorts strictly after this cursor
    #[must_use]
    pub fn is_newer(&self, timestamp: &str, sequence: i64) -> bool {
        self.compare_entry(timestamp, sequence) == Ordering::Greater
    }

    /// Order an entry relative to the cursor: timestamp first, sequence on ties.
    /// When either timestamp is missing or unparseable only sequences are compared.
    fn compare_entry(&self, timestamp: &str, sequence: i64) -> Ordering {
        match (parse_timestamp(timestamp), parse_timestamp(&self.timestamp)) {
            (Some(entry_ts), Some(cursor_ts)) => entry_ts
                .cmp(&cursor_ts)
                .then(sequence.cmp(&self.sequence)),
            _ => sequence.cmp(&self.sequence),
        }
    }
}

/// Encode a cursor token from a timestamp and sequence
#[must_use]
pub fn build_cursor(timestamp: &str, sequence: i64) -> String {
    Cursor::build(timestamp, sequence)
}

/// Decode a cursor token
pub fn parse_cursor(token: &str) -> Result<Cursor> {
    Cursor::parse(token)
}

fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value).ok()
}

/// Which cursor verb is active for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Entries strictly older than the cursor
    After,
    /// Entries strictly newer than the cursor
    Before,
    /// Entries newer than or equal to the cursor
    Since,
}

/// Pagination request parameters
#[derive(Debug, Clone, Default)]
pub struct CursorParams {
    /// `after_cursor`: page backwards through older entries
    pub after: Option<String>,
    /// `before_cursor`: page forwards through newer entries
    pub before: Option<String>,
    /// `since_cursor`: newer-or-equal entries
    pub since: Option<String>,
    /// Maximum entries to return (0 = unlimited)
    pub limit: usize,
    /// Restart from the oldest entry instead of failing on an expired cursor
    pub restart_on_eviction: bool,
}

impl CursorParams {
    /// Pick the active cursor with precedence `after > before > since`
    #[must_use]
    pub fn active(&self) -> Option<(&str, CursorKind)> {
        non_empty(&self.after)
            .map(|c| (c, CursorKind::After))
            .or_else(|| non_empty(&self.before).map(|c| (c, CursorKind::Before)))
            .or_else(|| non_empty(&self.since).map(|c| (c, CursorKind::Since)))
    }
}

fn non_empty(cursor: &Option<String>) -> Option<&str> {
    cursor.as_deref().filter(|s| !s.is_empty())
}

/// Metadata describing a returned page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageMetadata {
    /// Entries in this page
    pub count: usize,
    /// Live entries matching the filter, before cursor and limit
    pub total: usize,
    /// Cursor of the newest returned entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Timestamp of the oldest returned entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_timestamp: Option<String>,
    /// Timestamp of the newest returned entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_timestamp: Option<String>,
    /// More older entries exist beyond this page
    pub has_more: bool,
    /// The requested cursor had been evicted and paging restarted
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cursor_restarted: bool,
    /// The evicted cursor that triggered a restart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_cursor: Option<String>,
    /// Human-readable warning (restart details)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Apply cursor filtering, eviction detection and limits to a stream snapshot.
///
/// `entries` must be in insertion order (ascending sequence).
pub fn paginate<T>(
    entries: Vec<Sequenced<T>>,
    params: &CursorParams,
) -> Result<(Vec<Sequenced<T>>, PageMetadata)> {
    paginate_filtered(entries, params, |_| true)
}

/// [`paginate`] over the entries matching `keep`.
///
/// Cursor eviction is judged against the oldest entry of the unfiltered
/// stream, so a cursor on a live entry that `keep` rejects stays valid.
pub fn paginate_filtered<T>(
    entries: Vec<Sequenced<T>>,
    params: &CursorParams,
    keep: impl Fn(&T) -> bool,
) -> Result<(Vec<Sequenced<T>>, PageMetadata)> {
    let oldest_live = entries.first().map(|e| e.sequence);
    let entries: Vec<Sequenced<T>> = entries.into_iter().filter(|e| keep(&e.item)).collect();
    let mut meta = PageMetadata {
        total: entries.len(),
        ..PageMetadata::default()
    };

    let Some((token, kind)) = params.active() else {
        let page = apply_limit(entries, params.limit, false);
        fill_metadata(&page, &mut meta);
        return Ok((page, meta));
    };

    let cursor = Cursor::parse(token)?;

    if let Some(oldest) = oldest_live {
        if cursor.sequence > 0 && cursor.sequence < oldest {
            if !params.restart_on_eviction {
                return Err(Error::CursorExpired {
                    requested: cursor.sequence,
                    oldest,
                });
            }
            meta.cursor_restarted = true;
            meta.original_cursor = Some(token.to_string());
            meta.warning = Some(format!(
                "Cursor expired (buffer overflow). Restarted from oldest available entry. Lost entries: {} to {}",
                cursor.sequence,
                oldest - 1
            ));
        }
    }

    let filtered: Vec<Sequenced<T>> = if meta.cursor_restarted {
        entries
    } else {
        entries
            .into_iter()
            .filter(|e| match kind {
                CursorKind::After => cursor.is_older(&e.timestamp, e.sequence),
                CursorKind::Before => cursor.is_newer(&e.timestamp, e.sequence),
                CursorKind::Since => {
                    cursor.is_newer(&e.timestamp, e.sequence)
                        || (e.timestamp == cursor.timestamp && e.sequence == cursor.sequence)
                }
            })
            .collect()
    };

    let before_limit = filtered.len();
    let forward = meta.cursor_restarted || kind != CursorKind::After;
    let page = apply_limit(filtered, params.limit, forward);

    fill_metadata(&page, &mut meta);
    meta.has_more = kind == CursorKind::After && !meta.cursor_restarted && before_limit > page.len();
    Ok((page, meta))
}

/// Trim to `limit`: forward paging keeps the oldest entries, backward keeps the newest.
fn apply_limit<T>(mut entries: Vec<Sequenced<T>>, limit: usize, forward: bool) -> Vec<Sequenced<T>> {
    if limit == 0 || limit >= entries.len() {
        return entries;
    }
    if forward {
        entries.truncate(limit);
        entries
    } else {
        entries.split_off(entries.len() - limit)
    }
}

fn fill_metadata<T>(page: &[Sequenced<T>], meta: &mut PageMetadata) {
    meta.count = page.len();
    if let (Some(first), Some(last)) = (page.first(), page.last()) {
        meta.oldest_timestamp = Some(first.timestamp.clone());
        meta.newest_timestamp = Some(last.timestamp.clone());
        meta.cursor = Some(Cursor::build(&last.timestamp, last.sequence));
    }
}
