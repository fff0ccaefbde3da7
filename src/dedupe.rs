//! Duplicate suppression.
//!
//! Two layers: an in-batch pass that collapses repeated characters inside
//! one invocation, and a persistent [`DedupeStore`] that remembers accepted
//! log lines for a TTL window so overlapping invocations (retries, log
//! shipper re-sends, concurrent handlers) notify at most once per window.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::PartyJoinEvent;
use crate::util::blake3_hash;

pub(crate) const DEFAULT_TTL_SECONDS: u64 = 600;

static LOG_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{8,}$").expect("log id regex should compile"));

/// Outcome of a conditional insert. A duplicate is an expected signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DedupeOutcome {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DedupeStats {
    pub(crate) accepted: usize,
    pub(crate) duplicate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DedupeConfig {
    pub(crate) db_path: std::path::PathBuf,
    pub(crate) ttl_seconds: u64,
}

/// The stable id the log writer appends after the last `|`, lowercased.
pub(crate) fn extract_log_id(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let (_, tail) = trimmed.rsplit_once('|')?;
    let tail = tail.trim();
    if LOG_ID_REGEX.is_match(tail) {
        Some(tail.to_ascii_lowercase())
    } else {
        None
    }
}

/// Deterministic key for a raw line: the embedded log id when there is one,
/// otherwise a content hash.
pub(crate) fn idempotency_key(line: &str) -> String {
    match extract_log_id(line) {
        Some(log_id) => format!("logid:{log_id}"),
        None => format!("blake3:{}", blake3_hash(line.as_bytes()).to_hex()),
    }
}

fn batch_key(event: &PartyJoinEvent) -> String {
    match event.full_identity() {
        Some((family, given, world)) => format!("{family} {given}@{world}"),
        None => event.character_raw.clone(),
    }
}

/// Keeps the first event per character, in first-seen order.
pub(crate) fn dedupe_in_batch(events: Vec<PartyJoinEvent>) -> Vec<PartyJoinEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(batch_key(event)))
        .collect()
}

/// Keyed store with an atomic insert-unless-live primitive.
pub(crate) trait DedupeStore {
    /// Records `key` until `now_seconds + ttl_seconds` unless a live record
    /// already exists. Must be a single test-and-set at the store level.
    fn accept_once(&self, key: &str, ttl_seconds: u64, now_seconds: i64) -> Result<DedupeOutcome>;
}

/// SQLite-backed dedupe table shared by every process pointing at the same file.
pub(crate) struct SqliteDedupeStore {
    conn: Connection,
}

impl SqliteDedupeStore {
    pub(crate) fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(path = %path.display(), "opening dedupe store");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dedupe (
                pk TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dedupe_expires ON dedupe(expires_at);",
        )?;
        Ok(Self { conn })
    }

    /// Deletes records whose window has closed. Returns how many were removed.
    pub(crate) fn purge_expired(&self, now_seconds: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM dedupe WHERE expires_at <= ?1",
            params![now_seconds],
        )?;
        Ok(removed)
    }
}

impl DedupeStore for SqliteDedupeStore {
    fn accept_once(&self, key: &str, ttl_seconds: u64, now_seconds: i64) -> Result<DedupeOutcome> {
        let ttl = i64::try_from(ttl_seconds.max(1)).unwrap_or(i64::MAX);
        let expires_at = now_seconds.saturating_add(ttl);
        // An expired row is taken over in place; a live one leaves the
        // statement with zero changes.
        let changed = self.conn.execute(
            "INSERT INTO dedupe (pk, expires_at) VALUES (?1, ?2)
             ON CONFLICT(pk) DO UPDATE SET expires_at = excluded.expires_at
             WHERE dedupe.expires_at <= ?3",
            params![key, expires_at, now_seconds],
        )?;
        let outcome = if changed > 0 {
            DedupeOutcome::Accepted
        } else {
            DedupeOutcome::Duplicate
        };
        debug!(key, ?outcome, expires_at, "dedupe check");
        Ok(outcome)
    }
}
