//! Per-session conversation transcripts and the append-only transcript log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::constants::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL_SECS, END_OF_SESSION_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the conversation. Serialized as `{"type": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(rename = "message")]
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct SessionEntry {
    turns: Vec<ChatTurn>,
    last_touched: Instant,
}

/// Transcripts of all live sessions, keyed by session id.
///
/// Sessions idle for longer than the TTL are dropped, and once `max_sessions`
/// transcripts are held the least recently written one makes room for a new one.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    max_sessions: usize,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_SESSIONS,
            Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        )
    }

    pub fn with_limits(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    pub async fn append(&self, session: SessionId, turn: ChatTurn) {
        debug!(%session, role = %turn.role, "Appending turn");
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        match sessions.get_mut(&session) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.turns.push(turn);
                entry.last_touched = now;
            }
            _ => {
                sessions.remove(&session);
                self.make_room(&mut sessions, now);
                sessions.insert(
                    session,
                    SessionEntry {
                        turns: vec![turn],
                        last_touched: now,
                    },
                );
            }
        }
    }

    /// Snapshot of the session's transcript in chronological order.
    pub async fn history(&self, session: SessionId) -> Vec<ChatTurn> {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .get(&session)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.turns.clone())
            .unwrap_or_default()
    }

    /// Drops every turn of the session.
    pub async fn clear(&self, session: SessionId) {
        self.sessions.write().await.remove(&session);
    }

    /// Number of sessions that have not expired yet.
    pub async fn session_count(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.duration_since(entry.last_touched) >= self.ttl
    }

    // Sweeps expired sessions, then evicts by age until one more fits.
    fn make_room(&self, sessions: &mut HashMap<SessionId, SessionEntry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        if sessions.len() < before {
            debug!(expired = before - sessions.len(), "Dropped idle sessions");
        }

        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            info!(session = %oldest, "Evicted least recently used session");
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write transcript log {}: {source}", .path.display())]
pub struct TranscriptLogError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

/// Append-only text file that transcripts are saved to.
#[derive(Debug)]
pub struct TranscriptLog {
    path: PathBuf,
    // Serializes writers so batches from different sessions never interleave.
    write_lock: Mutex<()>,
}

impl TranscriptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self, turns), fields(path = %self.path.display(), turns = turns.len()))]
    pub async fn persist(&self, turns: &[ChatTurn]) -> Result<(), TranscriptLogError> {
        let batch = format_batch(turns);
        let _guard = self.write_lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.error(source))?;
        file.write_all(batch.as_bytes())
            .await
            .map_err(|source| self.error(source))?;
        file.flush().await.map_err(|source| self.error(source))?;

        info!("Transcript saved");
        Ok(())
    }

    fn error(&self, source: std::io::Error) -> TranscriptLogError {
        TranscriptLogError {
            path: self.path.clone(),
            source,
        }
    }
}

/// Renders one saved batch: a `ROLE: message` line per turn, then the end marker.
pub fn format_batch(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(&turn.role.as_str().to_uppercase());
        out.push_str(": ");
        out.push_str(&turn.text);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(END_OF_SESSION_MARKER);
    out.push_str("\n\n");
    out
}
