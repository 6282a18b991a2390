// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use qi_config::SessionConfig;

use crate::SessionState;

/// Listing row for saved sessions.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub entries: usize,
}

/// Holds the live session and its on-disk snapshots.
///
/// Mutation happens only from the orchestrator loop; other components read
/// through cloned views.  The snapshot writer may run concurrently — it
/// writes to a temp file and renames, so a crash never leaves a
/// half-written snapshot behind.
pub struct StateStore {
    session: Mutex<SessionState>,
    snapshot_dir: PathBuf,
}

impl StateStore {
    /// Resolve the snapshot directory from config (or the XDG default),
    /// create it, and start with a fresh session.
    pub fn new(config: &SessionConfig) -> anyhow::Result<Self> {
        let dir = match &config.snapshot_dir {
            Some(d) => PathBuf::from(shellexpand::tilde(d).to_string()),
            None => default_snapshot_dir(),
        };
        Self::with_dir(dir)
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let snapshot_dir = dir.into();
        std::fs::create_dir_all(&snapshot_dir)
            .with_context(|| format!("creating snapshot dir {}", snapshot_dir.display()))?;
        Ok(Self {
            session: Mutex::new(SessionState::new()),
            snapshot_dir,
        })
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Cloned view of the live session.
    pub fn current(&self) -> SessionState {
        self.session.lock().expect("session lock").clone()
    }

    pub fn current_id(&self) -> String {
        self.session.lock().expect("session lock").id.clone()
    }

    /// Run a mutation against the live session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut session = self.session.lock().expect("session lock");
        f(&mut session)
    }

    pub fn add_entry(&self, role: &str, content: impl Into<String>) {
        self.with_session(|s| s.add_entry(role, content));
    }

    pub fn set_memory(&self, key: impl Into<String>, value: impl Into<String>) {
        self.with_session(|s| s.set_memory(key, value));
    }

    pub fn get_memory(&self, key: &str) -> Option<String> {
        self.session
            .lock()
            .expect("session lock")
            .get_memory(key)
            .map(str::to_string)
    }

    /// Replace the live session with a fresh one.  Explicit destruction —
    /// nothing else discards a session.
    pub fn reset(&self) -> SessionState {
        let mut session = self.session.lock().expect("session lock");
        let old = std::mem::take(&mut *session);
        old
    }

    /// Swap in a restored session.
    pub fn restore(&self, state: SessionState) {
        *self.session.lock().expect("session lock") = state;
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{id}.json"))
    }

    /// Write a snapshot atomically: serialize to a temp file in the same
    /// directory, then rename over the target.
    pub fn persist(&self, state: &SessionState) -> anyhow::Result<PathBuf> {
        let path = self.snapshot_path(&state.id);
        let json = serde_json::to_string_pretty(state).context("serializing session")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.snapshot_dir)
            .context("creating snapshot temp file")?;
        tmp.write_all(json.as_bytes())
            .context("writing snapshot temp file")?;
        tmp.persist(&path)
            .with_context(|| format!("renaming snapshot into {}", path.display()))?;
        debug!(id = %state.id, path = %path.display(), "session snapshot written");
        Ok(path)
    }

    /// Snapshot the live session.
    pub fn persist_current(&self) -> anyhow::Result<PathBuf> {
        let state = self.current();
        self.persist(&state)
    }

    /// Load a snapshot by session id.  `Ok(None)` when no snapshot exists.
    pub fn load(&self, id: &str) -> anyhow::Result<Option<SessionState>> {
        let path = self.snapshot_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let state: SessionState = serde_json::from_str(&text)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        Ok(Some(state))
    }

    /// All snapshots, most recently active first.
    pub fn list(&self) -> anyhow::Result<Vec<SessionSummary>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.snapshot_dir).context("reading snapshot dir")? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            // Tolerate foreign files in the directory; snapshots are safe to
            // delete, so a malformed one is skipped rather than fatal.
            let Ok(state) = serde_json::from_str::<SessionState>(&text) else {
                warn!(path = %path.display(), "skipping unreadable snapshot");
                continue;
            };
            out.push(SessionSummary {
                id: state.id.clone(),
                created_at: state.created_at,
                last_active: state.last_active,
                entries: state.entries().len(),
            });
        }
        out.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(out)
    }

    /// Restore the most recently active snapshot, if any.
    pub fn restore_latest(&self) -> anyhow::Result<Option<SessionState>> {
        let Some(latest) = self.list()?.into_iter().next() else {
            return Ok(None);
        };
        let Some(state) = self.load(&latest.id)? else {
            return Ok(None);
        };
        self.restore(state.clone());
        Ok(Some(state))
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let path = self.snapshot_path(id);
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("deleting snapshot {}", path.display()))?;
        Ok(true)
    }

    /// Drop snapshots whose last activity is older than `ttl`.
    pub fn prune_older_than(&self, ttl: Duration) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut removed = 0;
        for summary in self.list()? {
            if summary.last_active < cutoff && self.delete(&summary.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Timer task writing periodic snapshots.  Write failures are logged and
    /// never block or kill anything else.
    pub fn spawn_autosnapshot(store: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so an empty session
            // is not snapshotted at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.persist_current() {
                    warn!(error = %e, "auto-snapshot failed");
                }
            }
        })
    }
}

fn default_snapshot_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("qi-prompt")
        .join("sessions")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::with_dir(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let (store, _dir) = store();
        store.add_entry("user", "hello");
        store.add_entry("assistant", "hi there");
        store.set_memory("key", "value");

        let before = store.current();
        store.persist(&before).unwrap();
        let after = store.load(&before.id).unwrap().expect("snapshot exists");

        assert_eq!(after.id, before.id);
        assert_eq!(after.entries().len(), 2);
        assert_eq!(after.entries()[0].content, "hello");
        assert_eq!(after.get_memory("key"), Some("value"));
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn load_missing_snapshot_is_none() {
        let (store, _dir) = store();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn persist_is_idempotent() {
        let (store, _dir) = store();
        store.add_entry("user", "x");
        let state = store.current();
        let p1 = store.persist(&state).unwrap();
        let p2 = store.persist(&state).unwrap();
        assert_eq!(p1, p2);
        let loaded = store.load(&state.id).unwrap().unwrap();
        assert_eq!(loaded.entries().len(), 1);
    }

    #[test]
    fn list_sorts_most_recent_first() {
        let (store, _dir) = store();
        let mut old = SessionState::new();
        old.add_entry("user", "old");
        old.last_active = Utc::now() - chrono::Duration::hours(2);
        store.persist(&old).unwrap();

        let mut new = SessionState::new();
        new.add_entry("user", "new");
        store.persist(&new).unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, new.id);
        assert_eq!(list[1].id, old.id);
    }

    #[test]
    fn restore_latest_swaps_live_session() {
        let (store, _dir) = store();
        let mut saved = SessionState::new();
        saved.add_entry("user", "from before");
        store.persist(&saved).unwrap();

        let restored = store.restore_latest().unwrap().expect("has snapshot");
        assert_eq!(restored.id, saved.id);
        assert_eq!(store.current_id(), saved.id);
    }

    #[test]
    fn restore_latest_without_snapshots_is_none() {
        let (store, _dir) = store();
        assert!(store.restore_latest().unwrap().is_none());
    }

    #[test]
    fn delete_removes_snapshot() {
        let (store, _dir) = store();
        let state = store.current();
        store.persist(&state).unwrap();
        assert!(store.delete(&state.id).unwrap());
        assert!(!store.delete(&state.id).unwrap());
        assert!(store.load(&state.id).unwrap().is_none());
    }

    #[test]
    fn reset_returns_old_session_and_starts_fresh() {
        let (store, _dir) = store();
        store.add_entry("user", "x");
        let old_id = store.current_id();
        let old = store.reset();
        assert_eq!(old.id, old_id);
        assert_ne!(store.current_id(), old_id);
        assert!(store.current().entries().is_empty());
    }

    #[test]
    fn malformed_snapshot_files_are_skipped() {
        let (store, dir) = store();
        std::fs::write(dir.path().join("junk.json"), "not json").unwrap();
        let state = store.current();
        store.persist(&state).unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn prune_removes_only_stale_snapshots() {
        let (store, _dir) = store();
        let mut stale = SessionState::new();
        stale.last_active = Utc::now() - chrono::Duration::days(30);
        store.persist(&stale).unwrap();
        let fresh = store.current();
        store.persist(&fresh).unwrap();

        let removed = store
            .prune_older_than(Duration::from_secs(24 * 3600))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(&stale.id).unwrap().is_none());
        assert!(store.load(&fresh.id).unwrap().is_some());
    }
}
