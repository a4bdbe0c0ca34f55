//! Conversation memory: an append-only log of turns with recency-bounded
//! retrieval and full clear.

use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use rusqlite::Connection;

use crate::db::{self, StorageError};
use crate::models::{Emotion, Role, Turn};

/// Handle on the persistent conversation log.
///
/// Writes are serialized through an internal mutex, so a single store can be
/// shared across the orchestrator's worker thread and its callers.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (creating if needed) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(db::open_database(path)?),
        })
    }

    /// In-memory store, for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(db::open_memory_database()?),
        })
    }

    /// Append one turn. The id and timestamp are assigned here; the stored
    /// row is returned. The write is durable once this returns.
    pub fn append(
        &self,
        role: Role,
        message: &str,
        emotion: Emotion,
    ) -> Result<Turn, StorageError> {
        if message.trim().is_empty() {
            return Err(StorageError::ConstraintViolation(
                "turn message must not be empty".into(),
            ));
        }

        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        db::insert_turn(&conn, Local::now().naive_local(), role, message, emotion)
    }

    /// The last `n` turns (or fewer) in chronological order.
    pub fn recent(&self, n: usize) -> Result<Vec<Turn>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        db::recent_turns(&conn, n)
    }

    /// Delete all turns unconditionally.
    pub fn clear(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        db::clear_turns(&conn)
    }

    /// Total number of stored turns.
    pub fn count(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        db::count_turns(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_recent_round_trips() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.append(Role::User, "hello there", Emotion::Neutral).unwrap();

        let turns = store.recent(1).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].message, "hello there");
        assert_eq!(turns[0].emotion, Emotion::Neutral);
    }

    #[test]
    fn recent_window_is_chronological() {
        let store = HistoryStore::open_in_memory().unwrap();
        for i in 1..=10 {
            store
                .append(Role::User, &format!("turn {i}"), Emotion::Neutral)
                .unwrap();
        }

        let turns = store.recent(4).unwrap();
        let messages: Vec<_> = turns.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, ["turn 7", "turn 8", "turn 9", "turn 10"]);
        assert!(turns.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn clear_empties_history() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.append(Role::User, "hi", Emotion::Neutral).unwrap();
        store.append(Role::Assistant, "hey", Emotion::Happy).unwrap();

        store.clear().unwrap();
        assert!(store.recent(10).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);

        // New appends work after a clear.
        store.append(Role::User, "fresh start", Emotion::Neutral).unwrap();
        assert_eq!(store.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn empty_message_is_rejected() {
        let store = HistoryStore::open_in_memory().unwrap();
        let err = store.append(Role::User, "   ", Emotion::Neutral).unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn timestamps_non_decreasing_with_insertion() {
        let store = HistoryStore::open_in_memory().unwrap();
        for _ in 0..5 {
            store.append(Role::User, "tick", Emotion::Neutral).unwrap();
        }

        let turns = store.recent(5).unwrap();
        assert!(turns.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        {
            let store = HistoryStore::open(&path).unwrap();
            store.append(Role::User, "remember me", Emotion::Neutral).unwrap();
            store.append(Role::Assistant, "always", Emotion::Love).unwrap();
        }

        let store = HistoryStore::open(&path).unwrap();
        let turns = store.recent(10).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].message, "remember me");
        assert_eq!(turns[1].message, "always");
        assert_eq!(turns[1].emotion, Emotion::Love);
    }
}
