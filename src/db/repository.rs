use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use super::StorageError;
use crate::models::{Emotion, Role, Turn};

/// ISO-8601 with optional fractional seconds, matching what we write.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Insert one turn and return the stored row (fresh id, as persisted).
pub fn insert_turn(
    conn: &Connection,
    timestamp: NaiveDateTime,
    role: Role,
    message: &str,
    emotion: Emotion,
) -> Result<Turn, StorageError> {
    conn.execute(
        "INSERT INTO turns (timestamp, role, message, emotion) VALUES (?1, ?2, ?3, ?4)",
        params![
            timestamp.format(TIMESTAMP_FORMAT).to_string(),
            role.as_str(),
            message,
            emotion.as_str(),
        ],
    )?;

    let id = conn.last_insert_rowid();
    Ok(Turn {
        id,
        timestamp,
        role,
        message: message.to_string(),
        emotion,
    })
}

/// Last `n` turns in chronological order (id ascending).
///
/// Reads newest-first for the LIMIT, then reverses back to chronological.
pub fn recent_turns(conn: &Connection, n: usize) -> Result<Vec<Turn>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, role, message, emotion
         FROM turns ORDER BY id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![n as i64], |row| {
        Ok(TurnRow {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            role: row.get(2)?,
            message: row.get(3)?,
            emotion: row.get(4)?,
        })
    })?;

    let mut turns = Vec::new();
    for row in rows {
        turns.push(turn_from_row(row?)?);
    }
    turns.reverse();
    Ok(turns)
}

/// Delete all turns unconditionally.
pub fn clear_turns(conn: &Connection) -> Result<(), StorageError> {
    conn.execute("DELETE FROM turns", [])?;
    Ok(())
}

/// Total number of stored turns.
pub fn count_turns(conn: &Connection) -> Result<i64, StorageError> {
    let count = conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))?;
    Ok(count)
}

struct TurnRow {
    id: i64,
    timestamp: String,
    role: String,
    message: String,
    emotion: String,
}

fn turn_from_row(row: TurnRow) -> Result<Turn, StorageError> {
    Ok(Turn {
        id: row.id,
        timestamp: NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| StorageError::ConstraintViolation(e.to_string()))?,
        role: Role::from_str(&row.role)?,
        message: row.message,
        emotion: Emotion::from_str(&row.emotion)?,
    })
}
