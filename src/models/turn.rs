use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::{Emotion, Role};

/// One stored conversational event, user or assistant.
///
/// Turns are immutable once persisted. The id is assigned by the store at
/// insertion and is strictly increasing; retrieval order is always id
/// ascending (chronological).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub role: Role,
    pub message: String,
    /// Only meaningful for assistant turns; user turns store the default.
    pub emotion: Emotion,
}
