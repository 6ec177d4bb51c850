// Data models — the rows the bookmark ledger owns and the outcomes of its
// operations.
//
// These are separate from the storage backends so the orchestrator and the
// status report can use them without depending on rusqlite or sqlx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's bookmark of one message. Unique per (user_id, message_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub guild_id: String,
    /// Channel of the bookmarked (origin) message
    pub channel_id: String,
    pub user_id: String,
    pub message_id: String,
    pub message_link: String,
    /// DM channel holding the private copy. None while a reservation is
    /// pending, and always None for self-describing copies.
    pub copy_channel_id: Option<String>,
    pub copy_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BookmarkRecord {
    /// A linked-strategy reservation that has not been finalized with a copy id.
    pub fn is_pending(&self) -> bool {
        self.copy_message_id.is_none()
    }
}

/// Input to `Ledger::try_add`: the key plus the message metadata the
/// aggregate row needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub message_id: String,
    pub message_author_id: String,
    pub message_link: String,
}

/// Server-visible popularity counter for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCount {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub message_author_id: String,
    pub message_link: String,
    pub count: i64,
}

/// Result of `Ledger::try_add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Created,
    AlreadyExists,
}

/// Result of the two remove operations. `Removed` carries the deleted record
/// so callers learn the origin location and any copy linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(BookmarkRecord),
    NotFound,
}

impl RemoveOutcome {
    pub fn is_removed(&self) -> bool {
        matches!(self, RemoveOutcome::Removed(_))
    }
}

/// Row counts shown by `dogear status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub bookmarks: i64,
    pub tracked_messages: i64,
    pub pending_reservations: i64,
}
