// Ledger trait — backend-agnostic async interface to the authoritative
// bookmark state.
//
// Implementors: SqliteLedger (wraps rusqlite), PgLedger (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.
//
// Every mutating method is one atomic unit: a bookmark row is never written
// or deleted without the matching aggregate change, and two calls touching
// the same (user_id, message_id) never interleave.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{AddOutcome, AggregateCount, BookmarkRecord, LedgerStats, NewBookmark, RemoveOutcome};

#[async_trait]
pub trait Ledger: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Mutations ---

    /// Insert the bookmark and create/increment its aggregate, unless the
    /// user already bookmarked this message.
    async fn try_add(&self, bookmark: &NewBookmark) -> Result<AddOutcome>;

    /// Finalize a pending reservation with the id of the delivered copy.
    ///
    /// Returns false when there is no pending reservation for the key (it was
    /// removed while delivery was in flight, or was already finalized).
    async fn attach_copy(
        &self,
        user_id: &str,
        message_id: &str,
        copy_channel_id: &str,
        copy_message_id: &str,
    ) -> Result<bool>;

    /// Delete the bookmark and decrement its aggregate, purging the aggregate
    /// once it reaches zero.
    async fn remove_by_user_and_message(&self, user_id: &str, message_id: &str)
        -> Result<RemoveOutcome>;

    /// Same as `remove_by_user_and_message`, looked up by the private copy id.
    async fn remove_by_user_and_copy(&self, user_id: &str, copy_message_id: &str)
        -> Result<RemoveOutcome>;

    /// Roll back a reservation that never received a copy id and was created
    /// before `created_before`. Finalized bookmarks are left untouched.
    async fn remove_stale_reservation(
        &self,
        user_id: &str,
        message_id: &str,
        created_before: DateTime<Utc>,
    ) -> Result<RemoveOutcome>;

    // --- Reads ---

    async fn get_bookmark(&self, user_id: &str, message_id: &str) -> Result<Option<BookmarkRecord>>;

    async fn get_aggregate(&self, guild_id: &str, message_id: &str) -> Result<Option<AggregateCount>>;

    /// Most-bookmarked messages of one guild, highest count first.
    async fn top_bookmarked(&self, guild_id: &str, limit: u32) -> Result<Vec<AggregateCount>>;

    async fn stats(&self) -> Result<LedgerStats>;
}
