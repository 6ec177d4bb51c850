// SqliteLedger — rusqlite backend implementing the Ledger trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.
//
// The single mutex is a global write lock: every ledger operation is fully
// serialized, which trivially satisfies per-key serialization.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{AddOutcome, AggregateCount, BookmarkRecord, LedgerStats, NewBookmark, RemoveOutcome};
use super::traits::Ledger;

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// A fresh in-memory ledger with the schema applied. Used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn try_add(&self, bookmark: &NewBookmark) -> Result<AddOutcome> {
        let mut conn = self.conn.lock().await;
        super::queries::try_add(&mut conn, bookmark)
    }

    async fn attach_copy(
        &self,
        user_id: &str,
        message_id: &str,
        copy_channel_id: &str,
        copy_message_id: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        super::queries::attach_copy(&mut conn, user_id, message_id, copy_channel_id, copy_message_id)
    }

    async fn remove_by_user_and_message(&self, user_id: &str, message_id: &str) -> Result<RemoveOutcome> {
        let mut conn = self.conn.lock().await;
        super::queries::remove_by_user_and_message(&mut conn, user_id, message_id)
    }

    async fn remove_by_user_and_copy(&self, user_id: &str, copy_message_id: &str) -> Result<RemoveOutcome> {
        let mut conn = self.conn.lock().await;
        super::queries::remove_by_user_and_copy(&mut conn, user_id, copy_message_id)
    }

    async fn remove_stale_reservation(
        &self,
        user_id: &str,
        message_id: &str,
        created_before: DateTime<Utc>,
    ) -> Result<RemoveOutcome> {
        let mut conn = self.conn.lock().await;
        super::queries::remove_stale_reservation(&mut conn, user_id, message_id, created_before)
    }

    async fn get_bookmark(&self, user_id: &str, message_id: &str) -> Result<Option<BookmarkRecord>> {
        let conn = self.conn.lock().await;
        super::queries::get_bookmark(&conn, user_id, message_id)
    }

    async fn get_aggregate(&self, guild_id: &str, message_id: &str) -> Result<Option<AggregateCount>> {
        let conn = self.conn.lock().await;
        super::queries::get_aggregate(&conn, guild_id, message_id)
    }

    async fn top_bookmarked(&self, guild_id: &str, limit: u32) -> Result<Vec<AggregateCount>> {
        let conn = self.conn.lock().await;
        super::queries::top_bookmarked(&conn, guild_id, limit)
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let conn = self.conn.lock().await;
        super::queries::stats(&conn)
    }
}
