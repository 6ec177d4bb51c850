// Database queries — the SQLite side of every ledger operation.
//
// Every mutation runs inside one IMMEDIATE transaction, so the bookmark row
// and its aggregate change commit or roll back together and a second writer
// (another process on the same file) waits instead of interleaving.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use super::models::{AddOutcome, AggregateCount, BookmarkRecord, LedgerStats, NewBookmark, RemoveOutcome};

const RECORD_COLUMNS: &str = "guild_id, channel_id, user_id, message_id, message_link,
     copy_channel_id, copy_message_id, created_at";

const AGGREGATE_COLUMNS: &str =
    "guild_id, channel_id, message_id, message_author_id, message_link, bookmark_count";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<BookmarkRecord> {
    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(BookmarkRecord {
        guild_id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        message_id: row.get(3)?,
        message_link: row.get(4)?,
        copy_channel_id: row.get(5)?,
        copy_message_id: row.get(6)?,
        created_at,
    })
}

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateCount> {
    Ok(AggregateCount {
        guild_id: row.get(0)?,
        channel_id: row.get(1)?,
        message_id: row.get(2)?,
        message_author_id: row.get(3)?,
        message_link: row.get(4)?,
        count: row.get(5)?,
    })
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to begin ledger transaction")
}

// --- Mutations ---

/// Insert a bookmark and bump its aggregate in one transaction.
pub fn try_add(conn: &mut Connection, bookmark: &NewBookmark) -> Result<AddOutcome> {
    let tx = begin(conn)?;

    let inserted = tx.execute(
        "INSERT INTO user_bookmarks
            (guild_id, channel_id, user_id, message_id, message_link, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, message_id) DO NOTHING",
        params![
            bookmark.guild_id,
            bookmark.channel_id,
            bookmark.user_id,
            bookmark.message_id,
            bookmark.message_link,
            Utc::now().to_rfc3339(),
        ],
    )?;

    if inserted == 0 {
        // Nothing written; dropping the transaction rolls it back.
        return Ok(AddOutcome::AlreadyExists);
    }

    tx.execute(
        "INSERT INTO bookmarked_messages
            (guild_id, channel_id, message_id, message_author_id, message_link, bookmark_count)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)
         ON CONFLICT(guild_id, message_id) DO UPDATE SET bookmark_count = bookmark_count + 1",
        params![
            bookmark.guild_id,
            bookmark.channel_id,
            bookmark.message_id,
            bookmark.message_author_id,
            bookmark.message_link,
        ],
    )?;

    tx.commit().context("Failed to commit bookmark insert")?;
    Ok(AddOutcome::Created)
}

/// Record the delivered copy on a pending reservation.
pub fn attach_copy(
    conn: &mut Connection,
    user_id: &str,
    message_id: &str,
    copy_channel_id: &str,
    copy_message_id: &str,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE user_bookmarks
         SET copy_channel_id = ?3, copy_message_id = ?4
         WHERE user_id = ?1 AND message_id = ?2 AND copy_message_id IS NULL",
        params![user_id, message_id, copy_channel_id, copy_message_id],
    )?;
    Ok(updated == 1)
}

pub fn remove_by_user_and_message(
    conn: &mut Connection,
    user_id: &str,
    message_id: &str,
) -> Result<RemoveOutcome> {
    let tx = begin(conn)?;
    let record = tx
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM user_bookmarks WHERE user_id = ?1 AND message_id = ?2"),
            params![user_id, message_id],
            record_from_row,
        )
        .optional()?;
    remove_record(tx, record)
}

pub fn remove_by_user_and_copy(
    conn: &mut Connection,
    user_id: &str,
    copy_message_id: &str,
) -> Result<RemoveOutcome> {
    let tx = begin(conn)?;
    let record = tx
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM user_bookmarks WHERE user_id = ?1 AND copy_message_id = ?2"
            ),
            params![user_id, copy_message_id],
            record_from_row,
        )
        .optional()?;
    remove_record(tx, record)
}

pub fn remove_stale_reservation(
    conn: &mut Connection,
    user_id: &str,
    message_id: &str,
    created_before: DateTime<Utc>,
) -> Result<RemoveOutcome> {
    let tx = begin(conn)?;
    let record = tx
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM user_bookmarks
                 WHERE user_id = ?1 AND message_id = ?2 AND copy_message_id IS NULL"
            ),
            params![user_id, message_id],
            record_from_row,
        )
        .optional()?
        .filter(|r| r.created_at < created_before);
    remove_record(tx, record)
}

/// Delete `record` (if any) and decrement its aggregate, purging rows that
/// reach zero. Consumes the transaction.
fn remove_record(tx: Transaction<'_>, record: Option<BookmarkRecord>) -> Result<RemoveOutcome> {
    let Some(record) = record else {
        return Ok(RemoveOutcome::NotFound);
    };

    tx.execute(
        "DELETE FROM user_bookmarks WHERE user_id = ?1 AND message_id = ?2",
        params![record.user_id, record.message_id],
    )?;
    tx.execute(
        "UPDATE bookmarked_messages SET bookmark_count = bookmark_count - 1
         WHERE guild_id = ?1 AND message_id = ?2",
        params![record.guild_id, record.message_id],
    )?;
    tx.execute(
        "DELETE FROM bookmarked_messages
         WHERE guild_id = ?1 AND message_id = ?2 AND bookmark_count <= 0",
        params![record.guild_id, record.message_id],
    )?;

    tx.commit().context("Failed to commit bookmark removal")?;
    Ok(RemoveOutcome::Removed(record))
}

// --- Reads ---

pub fn get_bookmark(conn: &Connection, user_id: &str, message_id: &str) -> Result<Option<BookmarkRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM user_bookmarks WHERE user_id = ?1 AND message_id = ?2"
    ))?;
    let result = stmt
        .query_row(params![user_id, message_id], record_from_row)
        .optional()?;
    Ok(result)
}

pub fn get_aggregate(conn: &Connection, guild_id: &str, message_id: &str) -> Result<Option<AggregateCount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {AGGREGATE_COLUMNS} FROM bookmarked_messages WHERE guild_id = ?1 AND message_id = ?2"
    ))?;
    let result = stmt
        .query_row(params![guild_id, message_id], aggregate_from_row)
        .optional()?;
    Ok(result)
}

pub fn top_bookmarked(conn: &Connection, guild_id: &str, limit: u32) -> Result<Vec<AggregateCount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {AGGREGATE_COLUMNS} FROM bookmarked_messages
         WHERE guild_id = ?1 AND bookmark_count > 0
         ORDER BY bookmark_count DESC, message_id ASC
         LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![guild_id, limit], aggregate_from_row)?;

    let mut aggregates = Vec::new();
    for row in rows {
        aggregates.push(row?);
    }
    Ok(aggregates)
}

pub fn stats(conn: &Connection) -> Result<LedgerStats> {
    let (bookmarks, pending_reservations): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(copy_message_id IS NULL), 0) FROM user_bookmarks",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let tracked_messages: i64 =
        conn.query_row("SELECT COUNT(*) FROM bookmarked_messages", [], |row| row.get(0))?;
    Ok(LedgerStats {
        bookmarks,
        tracked_messages,
        pending_reservations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn bookmark(user: &str, message: &str) -> NewBookmark {
        NewBookmark {
            guild_id: "100".to_string(),
            channel_id: "200".to_string(),
            user_id: user.to_string(),
            message_id: message.to_string(),
            message_author_id: "300".to_string(),
            message_link: format!("https://discord.com/channels/100/200/{message}"),
        }
    }

    fn count(conn: &Connection, message: &str) -> Option<i64> {
        get_aggregate(conn, "100", message).unwrap().map(|a| a.count)
    }

    #[test]
    fn test_try_add_creates_record_and_aggregate() {
        let mut conn = setup();
        assert_eq!(try_add(&mut conn, &bookmark("1", "9")).unwrap(), AddOutcome::Created);

        let record = get_bookmark(&conn, "1", "9").unwrap().unwrap();
        assert!(record.is_pending());
        assert_eq!(record.message_link, "https://discord.com/channels/100/200/9");
        assert_eq!(count(&conn, "9"), Some(1));
    }

    #[test]
    fn test_try_add_twice_counts_once() {
        let mut conn = setup();
        assert_eq!(try_add(&mut conn, &bookmark("1", "9")).unwrap(), AddOutcome::Created);
        assert_eq!(try_add(&mut conn, &bookmark("1", "9")).unwrap(), AddOutcome::AlreadyExists);
        assert_eq!(count(&conn, "9"), Some(1));
    }

    #[test]
    fn test_two_users_share_one_aggregate() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        try_add(&mut conn, &bookmark("2", "9")).unwrap();
        assert_eq!(count(&conn, "9"), Some(2));

        remove_by_user_and_message(&mut conn, "1", "9").unwrap();
        assert_eq!(count(&conn, "9"), Some(1));
        assert!(get_bookmark(&conn, "2", "9").unwrap().is_some());
    }

    #[test]
    fn test_remove_twice_purges_once() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();

        let first = remove_by_user_and_message(&mut conn, "1", "9").unwrap();
        assert!(first.is_removed());
        assert_eq!(count(&conn, "9"), None);

        let second = remove_by_user_and_message(&mut conn, "1", "9").unwrap();
        assert_eq!(second, RemoveOutcome::NotFound);
        assert_eq!(count(&conn, "9"), None);
    }

    #[test]
    fn test_remove_never_added_is_not_found() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("2", "9")).unwrap();
        assert_eq!(
            remove_by_user_and_message(&mut conn, "1", "9").unwrap(),
            RemoveOutcome::NotFound
        );
        assert_eq!(count(&conn, "9"), Some(1));
    }

    #[test]
    fn test_attach_copy_then_remove_by_copy() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        assert!(attach_copy(&mut conn, "1", "9", "dm", "copy").unwrap());
        // A finalized reservation can't be finalized again
        assert!(!attach_copy(&mut conn, "1", "9", "dm", "other").unwrap());

        match remove_by_user_and_copy(&mut conn, "1", "copy").unwrap() {
            RemoveOutcome::Removed(record) => {
                assert_eq!(record.message_id, "9");
                assert_eq!(record.channel_id, "200");
                assert_eq!(record.copy_channel_id.as_deref(), Some("dm"));
            }
            RemoveOutcome::NotFound => panic!("expected removal"),
        }
        assert_eq!(count(&conn, "9"), None);
        assert_eq!(
            remove_by_user_and_copy(&mut conn, "1", "copy").unwrap(),
            RemoveOutcome::NotFound
        );
    }

    #[test]
    fn test_remove_by_copy_is_scoped_to_user() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        attach_copy(&mut conn, "1", "9", "dm", "copy").unwrap();
        assert_eq!(
            remove_by_user_and_copy(&mut conn, "2", "copy").unwrap(),
            RemoveOutcome::NotFound
        );
        assert_eq!(count(&conn, "9"), Some(1));
    }

    #[test]
    fn test_attach_copy_after_removal_reports_missing() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        remove_by_user_and_message(&mut conn, "1", "9").unwrap();
        assert!(!attach_copy(&mut conn, "1", "9", "dm", "copy").unwrap());
    }

    #[test]
    fn test_stale_reservation_removed_only_when_old_and_pending() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();

        // Cutoff in the past: reservation is too fresh
        let past = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(
            remove_stale_reservation(&mut conn, "1", "9", past).unwrap(),
            RemoveOutcome::NotFound
        );

        let future = Utc::now() + chrono::Duration::minutes(5);
        assert!(remove_stale_reservation(&mut conn, "1", "9", future)
            .unwrap()
            .is_removed());
        assert_eq!(count(&conn, "9"), None);

        // Finalized bookmarks are never stale
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        attach_copy(&mut conn, "1", "9", "dm", "copy").unwrap();
        assert_eq!(
            remove_stale_reservation(&mut conn, "1", "9", future).unwrap(),
            RemoveOutcome::NotFound
        );
    }

    #[test]
    fn test_top_bookmarked_orders_by_count() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        try_add(&mut conn, &bookmark("1", "8")).unwrap();
        try_add(&mut conn, &bookmark("2", "8")).unwrap();

        let top = top_bookmarked(&conn, "100", 10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].message_id, "8");
        assert_eq!(top[0].count, 2);
        assert_eq!(top[1].message_id, "9");

        assert!(top_bookmarked(&conn, "other-guild", 10).unwrap().is_empty());
        assert_eq!(top_bookmarked(&conn, "100", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counts_pending() {
        let mut conn = setup();
        try_add(&mut conn, &bookmark("1", "9")).unwrap();
        try_add(&mut conn, &bookmark("2", "9")).unwrap();
        attach_copy(&mut conn, "2", "9", "dm", "copy").unwrap();

        let stats = stats(&conn).unwrap();
        assert_eq!(stats.bookmarks, 2);
        assert_eq!(stats.tracked_messages, 1);
        assert_eq!(stats.pending_reservations, 1);
    }
}
