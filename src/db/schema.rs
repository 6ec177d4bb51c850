// Database schema — table creation and migrations.
//
// A `schema_version` table tracks which migrations have run, and each
// migration is a function that executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per (user, bookmarked message)
        CREATE TABLE IF NOT EXISTS user_bookmarks (
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,          -- channel of the origin message
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            message_link TEXT NOT NULL,
            copy_channel_id TEXT,              -- DM channel of the private copy
            copy_message_id TEXT,              -- NULL while the reservation is pending
            created_at TEXT NOT NULL,          -- RFC 3339, UTC
            PRIMARY KEY (user_id, message_id)
        );

        -- Aggregate bookmark count per message, purged at zero
        CREATE TABLE IF NOT EXISTS bookmarked_messages (
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            message_author_id TEXT NOT NULL,
            message_link TEXT NOT NULL,
            bookmark_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (guild_id, message_id)
        );

        -- Removal from the private surface looks bookmarks up by copy id
        CREATE INDEX IF NOT EXISTS idx_bookmarks_copy
            ON user_bookmarks(user_id, copy_message_id);

        -- Per-guild leaderboard for `dogear top`
        CREATE INDEX IF NOT EXISTS idx_aggregates_rank
            ON bookmarked_messages(guild_id, bookmark_count);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // schema_version, user_bookmarks, bookmarked_messages
        assert_eq!(table_count(&conn).unwrap(), 3i64);
    }

    #[test]
    fn test_bookmark_primary_key_rejects_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        let insert = "INSERT INTO user_bookmarks
            (guild_id, channel_id, user_id, message_id, message_link, created_at)
            VALUES ('g', 'c', 'u', 'm', 'link', '2024-01-01T00:00:00+00:00')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_schema_version_recorded_once() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1]);
    }
}
