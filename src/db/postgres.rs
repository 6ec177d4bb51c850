// PgLedger — PostgreSQL backend implementing the Ledger trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Per-key serialization comes from row locks rather than a process-wide
// mutex: a second INSERT for the same (user_id, message_id) blocks on the
// primary key until the first transaction finishes, and DELETE ... RETURNING
// hands the row to exactly one remover.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_core::transaction::Transaction;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{AddOutcome, AggregateCount, BookmarkRecord, LedgerStats, NewBookmark, RemoveOutcome};
use super::traits::Ledger;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

const RECORD_COLUMNS: &str = "guild_id, channel_id, user_id, message_id, message_link,
     copy_channel_id, copy_message_id, created_at";

const AGGREGATE_COLUMNS: &str =
    "guild_id, channel_id, message_id, message_author_id, message_link, bookmark_count";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// bot instances starting together don't race to apply the same
    /// migration. The unlock always runs, even if a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "DOGEAR" as a big-endian integer.
        const MIGRATION_LOCK_KEY: i64 = 0x444F_4745_4152;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(
                1,
                include_str!("../../migrations/postgres/0001_initial.sql"),
            )];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        // Migration error takes priority over unlock error.
        migration_result?;
        unlock_result?;

        Ok(())
    }

    /// Decrement the aggregate of a just-deleted record and commit.
    async fn finish_removal(
        mut tx: Transaction<'static, Postgres>,
        row: Option<PgRow>,
    ) -> Result<RemoveOutcome> {
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(RemoveOutcome::NotFound);
        };
        let record = record_from_row(&row)?;

        sqlx_core::query::query(
            "UPDATE bookmarked_messages SET bookmark_count = bookmark_count - 1
             WHERE guild_id = $1 AND message_id = $2",
        )
        .bind(&record.guild_id)
        .bind(&record.message_id)
        .execute(&mut *tx)
        .await?;

        sqlx_core::query::query(
            "DELETE FROM bookmarked_messages
             WHERE guild_id = $1 AND message_id = $2 AND bookmark_count <= 0",
        )
        .bind(&record.guild_id)
        .bind(&record.message_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("Failed to commit bookmark removal")?;
        Ok(RemoveOutcome::Removed(record))
    }
}

fn record_from_row(row: &PgRow) -> Result<BookmarkRecord> {
    Ok(BookmarkRecord {
        guild_id: row.try_get(0)?,
        channel_id: row.try_get(1)?,
        user_id: row.try_get(2)?,
        message_id: row.try_get(3)?,
        message_link: row.try_get(4)?,
        copy_channel_id: row.try_get(5)?,
        copy_message_id: row.try_get(6)?,
        created_at: row.try_get::<DateTime<Utc>, _>(7)?,
    })
}

fn aggregate_from_row(row: &PgRow) -> Result<AggregateCount> {
    Ok(AggregateCount {
        guild_id: row.try_get(0)?,
        channel_id: row.try_get(1)?,
        message_id: row.try_get(2)?,
        message_author_id: row.try_get(3)?,
        message_link: row.try_get(4)?,
        count: row.try_get(5)?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn try_add(&self, bookmark: &NewBookmark) -> Result<AddOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx_core::query::query(
            "INSERT INTO user_bookmarks
                (guild_id, channel_id, user_id, message_id, message_link, created_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (user_id, message_id) DO NOTHING",
        )
        .bind(&bookmark.guild_id)
        .bind(&bookmark.channel_id)
        .bind(&bookmark.user_id)
        .bind(&bookmark.message_id)
        .bind(&bookmark.message_link)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(AddOutcome::AlreadyExists);
        }

        sqlx_core::query::query(
            "INSERT INTO bookmarked_messages
                (guild_id, channel_id, message_id, message_author_id, message_link, bookmark_count)
             VALUES ($1, $2, $3, $4, $5, 1)
             ON CONFLICT (guild_id, message_id)
             DO UPDATE SET bookmark_count = bookmarked_messages.bookmark_count + 1",
        )
        .bind(&bookmark.guild_id)
        .bind(&bookmark.channel_id)
        .bind(&bookmark.message_id)
        .bind(&bookmark.message_author_id)
        .bind(&bookmark.message_link)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("Failed to commit bookmark insert")?;
        Ok(AddOutcome::Created)
    }

    async fn attach_copy(
        &self,
        user_id: &str,
        message_id: &str,
        copy_channel_id: &str,
        copy_message_id: &str,
    ) -> Result<bool> {
        let result = sqlx_core::query::query(
            "UPDATE user_bookmarks
             SET copy_channel_id = $3, copy_message_id = $4
             WHERE user_id = $1 AND message_id = $2 AND copy_message_id IS NULL",
        )
        .bind(user_id)
        .bind(message_id)
        .bind(copy_channel_id)
        .bind(copy_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_by_user_and_message(&self, user_id: &str, message_id: &str) -> Result<RemoveOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx_core::query::query(&format!(
            "DELETE FROM user_bookmarks WHERE user_id = $1 AND message_id = $2
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(user_id)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;
        Self::finish_removal(tx, row).await
    }

    async fn remove_by_user_and_copy(&self, user_id: &str, copy_message_id: &str) -> Result<RemoveOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx_core::query::query(&format!(
            "DELETE FROM user_bookmarks WHERE user_id = $1 AND copy_message_id = $2
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(user_id)
        .bind(copy_message_id)
        .fetch_optional(&mut *tx)
        .await?;
        Self::finish_removal(tx, row).await
    }

    async fn remove_stale_reservation(
        &self,
        user_id: &str,
        message_id: &str,
        created_before: DateTime<Utc>,
    ) -> Result<RemoveOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx_core::query::query(&format!(
            "DELETE FROM user_bookmarks
             WHERE user_id = $1 AND message_id = $2
               AND copy_message_id IS NULL AND created_at < $3
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(user_id)
        .bind(message_id)
        .bind(created_before)
        .fetch_optional(&mut *tx)
        .await?;
        Self::finish_removal(tx, row).await
    }

    async fn get_bookmark(&self, user_id: &str, message_id: &str) -> Result<Option<BookmarkRecord>> {
        let row = sqlx_core::query::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_bookmarks WHERE user_id = $1 AND message_id = $2"
        ))
        .bind(user_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_aggregate(&self, guild_id: &str, message_id: &str) -> Result<Option<AggregateCount>> {
        let row = sqlx_core::query::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM bookmarked_messages WHERE guild_id = $1 AND message_id = $2"
        ))
        .bind(guild_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(aggregate_from_row).transpose()
    }

    async fn top_bookmarked(&self, guild_id: &str, limit: u32) -> Result<Vec<AggregateCount>> {
        let rows = sqlx_core::query::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM bookmarked_messages
             WHERE guild_id = $1 AND bookmark_count > 0
             ORDER BY bookmark_count DESC, message_id ASC
             LIMIT $2"
        ))
        .bind(guild_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(aggregate_from_row).collect()
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let row = sqlx_core::query::query(
            "SELECT
                (SELECT COUNT(*) FROM user_bookmarks)::bigint,
                (SELECT COUNT(*) FROM bookmarked_messages)::bigint,
                (SELECT COUNT(*) FROM user_bookmarks WHERE copy_message_id IS NULL)::bigint",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(LedgerStats {
            bookmarks: row.try_get(0)?,
            tracked_messages: row.try_get(1)?,
            pending_reservations: row.try_get(2)?,
        })
    }
}
