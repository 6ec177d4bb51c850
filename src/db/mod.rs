// Database layer — the bookmark ledger and its storage backends.
//
// SQLite (rusqlite, "bundled" so there's no system dependency) is the default
// backend; its file lives wherever DOGEAR_DB_PATH points (defaults to
// ./bookmarks.db). PostgreSQL is available behind the `postgres` feature.
// Callers only ever see `Arc<dyn Ledger>`.

pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use traits::Ledger;

#[cfg(feature = "sqlite")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "sqlite")]
use rusqlite::Connection;
#[cfg(feature = "sqlite")]
use std::path::Path;
use std::sync::Arc;

/// Open (or create) the SQLite database and run migrations.
///
/// This is the main entry point — called by `dogear init` and `dogear run`.
#[cfg(feature = "sqlite")]
pub fn initialize(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // WAL lets `dogear status` read while the bot writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::create_tables(&conn)?;

    Ok(conn)
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
#[cfg(feature = "sqlite")]
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `dogear init` first.",
            db_path
        );
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

/// Create (if needed) and open a SQLite-backed ledger.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn Ledger>> {
    let conn = initialize(db_path)?;
    Ok(Arc::new(sqlite::SqliteLedger::new(conn)))
}

/// Open an existing SQLite-backed ledger.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Ledger>> {
    let conn = open(db_path)?;
    Ok(Arc::new(sqlite::SqliteLedger::new(conn)))
}

/// Connect to PostgreSQL (running migrations) and return the ledger.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str) -> Result<Arc<dyn Ledger>> {
    let db = postgres::PgLedger::connect(database_url).await?;
    Ok(Arc::new(db))
}
