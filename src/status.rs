// Status and leaderboard display — ledger counts and the most-bookmarked
// messages of a server.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::db::models::AggregateCount;
use crate::db::Ledger;

/// Where the ledger lives, for display.
pub enum Storage<'a> {
    Sqlite(&'a str),
    Postgres,
}

impl Storage<'_> {
    /// A SQLite file must exist before it can be opened; PostgreSQL is
    /// migrated on connect.
    pub fn is_initialized(&self) -> bool {
        match self {
            Storage::Sqlite(path) => Path::new(path).exists(),
            Storage::Postgres => true,
        }
    }
}

pub fn show_uninitialized() {
    println!("Database: not initialized");
    println!("\nRun `dogear init` to set up the database.");
}

/// Display ledger status to the terminal.
pub async fn show(db: &Arc<dyn Ledger>, storage: Storage<'_>) -> Result<()> {
    match storage {
        Storage::Sqlite(path) => {
            let file_size = std::fs::metadata(path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({})", path, file_size);
        }
        Storage::Postgres => println!("Database: PostgreSQL"),
    }

    let stats = db.stats().await?;
    println!("Bookmarks: {}", stats.bookmarks);
    println!("Bookmarked messages: {}", stats.tracked_messages);
    if stats.pending_reservations > 0 {
        println!(
            "  {} {} awaiting delivery",
            "~".yellow(),
            stats.pending_reservations
        );
    }

    Ok(())
}

/// Display the most-bookmarked messages of one server.
pub fn display_top(guild_id: &str, aggregates: &[AggregateCount]) {
    if aggregates.is_empty() {
        println!("No bookmarks in server {guild_id} yet.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Most bookmarked in {guild_id} ===").bold()
    );
    println!();
    println!(
        "  {:>4}  {:>5}  {:<20}  {}",
        "Rank".dimmed(),
        "Count".dimmed(),
        "Author".dimmed(),
        "Link".dimmed(),
    );
    println!("  {}", "-".repeat(78).dimmed());

    for (i, aggregate) in aggregates.iter().enumerate() {
        println!(
            "  {:>4}. {:>5}  {:<20}  {}",
            i + 1,
            aggregate.count.to_string().bold(),
            aggregate.message_author_id,
            aggregate.message_link,
        );
    }
    println!();
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sqlite_file_is_uninitialized() {
        assert!(!Storage::Sqlite("/nonexistent/dogear/bookmarks.db").is_initialized());
        assert!(Storage::Sqlite(env!("CARGO_MANIFEST_DIR")).is_initialized());
        assert!(Storage::Postgres.is_initialized());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
