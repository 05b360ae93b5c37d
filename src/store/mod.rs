pub mod subscriptions;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Thread-safe SQLite store owning subscriber records.
///
/// All handles share one connection behind a mutex, so every operation
/// (including the read-modify-write of `toggle`) is serialized.
#[derive(Clone)]
pub struct SubscriptionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SubscriptionStore {
    /// Open or create the SQLite database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Migrate on the raw connection before wrapping in the async Mutex
        Self::run_migrations(&conn)?;

        info!("Subscription store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Drop every table so that each store call fails
    #[cfg(test)]
    pub async fn drop_tables(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("DROP TABLE subscriptions; DROP TABLE subscribers;")?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- One record per chat; the primary key is the uniqueness constraint
            CREATE TABLE IF NOT EXISTS subscribers (
                chat_id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                chat_id INTEGER NOT NULL,
                item_name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (chat_id, item_name),
                FOREIGN KEY (chat_id) REFERENCES subscribers(chat_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_item
                ON subscriptions(item_name);
            ",
        )
        .context("Failed to run store migrations")?;
        Ok(())
    }
}
