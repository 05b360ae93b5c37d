use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rusqlite::OptionalExtension;

use super::SubscriptionStore;
use crate::platform::ChatId;

impl SubscriptionStore {
    /// Create the subscriber record if absent. Returns true if it was created.
    pub async fn upsert_subscriber(&self, chat_id: ChatId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "INSERT INTO subscribers (chat_id) VALUES (?1)
                 ON CONFLICT(chat_id) DO NOTHING",
                rusqlite::params![chat_id.0],
            )
            .context("Failed to upsert subscriber")?;
        Ok(rows > 0)
    }

    /// Whether a subscriber record exists for this chat
    pub async fn is_subscribed(&self, chat_id: ChatId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT chat_id FROM subscribers WHERE chat_id = ?1",
                rusqlite::params![chat_id.0],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query subscriber")?;
        Ok(found.is_some())
    }

    /// Items this chat is subscribed to
    pub async fn subscriptions_of(&self, chat_id: ChatId) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT item_name FROM subscriptions WHERE chat_id = ?1")
            .context("Failed to prepare subscriptions query")?;
        let items = stmt
            .query_map(rusqlite::params![chat_id.0], |row| row.get::<_, String>(0))
            .context("Failed to query subscriptions")?
            .collect::<rusqlite::Result<BTreeSet<_>>>()
            .context("Failed to collect subscriptions")?;
        Ok(items)
    }

    /// Flip membership of `item_name` for this chat, creating the subscriber
    /// record on first use. Returns the resulting membership.
    pub async fn toggle(&self, chat_id: ChatId, item_name: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("Failed to begin toggle")?;

        tx.execute(
            "INSERT INTO subscribers (chat_id) VALUES (?1)
             ON CONFLICT(chat_id) DO NOTHING",
            rusqlite::params![chat_id.0],
        )?;

        let removed = tx.execute(
            "DELETE FROM subscriptions WHERE chat_id = ?1 AND item_name = ?2",
            rusqlite::params![chat_id.0, item_name],
        )?;

        let subscribed = if removed > 0 {
            false
        } else {
            tx.execute(
                "INSERT INTO subscriptions (chat_id, item_name) VALUES (?1, ?2)",
                rusqlite::params![chat_id.0, item_name],
            )?;
            true
        };

        tx.commit().context("Failed to commit toggle")?;
        Ok(subscribed)
    }

    /// Every chat currently subscribed to `item_name`, in no particular order
    pub async fn subscribers_of(&self, item_name: &str) -> Result<Vec<ChatId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT s.chat_id FROM subscriptions s
                 JOIN subscribers r ON r.chat_id = s.chat_id
                 WHERE s.item_name = ?1",
            )
            .context("Failed to prepare subscribers query")?;
        let chats = stmt
            .query_map(rusqlite::params![item_name], |row| {
                Ok(ChatId(row.get(0)?))
            })
            .context("Failed to query subscribers")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect subscribers")?;
        Ok(chats)
    }

    /// Remove the subscriber and all of its subscriptions.
    /// Returns true if a record existed.
    pub async fn prune(&self, chat_id: ChatId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM subscribers WHERE chat_id = ?1",
                rusqlite::params![chat_id.0],
            )
            .context("Failed to prune subscriber")?;
        Ok(rows > 0)
    }

    /// Remove one subscription, keeping the subscriber record
    pub async fn prune_item(&self, chat_id: ChatId, item_name: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM subscriptions WHERE chat_id = ?1 AND item_name = ?2",
                rusqlite::params![chat_id.0, item_name],
            )
            .context("Failed to prune subscription")?;
        Ok(rows > 0)
    }

    pub async fn subscriber_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM subscribers", [], |row| row.get(0))
            .context("Failed to count subscribers")?;
        Ok(count as u64)
    }
}
