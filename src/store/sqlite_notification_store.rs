//! SQLite-backed notification storage.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::schema::NOTIFICATION_VERSIONED_SCHEMAS;
use super::NotificationStore;
use crate::model::{Confirmation, Notification, Params, PushState};
use crate::sqlite_persistence;

const NOTIFICATION_COLUMNS: &str = "id, user_id, notification_type, created_at, params, \
     confirmation_token, push_state, push_date, push_error_message, push_error_count";

/// SQLite-backed [`NotificationStore`].
pub struct SqliteNotificationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNotificationStore {
    /// Opens an existing database or creates a new one with the current
    /// schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = sqlite_persistence::open_or_create(db_path, NOTIFICATION_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(NOTIFICATION_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
        let params_json: String = row.get("params")?;
        let params: Params = serde_json::from_str(&params_json).unwrap_or_default();
        let push_state = PushState::from_str(&row.get::<_, String>("push_state")?)
            .unwrap_or(PushState::Queued);

        Ok(Notification {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            notification_type: row.get("notification_type")?,
            created_at: row.get("created_at")?,
            params,
            confirmation: row
                .get::<_, Option<String>>("confirmation_token")?
                .map(|token| Confirmation { token }),
            push_state,
            push_date: row.get("push_date")?,
            push_error_message: row.get("push_error_message")?,
            push_error_count: row.get("push_error_count")?,
        })
    }
}

impl NotificationStore for SqliteNotificationStore {
    fn save(&self, notification: &Notification) -> Result<()> {
        let params_json =
            serde_json::to_string(&notification.params).context("Failed to serialize params")?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (
                id, user_id, notification_type, created_at, params,
                confirmation_token, push_state, push_date, push_error_message,
                push_error_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                notification.id,
                notification.user_id,
                notification.notification_type,
                notification.created_at,
                params_json,
                notification.confirmation_token(),
                notification.push_state.as_str(),
                notification.push_date,
                notification.push_error_message,
                notification.push_error_count,
            ],
        )?;
        Ok(())
    }

    fn update(&self, notification: &Notification) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notifications SET
                push_state = ?2, push_date = ?3, push_error_message = ?4,
                push_error_count = ?5
            WHERE id = ?1",
            rusqlite::params![
                notification.id,
                notification.push_state.as_str(),
                notification.push_date,
                notification.push_error_message,
                notification.push_error_count,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Notification>> {
        let conn = self.conn.lock().unwrap();
        let notification = conn
            .query_row(
                &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
                [id],
                Self::row_to_notification,
            )
            .optional()?;
        Ok(notification)
    }

    fn fetch_next_due(&self, now: i64) -> Result<Option<Notification>> {
        let conn = self.conn.lock().unwrap();
        let notification = conn
            .query_row(
                &format!(
                    "SELECT {} FROM notifications
                     WHERE push_state = ?1 AND push_date <= ?2
                     ORDER BY push_date ASC LIMIT 1",
                    NOTIFICATION_COLUMNS
                ),
                rusqlite::params![PushState::Queued.as_str(), now],
                Self::row_to_notification,
            )
            .optional()?;
        Ok(notification)
    }

    fn find_by_confirmation_token(&self, token: &str) -> Result<Option<Notification>> {
        let conn = self.conn.lock().unwrap();
        let notification = conn
            .query_row(
                &format!(
                    "SELECT {} FROM notifications WHERE confirmation_token = ?1",
                    NOTIFICATION_COLUMNS
                ),
                [token],
                Self::row_to_notification,
            )
            .optional()?;
        Ok(notification)
    }
}
