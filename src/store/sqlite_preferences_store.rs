//! SQLite-backed preferences storage.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::schema::PREFERENCES_VERSIONED_SCHEMAS;
use super::PreferencesStore;
use crate::model::{ChannelPreferences, Preferences};
use crate::sqlite_persistence;

/// SQLite-backed [`PreferencesStore`].
///
/// Channel preferences are stored as a JSON document per user; the rest of
/// the record is columnar.
pub struct SqlitePreferencesStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePreferencesStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = sqlite_persistence::open_or_create(db_path, PREFERENCES_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(PREFERENCES_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl PreferencesStore for SqlitePreferencesStore {
    fn get(&self, user_id: &str) -> Result<Option<Preferences>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT user_id, secret, channel_prefs FROM preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((user_id, secret, channel_prefs_json)) => {
                let channel_prefs: HashMap<String, ChannelPreferences> =
                    serde_json::from_str(&channel_prefs_json)
                        .context("Failed to parse channel preferences")?;
                Ok(Some(Preferences {
                    user_id,
                    secret,
                    channel_prefs,
                }))
            }
            None => Ok(None),
        }
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        let channel_prefs_json = serde_json::to_string(&preferences.channel_prefs)
            .context("Failed to serialize channel preferences")?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO preferences (user_id, secret, channel_prefs)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                secret = excluded.secret,
                channel_prefs = excluded.channel_prefs",
            rusqlite::params![
                preferences.user_id,
                preferences.secret,
                channel_prefs_json
            ],
        )?;
        Ok(())
    }

    fn remove(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM preferences WHERE user_id = ?1", [user_id])?;
        Ok(())
    }
}
