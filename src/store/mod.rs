//! Persistence boundary for notifications and user preferences.
//!
//! The dispatch engine assumes each store call is atomic, but the locking
//! that serializes delivery attempts is in-process only: two server
//! instances sharing one database are not coordinated by these traits.

mod schema;
mod sqlite_notification_store;
mod sqlite_preferences_store;

pub use schema::{NOTIFICATION_VERSIONED_SCHEMAS, PREFERENCES_VERSIONED_SCHEMAS};
pub use sqlite_notification_store::SqliteNotificationStore;
pub use sqlite_preferences_store::SqlitePreferencesStore;

use anyhow::Result;

use crate::model::{Notification, Preferences};

/// Storage for notifications and their delivery tracking state.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait NotificationStore: Send + Sync {
    /// Persists a new notification.
    fn save(&self, notification: &Notification) -> Result<()>;

    /// Updates the delivery tracking fields of an existing notification.
    fn update(&self, notification: &Notification) -> Result<()>;

    /// Deletes a notification. Deleting a missing id is not an error.
    fn delete(&self, id: &str) -> Result<()>;

    /// Returns a notification by id.
    fn get(&self, id: &str) -> Result<Option<Notification>>;

    /// Returns the oldest notification that is due for delivery:
    /// `push_state == Queued` and `push_date <= now`.
    fn fetch_next_due(&self, now: i64) -> Result<Option<Notification>>;

    /// Returns the notification carrying the given confirmation token.
    fn find_by_confirmation_token(&self, token: &str) -> Result<Option<Notification>>;
}

/// Storage for per-user delivery preferences.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait PreferencesStore: Send + Sync {
    /// Returns a user's preferences, or `None` for an unknown user.
    fn get(&self, user_id: &str) -> Result<Option<Preferences>>;

    /// Creates or replaces a user's preferences.
    fn save(&self, preferences: &Preferences) -> Result<()>;

    /// Removes a user's preferences. Removing a missing user is not an
    /// error.
    fn remove(&self, user_id: &str) -> Result<()>;
}
