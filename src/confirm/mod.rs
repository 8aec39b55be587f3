//! Confirmation resolution for notification tokens.
//!
//! Users reach this path by clicking confirmation links, often from old
//! emails: unknown and expired tokens therefore resolve to a silent
//! no-op instead of an error. A valid token that no registered listener
//! claims is a configuration defect and surfaces as an error.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::model::Notification;
use crate::store::NotificationStore;

pub const DEFAULT_CONFIRMATION_MAX_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Offered each confirmed notification in registration order; returns a
/// redirect path to claim it.
pub trait ConfirmationListener: Send + Sync {
    fn confirm(&self, notification: &Notification) -> Option<String>;
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("no confirmation listener claimed notification {0}")]
    Unclaimed(String),
    #[error("redirect path must be absolute, was {0}")]
    RelativeRedirect(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Resolves confirmation tokens to redirect paths.
pub struct ConfirmationResolver {
    notification_store: Arc<dyn NotificationStore>,
    listeners: RwLock<Vec<Arc<dyn ConfirmationListener>>>,
    max_age_secs: i64,
}

impl ConfirmationResolver {
    pub fn new(notification_store: Arc<dyn NotificationStore>, max_age: Duration) -> Self {
        Self {
            notification_store,
            listeners: RwLock::new(Vec::new()),
            max_age_secs: max_age.as_secs() as i64,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ConfirmationListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConfirmationListener>) {
        self.listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Resolve a confirmation token to a redirect path.
    ///
    /// Returns `Ok(None)` for unknown or expired tokens. The first
    /// listener returning a redirect path wins; the path must be
    /// absolute.
    pub fn confirm(&self, token: &str) -> Result<Option<String>, ConfirmError> {
        let Some(notification) = self.notification_store.find_by_confirmation_token(token)? else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        if now - notification.created_at > self.max_age_secs {
            debug!(
                "ignoring expired confirmation token for notification {}",
                notification.id
            );
            return Ok(None);
        }

        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            if let Some(redirect) = listener.confirm(&notification) {
                if !redirect.starts_with('/') {
                    return Err(ConfirmError::RelativeRedirect(redirect));
                }
                return Ok(Some(redirect));
            }
        }

        Err(ConfirmError::Unclaimed(notification.id))
    }

    /// Look up the notification behind a token without confirming it.
    pub fn notification_by_token(&self, token: &str) -> anyhow::Result<Option<Notification>> {
        self.notification_store.find_by_confirmation_token(token)
    }
}
