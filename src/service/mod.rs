//! Notification coordination façade.
//!
//! [`NotifyService`] is the entry point consumed by the embedding
//! application: it persists new notifications, fans them out to
//! registered listeners (waking the dispatch engine among them), exposes
//! the immediate and deferred dispatch paths, and manages per-user
//! preferences.

mod listeners;

pub use listeners::{ErrorListener, NotificationListener, PullUrlFactory};

use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{error, warn};

use crate::channel::PushError;
use crate::confirm::{ConfirmationListener, ConfirmationResolver, ConfirmError};
use crate::dispatch::{DispatchEngine, DispatchError};
use crate::model::{Notification, Params, Preferences};
use crate::store::{NotificationStore, PreferencesStore};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The coordination façade over stores, dispatch engine and confirmation
/// resolution.
pub struct NotifyService {
    notification_store: Arc<dyn NotificationStore>,
    preferences_store: Arc<dyn PreferencesStore>,
    engine: Arc<DispatchEngine>,
    confirmations: Arc<ConfirmationResolver>,
    notification_listeners: RwLock<Vec<Arc<dyn NotificationListener>>>,
    error_listeners: Arc<ErrorFanout>,
    engine_listener: Arc<dyn NotificationListener>,
    default_preferences: Preferences,
    url_factory: Option<Arc<dyn PullUrlFactory>>,
}

impl NotifyService {
    pub fn new(
        notification_store: Arc<dyn NotificationStore>,
        preferences_store: Arc<dyn PreferencesStore>,
        engine: Arc<DispatchEngine>,
        confirmations: Arc<ConfirmationResolver>,
        default_preferences: Preferences,
        url_factory: Option<Arc<dyn PullUrlFactory>>,
    ) -> Self {
        let error_listeners = Arc::new(ErrorFanout::default());
        engine.set_error_listener(error_listeners.clone());

        // the engine listens for new notifications so a polling worker
        // wakes without waiting for the safety-net interval
        let engine_listener: Arc<dyn NotificationListener> = engine.clone();

        let service = Self {
            notification_store,
            preferences_store,
            engine,
            confirmations,
            notification_listeners: RwLock::new(Vec::new()),
            error_listeners,
            engine_listener: engine_listener.clone(),
            default_preferences,
            url_factory,
        };
        service.add_notification_listener(engine_listener);
        service
    }

    /// Start the dispatch worker pool.
    pub fn start(&self) {
        self.engine.start();
    }

    /// Stop accepting wake signals and drain the worker pool. In-flight
    /// delivery attempts finish; the call returns once every worker has
    /// exited.
    pub async fn shutdown(&self) {
        self.remove_notification_listener(&self.engine_listener);
        self.engine.shutdown().await;
    }

    // =========================================================================
    // Notification entry points
    // =========================================================================

    /// Persist a notification for deferred delivery and notify listeners.
    pub fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.notification_store.save(notification)?;

        let listeners = self.notification_listeners.read().unwrap().clone();
        for listener in listeners {
            if let Err(e) = listener.notification(notification) {
                error!(
                    "notification listener failed for {}: {}",
                    notification.id, e
                );
            }
        }
        Ok(())
    }

    /// Persist and deliver a notification synchronously.
    ///
    /// On delivery failure the staged notification is deleted again: the
    /// caller asked for a direct answer, not eventual retry.
    pub async fn notify_now(
        &self,
        mut notification: Notification,
    ) -> Result<Notification, NotifyError> {
        self.notification_store.save(&notification)?;

        match self.engine.dispatch_now(&mut notification).await {
            Ok(()) => Ok(notification),
            Err(e @ DispatchError::Failed(_)) => {
                self.notification_store.delete(&notification.id)?;
                Err(NotifyError::Dispatch(e))
            }
            // the notification was delivered, only the bookkeeping
            // failed; it must not be rolled back
            Err(e) => Err(NotifyError::Dispatch(e)),
        }
    }

    /// Attach a confirmation token, then persist for deferred delivery.
    pub fn confirm(&self, notification: Notification) -> anyhow::Result<Notification> {
        let notification = notification.with_confirmation();
        self.notify(&notification)?;
        Ok(notification)
    }

    /// Attach a confirmation token, then deliver synchronously.
    pub async fn confirm_now(
        &self,
        notification: Notification,
    ) -> Result<Notification, NotifyError> {
        self.notify_now(notification.with_confirmation()).await
    }

    /// Resolve a confirmation token to a redirect path.
    pub fn confirm_token(&self, token: &str) -> Result<Option<String>, ConfirmError> {
        self.confirmations.confirm(token)
    }

    // =========================================================================
    // Preferences
    // =========================================================================

    pub fn preferences(&self, user_id: &str) -> anyhow::Result<Option<Preferences>> {
        self.preferences_store.get(user_id)
    }

    /// Build fresh preferences for a new user: the injected default
    /// template plus every channel's own defaults, with a new secret.
    pub fn new_preferences(&self, user_id: &str) -> Preferences {
        let mut preferences = self.default_preferences.clone();
        preferences.user_id = user_id.to_string();
        preferences.regenerate_secret();
        preferences
            .channel_prefs
            .extend(self.engine.default_channel_preferences());
        preferences
    }

    pub fn set_preferences(&self, preferences: &Preferences) -> anyhow::Result<()> {
        self.preferences_store.save(preferences)
    }

    pub fn remove_preferences(&self, user_id: &str) -> anyhow::Result<()> {
        self.preferences_store.remove(user_id)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_notification_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.notification_listeners.write().unwrap().push(listener);
    }

    pub fn remove_notification_listener(&self, listener: &Arc<dyn NotificationListener>) {
        self.notification_listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_error_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.error_listeners.add(listener);
    }

    pub fn remove_error_listener(&self, listener: &Arc<dyn ErrorListener>) {
        self.error_listeners.remove(listener);
    }

    pub fn add_confirmation_listener(&self, listener: Arc<dyn ConfirmationListener>) {
        self.confirmations.add_listener(listener);
    }

    pub fn remove_confirmation_listener(&self, listener: &Arc<dyn ConfirmationListener>) {
        self.confirmations.remove_listener(listener);
    }

    // =========================================================================
    // Pull path
    // =========================================================================

    /// Externally reachable path for a user's pull channel, when a URL
    /// factory is configured.
    pub fn to_pull_path(&self, channel_id: &str, user_id: &str, params: &Params) -> Option<String> {
        self.url_factory
            .as_ref()
            .map(|factory| factory.pull_path(channel_id, user_id, params))
    }
}

/// The engine consumes new-notification events as wake signals.
impl NotificationListener for DispatchEngine {
    fn notification(&self, _notification: &Notification) -> anyhow::Result<()> {
        self.wake();
        Ok(())
    }
}

/// Fans a failed channel attempt out to every registered error listener.
#[derive(Default)]
struct ErrorFanout {
    listeners: RwLock<Vec<Arc<dyn ErrorListener>>>,
}

impl ErrorFanout {
    fn add(&self, listener: Arc<dyn ErrorListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    fn remove(&self, listener: &Arc<dyn ErrorListener>) {
        self.listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

impl ErrorListener for ErrorFanout {
    fn error(
        &self,
        notification: &Notification,
        channel_id: &str,
        push_error: &PushError,
    ) -> anyhow::Result<()> {
        let listeners = self.listeners.read().unwrap().clone();
        if listeners.is_empty() {
            warn!(
                "failed to deliver notification {} on channel {}: {}",
                notification.id, channel_id, push_error
            );
            return Ok(());
        }
        for listener in listeners {
            if let Err(e) = listener.error(notification, channel_id, push_error) {
                error!(
                    "error listener failed for notification {}: {}",
                    notification.id, e
                );
            }
        }
        Ok(())
    }
}
