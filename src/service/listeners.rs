//! Listener contracts invoked by the coordinator and the dispatch engine.
//!
//! Listener failures are logged at the invocation boundary and never
//! abort the operation that triggered them.

use crate::channel::PushError;
use crate::model::{Notification, Params};

/// Notified after a new notification has been persisted.
pub trait NotificationListener: Send + Sync {
    fn notification(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Notified for every failed channel delivery attempt.
pub trait ErrorListener: Send + Sync {
    fn error(
        &self,
        notification: &Notification,
        channel_id: &str,
        error: &PushError,
    ) -> anyhow::Result<()>;
}

/// Builds externally reachable paths for pull channels (e.g. private feed
/// URLs). Entirely owned by the embedding application.
pub trait PullUrlFactory: Send + Sync {
    fn pull_path(&self, channel_id: &str, user_id: &str, params: &Params) -> String;
}
