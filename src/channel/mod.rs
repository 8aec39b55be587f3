//! Delivery channel contracts.
//!
//! Push channels receive rendered messages from the dispatch engine and
//! classify failures as temporary (retried with backoff) or persistent
//! (terminal). Pull channels are polled by the consumer on its own
//! schedule; delivery retries never apply to them.

mod webhook;

pub use webhook::WebhookChannel;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ChannelPreferences;
use crate::render::RenderedMessage;

/// Classification of a failed push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErrorKind {
    /// Transient fault (e.g. connection refused); worth retrying.
    Temporary,
    /// The attempt can never succeed (e.g. invalid destination).
    Persistent,
}

/// A failed push attempt with its retry classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PushError {
    pub kind: PushErrorKind,
    pub message: String,
}

impl PushError {
    pub fn temporary(message: impl Into<String>) -> Self {
        Self {
            kind: PushErrorKind::Temporary,
            message: message.into(),
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            kind: PushErrorKind::Persistent,
            message: message.into(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == PushErrorKind::Temporary
    }
}

/// A named delivery endpoint.
pub trait Channel: Send + Sync {
    /// Stable channel identifier referenced by user preferences.
    fn id(&self) -> &str;

    /// Notification types this channel can deliver.
    fn notification_types(&self) -> &HashSet<String>;

    /// Whether the user's preferences are complete for this channel,
    /// e.g. a destination address is present. A capability probe, not a
    /// static property.
    fn is_configured(&self, user_id: &str, prefs: &ChannelPreferences) -> bool;

    /// Initial per-channel preferences for a new user, or `None` when the
    /// channel should stay disabled until explicitly configured.
    fn default_preferences(&self) -> Option<ChannelPreferences>;
}

/// Instant delivery channel driven by the dispatch engine.
#[async_trait]
pub trait PushChannel: Channel {
    /// Deliver a rendered message. Failures carry a temporary/persistent
    /// classification that feeds the retry policy.
    async fn push(
        &self,
        message: &RenderedMessage,
        prefs: &ChannelPreferences,
    ) -> Result<(), PushError>;
}

/// On-demand channel polled by the consumer (e.g. a notification feed).
#[async_trait]
pub trait PullChannel: Channel {
    /// Render the channel content for a user.
    async fn pull(&self, user_id: &str, prefs: &ChannelPreferences) -> anyhow::Result<String>;

    /// Whether the caller presented valid credentials for this user's
    /// content (e.g. the feed secret).
    fn is_authorized(&self, user_id: &str, prefs: &ChannelPreferences) -> bool;
}
