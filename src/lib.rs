//! Notification delivery server library.
//!
//! Delivers notifications to users across push channels (webhooks, mail)
//! and pull channels (feeds), tracking per-notification delivery state and
//! retrying failed deliveries with escalating backoff. The central piece
//! is the dispatch engine: a pool of worker tasks polling for due
//! notifications, serialized per notification id so the background poller
//! and the immediate-dispatch path never race.

pub mod channel;
pub mod config;
pub mod confirm;
pub mod dispatch;
pub mod model;
pub mod render;
pub mod service;
pub mod sqlite_persistence;
pub mod store;

// Re-export commonly used types for convenience
pub use channel::{Channel, PullChannel, PushChannel, PushError, PushErrorKind, WebhookChannel};
pub use config::{AppConfig, CliConfig, DispatchSettings, FileConfig};
pub use confirm::{ConfirmError, ConfirmationListener, ConfirmationResolver};
pub use dispatch::{DispatchEngine, DispatchError, KeyedLock, RetryPolicy};
pub use model::{
    ChannelPreferences, Confirmation, Frequency, Notification, Params, Preferences, PushState,
};
pub use render::{MessageTemplate, RenderService, RenderedMessage, TemplateRenderService};
pub use service::{ErrorListener, NotificationListener, NotifyError, NotifyService, PullUrlFactory};
pub use store::{
    NotificationStore, PreferencesStore, SqliteNotificationStore, SqlitePreferencesStore,
};
