//! Notification data model and delivery tracking state.

use serde::{Deserialize, Serialize};

use super::params::Params;

/// Delivery state of a notification with respect to push channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushState {
    /// Waiting for a delivery attempt.
    Queued,
    /// Delivered to at least one channel.
    Pushed, // terminal
    /// Given up after exhausting retries or hitting a persistent error.
    Undeliverable, // terminal
}

impl PushState {
    /// Returns true if this is a terminal state (Pushed or Undeliverable).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PushState::Pushed | PushState::Undeliverable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PushState::Queued => "QUEUED",
            PushState::Pushed => "PUSHED",
            PushState::Undeliverable => "UNDELIVERABLE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(PushState::Queued),
            "PUSHED" => Some(PushState::Pushed),
            "UNDELIVERABLE" => Some(PushState::Undeliverable),
            _ => None,
        }
    }
}

/// Random token attached to a notification that requires a user action,
/// e.g. an account confirmation link in an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub token: String,
}

impl Confirmation {
    pub fn new() -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for Confirmation {
    fn default() -> Self {
        Self::new()
    }
}

/// A notification addressed to a single user.
///
/// The `push_*` fields track delivery across push channels and are mutated
/// only when an attempt outcome is recorded. `push_date` holds the next
/// eligible attempt time while queued and the last attempt time once
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier (UUID), stable once persisted.
    pub id: String,
    pub user_id: String,
    /// Type tag matched against the types a channel declares support for.
    pub notification_type: String,
    /// When the notification was created (Unix timestamp).
    pub created_at: i64,
    /// Arbitrary payload, available to templates during rendering.
    #[serde(default)]
    pub params: Params,
    /// Present when the notification carries a confirmation token.
    pub confirmation: Option<Confirmation>,
    pub push_state: PushState,
    /// Next eligible attempt time while queued, last attempt time once
    /// terminal (Unix timestamp).
    pub push_date: i64,
    /// Message of the most recent attempt outcome.
    pub push_error_message: Option<String>,
    /// Number of failed attempts so far. Never decremented.
    pub push_error_count: u32,
}

impl Notification {
    /// Create a new queued notification, due immediately.
    pub fn new(user_id: impl Into<String>, notification_type: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            notification_type: notification_type.into(),
            created_at: now,
            params: Params::new(),
            confirmation: None,
            push_state: PushState::Queued,
            push_date: now,
            push_error_message: None,
            push_error_count: 0,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach a fresh confirmation token.
    pub fn with_confirmation(mut self) -> Self {
        self.confirmation = Some(Confirmation::new());
        self
    }

    pub fn confirmation_token(&self) -> Option<&str> {
        self.confirmation.as_ref().map(|c| c.token.as_str())
    }

    /// Record a failed attempt and return the new error count.
    pub fn record_push_error(&mut self, message: &str) -> u32 {
        self.push_error_count += 1;
        self.push_error_message = Some(message.to_string());
        self.push_error_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_state_is_terminal() {
        assert!(!PushState::Queued.is_terminal());
        assert!(PushState::Pushed.is_terminal());
        assert!(PushState::Undeliverable.is_terminal());
    }

    #[test]
    fn test_push_state_conversion() {
        assert_eq!(PushState::Queued.as_str(), "QUEUED");
        assert_eq!(PushState::Pushed.as_str(), "PUSHED");
        assert_eq!(PushState::Undeliverable.as_str(), "UNDELIVERABLE");

        assert_eq!(PushState::from_str("QUEUED"), Some(PushState::Queued));
        assert_eq!(PushState::from_str("PUSHED"), Some(PushState::Pushed));
        assert_eq!(
            PushState::from_str("UNDELIVERABLE"),
            Some(PushState::Undeliverable)
        );
        assert_eq!(PushState::from_str("invalid"), None);
    }

    #[test]
    fn test_push_state_serialization() {
        let json = serde_json::to_string(&PushState::Undeliverable).unwrap();
        assert_eq!(json, "\"UNDELIVERABLE\"");

        let deserialized: PushState = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, PushState::Undeliverable);
    }

    #[test]
    fn test_new_notification_is_due_immediately() {
        let notification = Notification::new("user-1", "friend-request");

        assert_eq!(notification.user_id, "user-1");
        assert_eq!(notification.notification_type, "friend-request");
        assert_eq!(notification.push_state, PushState::Queued);
        assert_eq!(notification.push_date, notification.created_at);
        assert_eq!(notification.push_error_count, 0);
        assert!(notification.push_error_message.is_none());
        assert!(notification.confirmation.is_none());
        assert!(!notification.id.is_empty());
    }

    #[test]
    fn test_with_confirmation_generates_token() {
        let notification = Notification::new("user-1", "signup").with_confirmation();

        let token = notification.confirmation_token().unwrap();
        assert!(!token.is_empty());

        let other = Notification::new("user-1", "signup").with_confirmation();
        assert_ne!(notification.confirmation_token(), other.confirmation_token());
    }

    #[test]
    fn test_record_push_error_increments_monotonically() {
        let mut notification = Notification::new("user-1", "friend-request");

        assert_eq!(notification.record_push_error("first"), 1);
        assert_eq!(notification.record_push_error("second"), 2);
        assert_eq!(notification.push_error_count, 2);
        assert_eq!(notification.push_error_message.as_deref(), Some("second"));
    }

    #[test]
    fn test_notification_serde_roundtrip() {
        let notification = Notification::new("user-1", "friend-request")
            .with_params(Params::new().with("from", "user-2"))
            .with_confirmation();

        let json = serde_json::to_string(&notification).unwrap();
        let deserialized: Notification = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, notification);
    }
}
