//! Per-user delivery preferences.

use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::params::Params;

const SECRET_LEN: usize = 32;

/// How often a channel delivers notifications to a user.
///
/// The background dispatcher only considers channels configured for
/// [`Frequency::Instant`]; the other values exist for batching consumers
/// (digest feeds) that read notifications on their own schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Instant,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Instant => "INSTANT",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INSTANT" => Some(Frequency::Instant),
            "DAILY" => Some(Frequency::Daily),
            "WEEKLY" => Some(Frequency::Weekly),
            _ => None,
        }
    }
}

/// Settings for a single channel: delivery frequency plus channel-specific
/// parameters such as a destination address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    pub frequency: Frequency,
    #[serde(default)]
    pub params: Params,
}

impl ChannelPreferences {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            params: Params::new(),
        }
    }

    pub fn instant() -> Self {
        Self::new(Frequency::Instant)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.set(key, value);
        self
    }
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self::instant()
    }
}

/// A user's notification preferences across all channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: String,
    /// Random secret used to authorize unauthenticated pull access
    /// (e.g. private feed URLs).
    pub secret: String,
    /// Channel id to settings. A channel without an entry does not
    /// deliver to this user.
    #[serde(default)]
    pub channel_prefs: HashMap<String, ChannelPreferences>,
}

impl Preferences {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            secret: generate_secret(),
            channel_prefs: HashMap::new(),
        }
    }

    /// Replace the secret with a freshly generated one.
    pub fn regenerate_secret(&mut self) {
        self.secret = generate_secret();
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelPreferences> {
        self.channel_prefs.get(channel_id)
    }
}

fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}
