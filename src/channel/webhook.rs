//! Webhook push channel.
//!
//! Delivers rendered notifications as JSON POSTs. The destination URL
//! comes from the user's channel preferences (`url` param); when the
//! channel is constructed with a service-wide endpoint, new users inherit
//! it through `default_preferences`.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{Channel, PushChannel, PushError};
use crate::model::ChannelPreferences;
use crate::render::RenderedMessage;

pub const WEBHOOK_CHANNEL_ID: &str = "webhook";

const URL_PARAM: &str = "url";

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Push channel POSTing rendered messages to a per-user webhook URL.
pub struct WebhookChannel {
    client: reqwest::Client,
    notification_types: HashSet<String>,
    default_endpoint: Option<String>,
}

impl WebhookChannel {
    /// Create a new webhook channel.
    ///
    /// # Arguments
    /// * `notification_types` - types this channel delivers
    /// * `default_endpoint` - endpoint inherited by new users, if any
    /// * `timeout_sec` - request timeout in seconds
    pub fn new(
        notification_types: HashSet<String>,
        default_endpoint: Option<String>,
        timeout_sec: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("Failed to create HTTP client");

        let default_endpoint = default_endpoint.map(|url| url.trim_end_matches('/').to_string());

        Self {
            client,
            notification_types,
            default_endpoint,
        }
    }
}

impl Channel for WebhookChannel {
    fn id(&self) -> &str {
        WEBHOOK_CHANNEL_ID
    }

    fn notification_types(&self) -> &HashSet<String> {
        &self.notification_types
    }

    fn is_configured(&self, _user_id: &str, prefs: &ChannelPreferences) -> bool {
        prefs.params.get_str(URL_PARAM).is_some()
    }

    fn default_preferences(&self) -> Option<ChannelPreferences> {
        self.default_endpoint
            .as_ref()
            .map(|url| ChannelPreferences::instant().with_param(URL_PARAM, url.as_str()))
    }
}

#[async_trait]
impl PushChannel for WebhookChannel {
    async fn push(
        &self,
        message: &RenderedMessage,
        prefs: &ChannelPreferences,
    ) -> Result<(), PushError> {
        let url = prefs
            .params
            .get_str(URL_PARAM)
            .ok_or_else(|| PushError::persistent("webhook url missing from preferences"))?;

        let payload = WebhookPayload {
            subject: &message.subject,
            body: &message.body,
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PushError::temporary(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("webhook delivery accepted with status {}", status);
            Ok(())
        } else if status.is_client_error() {
            // the endpoint rejected the request; retrying won't help
            Err(PushError::persistent(format!(
                "webhook rejected delivery with status {}",
                status
            )))
        } else {
            Err(PushError::temporary(format!(
                "webhook endpoint unavailable, status {}",
                status
            )))
        }
    }
}
