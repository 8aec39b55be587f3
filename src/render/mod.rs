//! Message rendering boundary.
//!
//! The dispatch engine renders a notification once per eligible channel
//! through a [`RenderService`]. [`TemplateRenderService`] is the built-in
//! implementation: a registry of per-type subject/body templates with
//! `{placeholder}` substitution from the notification params.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{ChannelPreferences, Notification, Preferences};

/// A notification rendered for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no template registered for notification type: {0}")]
    UnknownType(String),
}

/// Renders notifications into channel-deliverable messages.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait RenderService: Send + Sync {
    fn render(
        &self,
        notification: &Notification,
        preferences: &Preferences,
        channel_prefs: &ChannelPreferences,
    ) -> Result<RenderedMessage, RenderError>;
}

/// Subject/body template pair with `{placeholder}` markers.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

/// Template-based [`RenderService`] keyed by notification type.
///
/// Placeholders resolve against the notification params plus the implicit
/// `user_id`; unresolved placeholders are left in place so missing data is
/// visible in delivered output rather than silently dropped.
#[derive(Debug, Default)]
pub struct TemplateRenderService {
    templates: HashMap<String, MessageTemplate>,
}

impl TemplateRenderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, notification_type: impl Into<String>, template: MessageTemplate) {
        self.templates.insert(notification_type.into(), template);
    }

    pub fn with_template(
        mut self,
        notification_type: impl Into<String>,
        template: MessageTemplate,
    ) -> Self {
        self.register(notification_type, template);
        self
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

impl RenderService for TemplateRenderService {
    fn render(
        &self,
        notification: &Notification,
        _preferences: &Preferences,
        _channel_prefs: &ChannelPreferences,
    ) -> Result<RenderedMessage, RenderError> {
        let template = self
            .templates
            .get(&notification.notification_type)
            .ok_or_else(|| RenderError::UnknownType(notification.notification_type.clone()))?;

        Ok(RenderedMessage {
            subject: substitute(&template.subject, notification),
            body: substitute(&template.body, notification),
        })
    }
}

fn substitute(template: &str, notification: &Notification) -> String {
    let mut result = template.replace("{user_id}", &notification.user_id);
    for (key, value) in notification.params.iter() {
        let marker = format!("{{{}}}", key);
        if !result.contains(&marker) {
            continue;
        }
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        result = result.replace(&marker, &rendered);
    }
    result
}
