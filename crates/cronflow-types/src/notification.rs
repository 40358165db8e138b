//! Messages handed to the notification collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single addressee with its personalization values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Delivery address (email, channel handle).
    pub channel_id: String,
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
}

impl Recipient {
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            channel_id: channel_id.into(),
            placeholders: BTreeMap::new(),
        }
    }
}

/// A notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub html_body: String,
    pub recipients: Vec<Recipient>,
    /// Origin category, e.g. `WORKFLOW` or `WATCHDOG`.
    pub source_type: String,
    /// Origin identifier, e.g. an execution id.
    pub source_id: String,
}

impl NotificationMessage {
    /// Body with `{{name}}` placeholders substituted for one recipient.
    pub fn body_for(&self, recipient: &Recipient) -> String {
        let mut body = self.html_body.clone();
        for (name, value) in &recipient.placeholders {
            body = body.replace(&format!("{{{{{name}}}}}"), value);
        }
        body
    }
}
