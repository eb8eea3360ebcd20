use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub message: String,
    pub link: Option<String>,
    pub notification_type: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn new(user_id: Uuid, message: impl Into<String>, notification_type: &str) -> Self {
        Self {
            user_id,
            message: message.into(),
            link: None,
            notification_type: notification_type.to_string(),
            metadata: None,
        }
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.link = Some(link.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
