// libs/notification-cell/src/dispatch.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::NewNotification;

/// Fire-and-forget user alerts. Delivery is best-effort: a failed write is
/// logged and swallowed so it can never roll back a booking, payment or
/// billing outcome.
pub struct NotificationDispatcherService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationDispatcherService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn notify(&self, notification: NewNotification, auth_token: &str) {
        let body = json!({
            "user_id": notification.user_id,
            "message": notification.message,
            "link": notification.link,
            "notification_type": notification.notification_type,
            "metadata": notification.metadata,
            "is_read": false,
            "created_at": Utc::now().to_rfc3339(),
        });

        let result: Result<Vec<serde_json::Value>, _> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        match result {
            Ok(_) => debug!(
                "Notification dispatched to user {} ({})",
                notification.user_id, notification.notification_type
            ),
            Err(e) => warn!(
                "Failed to dispatch notification to user {}: {}",
                notification.user_id, e
            ),
        }
    }
}
