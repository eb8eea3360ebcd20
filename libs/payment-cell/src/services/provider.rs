// libs/payment-cell/src/services/provider.rs
use std::sync::Arc;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use shared_config::AppConfig;

#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub session_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfirmation {
    pub session_id: String,
    pub provider_payment_id: Option<String>,
    pub paid: bool,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient gateway failure (network, 5xx, quota). Retryable.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the request. Not retryable as-is.
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),
}

/// Abstracted payment gateway. Session creation, the pull-side verify and
/// the void used by compensation all go through this seam; the webhook push
/// arrives out-of-band but carries the same session id.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_session(
        &self,
        amount: i64,
        currency: &str,
        metadata: Value,
    ) -> Result<ProviderSession, ProviderError>;

    async fn verify(&self, session_id: &str) -> Result<ProviderConfirmation, ProviderError>;

    async fn void_session(&self, session_id: &str) -> Result<(), ProviderError>;
}

pub fn provider_from_config(config: &AppConfig) -> Arc<dyn PaymentProvider> {
    if config.payment_provider == "gateway" && config.is_gateway_configured() {
        Arc::new(GatewayProvider::new(config))
    } else {
        Arc::new(MockProvider)
    }
}

// ==============================================================================
// MOCK PROVIDER
// ==============================================================================

/// In-process gateway simulation: every session it issues verifies as paid.
/// Used in development and tests.
pub struct MockProvider;

fn fake_id_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_session(
        &self,
        amount: i64,
        currency: &str,
        _metadata: Value,
    ) -> Result<ProviderSession, ProviderError> {
        let session_id = format!("order_{}", fake_id_suffix());
        debug!(
            "Mock provider session {} created for {} {}",
            session_id, amount, currency
        );
        Ok(ProviderSession {
            session_id,
            checkout_url: None,
        })
    }

    async fn verify(&self, session_id: &str) -> Result<ProviderConfirmation, ProviderError> {
        Ok(ProviderConfirmation {
            session_id: session_id.to_string(),
            provider_payment_id: Some(format!("pay_{}", fake_id_suffix())),
            paid: true,
        })
    }

    async fn void_session(&self, session_id: &str) -> Result<(), ProviderError> {
        debug!("Mock provider session {} voided", session_id);
        Ok(())
    }
}

// ==============================================================================
// HTTP GATEWAY PROVIDER
// ==============================================================================

/// Checkout gateway reached over HTTP. Transport failures and gateway 5xx
/// responses surface as `Unavailable` so callers can retry; 4xx responses
/// are terminal rejections.
pub struct GatewayProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GatewayProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.payment_gateway_url.trim_end_matches('/').to_string(),
            api_key: config.payment_gateway_api_key.clone(),
        }
    }

    fn classify(status: reqwest::StatusCode, body: String) -> ProviderError {
        if status.is_server_error() || status.as_u16() == 429 {
            ProviderError::Unavailable(format!("{}: {}", status, body))
        } else {
            ProviderError::Rejected(format!("{}: {}", status, body))
        }
    }
}

#[async_trait]
impl PaymentProvider for GatewayProvider {
    async fn create_session(
        &self,
        amount: i64,
        currency: &str,
        metadata: Value,
    ) -> Result<ProviderSession, ProviderError> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "amount": amount,
                "currency": currency,
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gateway session creation failed ({}): {}", status, body);
            return Err(Self::classify(status, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let session_id = body["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Unavailable("Malformed session response".to_string()))?
            .to_string();

        Ok(ProviderSession {
            session_id,
            checkout_url: body["url"].as_str().map(str::to_string),
        })
    }

    async fn verify(&self, session_id: &str) -> Result<ProviderConfirmation, ProviderError> {
        let url = format!("{}/v1/checkout/sessions/{}", self.base_url, session_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(ProviderConfirmation {
            session_id: session_id.to_string(),
            provider_payment_id: body["payment_intent"].as_str().map(str::to_string),
            paid: body["payment_status"].as_str() == Some("paid"),
        })
    }

    async fn void_session(&self, session_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/v1/checkout/sessions/{}/expire", self.base_url, session_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }

        Ok(())
    }
}

impl From<ProviderError> for crate::models::PaymentError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(msg) => crate::models::PaymentError::ProviderUnavailable(msg),
            ProviderError::Rejected(msg) => crate::models::PaymentError::ProviderRejected(msg),
        }
    }
}
