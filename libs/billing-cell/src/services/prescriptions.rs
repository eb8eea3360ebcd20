// libs/billing-cell/src/services/prescriptions.rs
use std::sync::Arc;

use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{BillingError, Prescription};

/// Read-only client for the prescription store collaborator.
pub struct PrescriptionStore {
    supabase: Arc<SupabaseClient>,
}

impl PrescriptionStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn fetch_for_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Prescription>, BillingError> {
        debug!("Fetching prescription for appointment {}", appointment_id);

        let path = format!(
            "/rest/v1/prescriptions?appointment_id=eq.{}&limit=1",
            appointment_id
        );
        let result: Vec<Prescription> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BillingError::DatabaseError(e.to_string()))?;

        Ok(result.into_iter().next())
    }
}
