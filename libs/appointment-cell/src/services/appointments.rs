// libs/appointment-cell/src/services/appointments.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CancelAppointmentRequest,
    RateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::lifecycle::LifecycleService;

/// Reads and status-transition writes on existing appointments. Slot
/// creation lives in `SlotLedgerService` and is driven by the payment
/// coordinator.
pub struct AppointmentService {
    supabase: Arc<SupabaseClient>,
    lifecycle: LifecycleService,
    cancellation_lead_minutes: i64,
}

impl AppointmentService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            lifecycle: LifecycleService::new(),
            cancellation_lead_minutes: config.cancellation_lead_minutes,
        }
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    /// Appointments the caller participates in, patient or doctor side
    /// depending on their role.
    pub async fn list_for_user(
        &self,
        user: &User,
        status: Option<AppointmentStatus>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let side = if user.is_role("doctor") {
            "doctor_id"
        } else {
            "patient_id"
        };

        let mut path = format!(
            "/rest/v1/appointments?{}=eq.{}&order=date.asc,time_slot.asc",
            side, user.id
        );
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    /// Doctor-side status/notes update, transition-checked.
    pub async fn update_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !user.is_self(&current.doctor_id) {
            return Err(AppointmentError::Unauthorized);
        }

        let mut update = serde_json::Map::new();
        if let Some(new_status) = request.status {
            self.lifecycle
                .validate_status_transition(&current.status, &new_status)?;
            update.insert("status".to_string(), json!(new_status));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }

        if update.is_empty() {
            return Err(AppointmentError::ValidationError(
                "No fields to update".to_string(),
            ));
        }

        let updated = self
            .apply_update(appointment_id, update, None, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} updated by doctor {}", appointment_id, user.id);
        Ok(updated)
    }

    /// Cancel an appointment. Cancelling transitions the row to a terminal
    /// status: the slot becomes reservable again, the row itself is never
    /// reused. Guarded against concurrent transitions, the update only
    /// matches while the appointment is still non-terminal.
    pub async fn cancel_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !current.involves(&user.id) {
            return Err(AppointmentError::Unauthorized);
        }

        self.lifecycle
            .validate_cancellation(&current, Utc::now(), self.cancellation_lead_minutes)?;

        let mut update = serde_json::Map::new();
        update.insert("status".to_string(), json!(AppointmentStatus::Cancelled));
        if let Some(reason) = request.reason {
            update.insert(
                "notes".to_string(),
                json!(format!("Cancelled: {}", reason)),
            );
        }

        let cancelled = self
            .apply_update(
                appointment_id,
                update,
                Some(AppointmentStatus::active_filter()),
                auth_token,
            )
            .await?
            .ok_or(AppointmentError::InvalidStatusTransition(current.status))?;

        info!(
            "Appointment {} cancelled, slot {} {} released",
            appointment_id, cancelled.date, cancelled.time_slot
        );
        Ok(cancelled)
    }

    /// Patient rates a completed appointment, once. The once-only rule is a
    /// guarded update on `is_rated`.
    pub async fn rate_appointment(
        &self,
        user: &User,
        appointment_id: Uuid,
        request: RateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if !(1..=5).contains(&request.rating) {
            return Err(AppointmentError::InvalidRating);
        }

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !user.is_self(&current.patient_id) {
            return Err(AppointmentError::Unauthorized);
        }
        if current.status != AppointmentStatus::Completed {
            return Err(AppointmentError::NotCompleted);
        }

        let mut update = serde_json::Map::new();
        update.insert("is_rated".to_string(), json!(true));
        update.insert("rating".to_string(), json!(request.rating));

        let rated = self
            .apply_update(
                appointment_id,
                update,
                Some("is_rated=eq.false"),
                auth_token,
            )
            .await?
            .ok_or(AppointmentError::AlreadyRated)?;

        info!(
            "Appointment {} rated {} by patient {}",
            appointment_id, request.rating, user.id
        );
        Ok(rated)
    }

    /// Shared guarded-update plumbing. `guard` is an extra PostgREST filter;
    /// when it matches nothing the update is a no-op and `None` is returned.
    async fn apply_update(
        &self,
        appointment_id: Uuid,
        mut update: serde_json::Map<String, Value>,
        guard: Option<&str>,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let mut path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        if let Some(guard) = guard {
            path.push_str(&format!("&{}", guard));
        }

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update)),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(result.into_iter().next())
    }
}
