// libs/appointment-cell/src/services/slots.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{DbError, SupabaseClient};

use crate::models::{
    parse_time_slot, Appointment, AppointmentError, AppointmentStatus, SlotReservation,
};

/// Owns appointment-slot identity and uniqueness.
///
/// The uniqueness guarantee lives in storage: a partial unique index over
/// (doctor_id, date, time_slot) scoped to non-terminal statuses. Reserving is
/// therefore a conditional insert. Of two concurrent reservations for the
/// same tuple exactly one insert lands; the other receives a constraint
/// violation which surfaces here as `SlotTaken`. A read-then-write check in
/// application code could never provide that.
pub struct SlotLedgerService {
    supabase: Arc<SupabaseClient>,
}

impl SlotLedgerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Advisory read used before opening a payment order. The authoritative
    /// check is the conditional insert in `reserve_slot`.
    pub async fn check_slot_available(
        &self,
        doctor_id: Uuid,
        date: chrono::NaiveDate,
        time_slot: &str,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&time_slot=eq.{}&{}&limit=1",
            doctor_id,
            date,
            urlencoding::encode(time_slot),
            AppointmentStatus::active_filter(),
        );

        let occupied: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(occupied.is_empty())
    }

    /// Create the appointment for a paid booking. Succeeds only if the slot
    /// is still free; the storage constraint decides.
    pub async fn reserve_slot(
        &self,
        reservation: SlotReservation,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if parse_time_slot(&reservation.time_slot).is_none() {
            return Err(AppointmentError::InvalidTimeSlot(
                reservation.time_slot.clone(),
            ));
        }

        let now = Utc::now();
        let body = json!({
            "patient_id": reservation.patient_id,
            "doctor_id": reservation.doctor_id,
            "date": reservation.date,
            "time_slot": reservation.time_slot,
            "status": AppointmentStatus::Scheduled,
            "booking_fee_status": "paid",
            "final_bill_generated": false,
            "is_rated": false,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let result: Vec<Appointment> = match self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
        {
            Ok(rows) => rows,
            Err(DbError::Conflict(_)) => {
                warn!(
                    "Slot {} {} already held for doctor {}",
                    reservation.date, reservation.time_slot, reservation.doctor_id
                );
                return Err(AppointmentError::SlotTaken);
            }
            Err(e) => return Err(AppointmentError::DatabaseError(e.to_string())),
        };

        let appointment = result.into_iter().next().ok_or_else(|| {
            AppointmentError::DatabaseError("Failed to create appointment".to_string())
        })?;

        info!(
            "Reserved slot {} {} for doctor {} (appointment {})",
            appointment.date, appointment.time_slot, appointment.doctor_id, appointment.id
        );
        Ok(appointment)
    }
}
