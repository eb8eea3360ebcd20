// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

pub struct LifecycleService;

impl LifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed.
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!(
            "Validating status transition from {} to {}",
            current_status, new_status
        );

        let valid_transitions = self.get_valid_transitions(current_status);

        if !valid_transitions.contains(new_status) {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                current_status, new_status
            );
            return Err(AppointmentError::InvalidStatusTransition(*current_status));
        }

        Ok(())
    }

    /// Valid next statuses for a given current status. Completed and
    /// Cancelled are terminal; rows are never deleted, only transitioned.
    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::FollowUp,
            ],
            AppointmentStatus::FollowUp => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Cancellation policy: completed and already-cancelled appointments
    /// cannot be cancelled, and a minimum lead time before the slot start
    /// instant applies.
    pub fn validate_cancellation(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
        lead_minutes: i64,
    ) -> Result<(), AppointmentError> {
        if appointment.status.is_terminal() {
            return Err(AppointmentError::InvalidStatusTransition(appointment.status));
        }

        let slot_start = appointment.slot_start().ok_or_else(|| {
            AppointmentError::InvalidTimeSlot(appointment.time_slot.clone())
        })?;

        if slot_start <= now + Duration::minutes(lead_minutes) {
            return Err(AppointmentError::CancellationWindowClosed(lead_minutes));
        }

        Ok(())
    }
}

impl Default for LifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn appointment(status: AppointmentStatus, date: NaiveDate, time_slot: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            date,
            time_slot: time_slot.to_string(),
            status,
            booking_fee_status: crate::models::BookingFeeStatus::Paid,
            final_bill_generated: false,
            is_rated: false,
            rating: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn scheduled_can_complete_cancel_or_follow_up() {
        let lifecycle = LifecycleService::new();

        for target in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::FollowUp,
        ] {
            assert!(lifecycle
                .validate_status_transition(&AppointmentStatus::Scheduled, &target)
                .is_ok());
        }
    }

    #[test]
    fn terminal_statuses_allow_no_transitions() {
        let lifecycle = LifecycleService::new();

        for terminal in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            for target in [
                AppointmentStatus::Scheduled,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::FollowUp,
            ] {
                assert!(lifecycle
                    .validate_status_transition(&terminal, &target)
                    .is_err());
            }
        }
    }

    #[test]
    fn follow_up_cannot_go_back_to_scheduled() {
        let lifecycle = LifecycleService::new();
        assert!(lifecycle
            .validate_status_transition(
                &AppointmentStatus::FollowUp,
                &AppointmentStatus::Scheduled
            )
            .is_err());
    }

    #[test]
    fn cancellation_respects_the_lead_time() {
        let lifecycle = LifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let appt = appointment(AppointmentStatus::Scheduled, date, "10:00-10:30");

        // 2 hours before the slot: fine with a 60 minute lead time.
        let now = date.and_hms_opt(8, 0, 0).unwrap().and_utc();
        assert!(lifecycle.validate_cancellation(&appt, now, 60).is_ok());

        // 30 minutes before the slot: inside the window.
        let now = date.and_hms_opt(9, 30, 0).unwrap().and_utc();
        assert!(matches!(
            lifecycle.validate_cancellation(&appt, now, 60),
            Err(AppointmentError::CancellationWindowClosed(60))
        ));

        // Exactly on the boundary counts as closed.
        let now = date.and_hms_opt(9, 0, 0).unwrap().and_utc();
        assert!(lifecycle.validate_cancellation(&appt, now, 60).is_err());
    }

    #[test]
    fn completed_and_cancelled_appointments_cannot_be_cancelled() {
        let lifecycle = LifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let now = Utc::now();

        let completed = appointment(AppointmentStatus::Completed, date, "10:00-10:30");
        assert!(lifecycle.validate_cancellation(&completed, now, 60).is_err());

        let cancelled = appointment(AppointmentStatus::Cancelled, date, "10:00-10:30");
        assert!(lifecycle.validate_cancellation(&cancelled, now, 60).is_err());
    }

    #[test]
    fn malformed_slot_strings_are_rejected() {
        let lifecycle = LifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let appt = appointment(AppointmentStatus::Scheduled, date, "not-a-slot");

        assert!(matches!(
            lifecycle.validate_cancellation(&appt, Utc::now(), 60),
            Err(AppointmentError::InvalidTimeSlot(_))
        ));
    }
}
