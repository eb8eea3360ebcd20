// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    /// Bookable consultation window, e.g. "10:00-10:30".
    pub time_slot: String,
    pub status: AppointmentStatus,
    pub booking_fee_status: BookingFeeStatus,
    pub final_bill_generated: bool,
    pub is_rated: bool,
    pub rating: Option<i16>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The instant the consultation window opens, from the appointment date
    /// and the start component of the slot string.
    pub fn slot_start(&self) -> Option<DateTime<Utc>> {
        slot_start_instant(self.date, &self.time_slot)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.doctor_id.to_string() == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    FollowUp,
}

impl AppointmentStatus {
    /// Terminal appointments no longer occupy their slot.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// PostgREST filter selecting the statuses that hold a slot. The partial
    /// unique index over (doctor_id, date, time_slot) is scoped to the same
    /// set.
    pub fn active_filter() -> &'static str {
        "status=in.(scheduled,follow_up)"
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::FollowUp => write!(f, "follow_up"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingFeeStatus {
    Unpaid,
    Paid,
}

impl fmt::Display for BookingFeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingFeeStatus::Unpaid => write!(f, "unpaid"),
            BookingFeeStatus::Paid => write!(f, "paid"),
        }
    }
}

// ==============================================================================
// SLOT HELPERS
// ==============================================================================

/// Parse a "HH:MM-HH:MM" slot string into its start and end times.
pub fn parse_time_slot(time_slot: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = time_slot.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    (start < end).then_some((start, end))
}

pub fn slot_start_instant(date: NaiveDate, time_slot: &str) -> Option<DateTime<Utc>> {
    let (start, _) = parse_time_slot(time_slot)?;
    Some(date.and_time(start).and_utc())
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// A reservation is a conditional insert: it succeeds only while no
/// non-terminal appointment occupies the (doctor, date, slot) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReservation {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time_slot: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateAppointmentRequest {
    pub rating: i16,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub status: Option<AppointmentStatus>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("This time slot is not available")]
    SlotTaken,

    #[error("Invalid time slot: {0}")]
    InvalidTimeSlot(String),

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Appointments can only be cancelled at least {0} minutes before the slot starts")]
    CancellationWindowClosed(i64),

    #[error("Only completed appointments can be rated")]
    NotCompleted,

    #[error("Appointment already rated")]
    AlreadyRated,

    #[error("Rating must be between 1 and 5")]
    InvalidRating,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
