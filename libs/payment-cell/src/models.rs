// libs/payment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use appointment_cell::models::Appointment;
use billing_cell::models::{Bill, BillingError};
use inventory_cell::models::InventoryError;

// ==============================================================================
// CORE PAYMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    /// Amount in paise (smallest currency unit).
    pub amount: i64,
    pub currency: String,
    pub payment_type: PaymentType,
    /// Provider session id: globally unique, the idempotency key for
    /// finalization. A given session transitions pending -> completed
    /// exactly once.
    pub provider_session_id: String,
    pub provider_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    /// Booking-fee orders park the pending slot details here, since the
    /// appointment does not exist until finalization. Compensation paths
    /// also record their markers here.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    BookingFee,
    BillPayment,
    Refund,
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentType::BookingFee => write!(f, "booking_fee"),
            PaymentType::BillPayment => write!(f, "bill_payment"),
            PaymentType::Refund => write!(f, "refund"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// Slot details carried in a booking-fee payment's metadata between order
/// creation and finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSlotMetadata {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time_slot: String,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingOrderRequest {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time_slot: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBillOrderRequest {
    pub bill_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: String,
    pub provider_payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentQueryParams {
    #[serde(rename = "type")]
    pub payment_type: Option<PaymentType>,
}

/// Abstract provider push event. Both the webhook transport and the
/// client-driven verify pull funnel into the same finalize entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub session_id: String,
    pub provider_payment_id: Option<String>,
}

/// What a finalized (or replayed) payment produced.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub payment: Payment,
    pub appointment: Option<Appointment>,
    pub bill: Option<Bill>,
    /// True when this call was a duplicate of an already-processed
    /// confirmation and no side effects were re-applied.
    pub replayed: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment record not found")]
    NotFound,

    #[error("Bill not found")]
    BillNotFound,

    #[error("This time slot is no longer available")]
    SlotTaken,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor is not accepting appointments")]
    DoctorNotAvailable,

    #[error("You must clear your pending dues to book further appointments. You have {0} unpaid bills.")]
    PendingDues(usize),

    #[error("Bill already paid")]
    BillAlreadyPaid,

    #[error("Bill has been cancelled")]
    BillCancelled,

    #[error("Unauthorized access to payment")]
    Unauthorized,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment was not completed by the provider")]
    NotCompletedByProvider,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error(transparent)]
    Inventory(InventoryError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<BillingError> for PaymentError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::NotFound => PaymentError::BillNotFound,
            BillingError::AlreadyPaid | BillingError::BillImmutable => PaymentError::BillAlreadyPaid,
            BillingError::BillCancelled => PaymentError::BillCancelled,
            BillingError::Unauthorized => PaymentError::Unauthorized,
            BillingError::Inventory(inner) => PaymentError::Inventory(inner),
            other => PaymentError::DatabaseError(other.to_string()),
        }
    }
}

impl From<InventoryError> for PaymentError {
    fn from(e: InventoryError) -> Self {
        PaymentError::Inventory(e)
    }
}
