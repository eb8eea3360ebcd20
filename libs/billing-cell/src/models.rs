// libs/billing-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use inventory_cell::models::{InventoryError, StockLine};

// ==============================================================================
// CORE BILL MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub items: Vec<BillItem>,
    /// Total in paise (smallest currency unit). Always the integer sum of
    /// item amount x quantity.
    pub total_amount: i64,
    pub status: BillStatus,
    pub notes: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    /// The physical stock requirements this bill reserves, to be committed
    /// at payment settlement. Manual line items carry no inventory link and
    /// reserve nothing.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items
            .iter()
            .filter_map(|item| {
                item.inventory_item_id.map(|id| StockLine {
                    inventory_item_id: id,
                    medicine_name: item.description.clone(),
                    quantity: item.quantity,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillItem {
    pub description: String,
    pub quantity: i32,
    /// Amount per unit in paise.
    pub amount: i64,
    #[serde(default)]
    pub inventory_item_id: Option<Uuid>,
}

pub fn compute_total(items: &[BillItem]) -> i64 {
    items
        .iter()
        .map(|item| item.amount * item.quantity as i64)
        .sum()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Paid,
    Cancelled,
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillStatus::Unpaid => write!(f, "unpaid"),
            BillStatus::Paid => write!(f, "paid"),
            BillStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// PRESCRIPTION MODELS (read-only input from the prescription store)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub medicines: Vec<PrescribedMedicine>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescribedMedicine {
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub quantity: i32,
    #[serde(default)]
    pub purchase_from_hospital: bool,
    #[serde(default)]
    pub inventory_item_id: Option<Uuid>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBillRequest {
    pub appointment_id: Uuid,
    /// Inventory-backed billing from the prescription (default), or manual
    /// line items for the legacy path.
    #[serde(default = "default_use_inventory")]
    pub use_inventory: bool,
    pub items: Option<Vec<ManualBillItem>>,
    pub notes: Option<String>,
}

fn default_use_inventory() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualBillItem {
    pub description: String,
    pub quantity: Option<i32>,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBillRequest {
    pub status: Option<BillStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BillQueryParams {
    pub status: Option<BillStatus>,
    pub appointment_id: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BillingError {
    #[error("Bill not found")]
    NotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Unauthorized access to bill")]
    Unauthorized,

    #[error("Can only create bills for completed appointments")]
    AppointmentNotCompleted,

    #[error("Bill already generated for this appointment")]
    AlreadyBilled,

    #[error("Bill already paid")]
    AlreadyPaid,

    #[error("Bill has been cancelled")]
    BillCancelled,

    #[error("Cannot modify a paid bill")]
    BillImmutable,

    #[error("No prescription found for this appointment")]
    PrescriptionNotFound,

    #[error("No medicines marked for hospital purchase in prescription")]
    NoHospitalItems,

    #[error("Invalid bill item: {0}")]
    InvalidItem(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
