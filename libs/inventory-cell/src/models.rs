// libs/inventory-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// CORE INVENTORY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: Uuid,
    pub hospital_id: Uuid,
    pub medicine_name: String,
    pub generic_name: Option<String>,
    pub stock_quantity: i32,
    /// Price per unit in paise (smallest currency unit).
    pub price: i64,
    pub unit: Option<String>,
    pub min_stock_level: i32,
    pub is_active: bool,
    pub last_restocked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock_level
    }
}

/// One physical stock requirement of a bill, carried from bill creation to
/// payment settlement. The decrement happens only at settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLine {
    pub inventory_item_id: Uuid,
    pub medicine_name: String,
    pub quantity: i32,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AddInventoryItemRequest {
    pub medicine_name: String,
    pub generic_name: Option<String>,
    pub stock_quantity: i32,
    pub price: i64,
    pub unit: Option<String>,
    pub min_stock_level: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInventoryItemRequest {
    pub stock_quantity: Option<i32>,
    pub price: Option<i64>,
    pub min_stock_level: Option<i32>,
    pub is_active: Option<bool>,
    pub generic_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InventoryQueryParams {
    pub search: Option<String>,
    pub low_stock: Option<bool>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum InventoryError {
    #[error("Medicine \"{0}\" not found in hospital inventory")]
    MedicineNotFound(String),

    #[error("Inventory item not found")]
    NotFound,

    #[error("Insufficient stock for \"{medicine}\". Available: {available}, Required: {requested}")]
    InsufficientStock {
        medicine: String,
        available: i32,
        requested: i32,
    },

    #[error("Medicine already exists in inventory")]
    DuplicateMedicine,

    #[error("Doctor not associated with any hospital")]
    NoHospital,

    #[error("Unauthorized access to inventory")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
