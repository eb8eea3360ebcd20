// libs/billing-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use inventory_cell::models::InventoryError;

use crate::models::{BillQueryParams, BillingError, CreateBillRequest, UpdateBillRequest};
use crate::services::BillingEngineService;

pub(crate) fn map_billing_error(e: BillingError) -> AppError {
    match e {
        BillingError::NotFound => AppError::NotFound("Bill not found".to_string()),
        BillingError::AppointmentNotFound => {
            AppError::NotFound("Appointment not found".to_string())
        }
        BillingError::Unauthorized => AppError::Auth("Unauthorized access".to_string()),
        BillingError::AppointmentNotCompleted => {
            AppError::BadRequest("Can only create bills for completed appointments".to_string())
        }
        BillingError::AlreadyBilled
        | BillingError::AlreadyPaid
        | BillingError::BillCancelled
        | BillingError::BillImmutable => AppError::Conflict(e.to_string()),
        BillingError::PrescriptionNotFound | BillingError::NoHospitalItems => {
            AppError::BadRequest(e.to_string())
        }
        BillingError::InvalidItem(msg) => AppError::ValidationError(msg),
        BillingError::Inventory(inner) => match inner {
            InventoryError::InsufficientStock { .. } => {
                AppError::InsufficientStock(inner.to_string())
            }
            InventoryError::MedicineNotFound(_) => AppError::NotFound(inner.to_string()),
            InventoryError::NoHospital => AppError::BadRequest(inner.to_string()),
            other => AppError::Database(other.to_string()),
        },
        BillingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_bill(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBillRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_role("doctor") {
        return Err(AppError::Auth("Only doctors can create bills".to_string()));
    }

    let service = BillingEngineService::new(&state);
    let bill = service
        .generate_bill(&user, request, auth.token())
        .await
        .map_err(map_billing_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Bill created successfully",
        "bill": bill
    })))
}

#[axum::debug_handler]
pub async fn get_my_bills(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<BillQueryParams>,
) -> Result<Json<Value>, AppError> {
    let service = BillingEngineService::new(&state);
    let bills = service
        .list_for_user(&user, &params, auth.token())
        .await
        .map_err(map_billing_error)?;

    Ok(Json(json!({
        "success": true,
        "count": bills.len(),
        "bills": bills
    })))
}

#[axum::debug_handler]
pub async fn get_bill(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = BillingEngineService::new(&state);
    let bill = service
        .get_bill(bill_id, auth.token())
        .await
        .map_err(map_billing_error)?;

    if !user.is_self(&bill.patient_id) && !user.is_self(&bill.doctor_id) {
        return Err(AppError::Auth("Unauthorized access".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "bill": bill
    })))
}

/// Doctor-side bill mutation: cancelling an unpaid bill or amending notes.
#[axum::debug_handler]
pub async fn update_bill(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(bill_id): Path<Uuid>,
    Json(request): Json<UpdateBillRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_role("doctor") {
        return Err(AppError::Auth("Only doctors can update bills".to_string()));
    }

    let service = BillingEngineService::new(&state);
    let bill = service
        .update_bill(&user, bill_id, request, auth.token())
        .await
        .map_err(map_billing_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Bill updated successfully",
        "bill": bill
    })))
}
