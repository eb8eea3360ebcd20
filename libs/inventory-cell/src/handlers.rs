// libs/inventory-cell/src/handlers.rs
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

use crate::models::{
    AddInventoryItemRequest, InventoryError, InventoryQueryParams, UpdateInventoryItemRequest,
};
use crate::services::InventoryService;

fn map_inventory_error(e: InventoryError) -> AppError {
    match e {
        InventoryError::MedicineNotFound(name) => {
            AppError::NotFound(format!("Medicine \"{}\" not found in hospital inventory", name))
        }
        InventoryError::NotFound => AppError::NotFound("Inventory item not found".to_string()),
        InventoryError::InsufficientStock { .. } => AppError::InsufficientStock(e.to_string()),
        InventoryError::DuplicateMedicine => AppError::Conflict(
            "Medicine already exists in inventory. Please update the existing item.".to_string(),
        ),
        InventoryError::NoHospital => {
            AppError::BadRequest("Doctor not associated with any hospital".to_string())
        }
        InventoryError::Unauthorized => {
            AppError::Auth("Not authorized to manage this inventory".to_string())
        }
        InventoryError::ValidationError(msg) => AppError::ValidationError(msg),
        InventoryError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn require_doctor(user: &User) -> Result<(), AppError> {
    if user.is_role("doctor") {
        Ok(())
    } else {
        Err(AppError::Auth(
            "Only doctors can manage hospital inventory".to_string(),
        ))
    }
}

#[axum::debug_handler]
pub async fn get_my_hospital_inventory(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<InventoryQueryParams>,
) -> Result<Json<Value>, AppError> {
    require_doctor(&user)?;

    let service = InventoryService::new(&state);
    let items = service
        .hospital_inventory(
            &user.id,
            params.search.as_deref(),
            params.low_stock.unwrap_or(false),
            auth.token(),
        )
        .await
        .map_err(map_inventory_error)?;

    Ok(Json(json!({
        "success": true,
        "count": items.len(),
        "inventory": items
    })))
}

#[axum::debug_handler]
pub async fn add_inventory_item(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<AddInventoryItemRequest>,
) -> Result<Json<Value>, AppError> {
    require_doctor(&user)?;

    let service = InventoryService::new(&state);
    let item = service
        .add_item(&user.id, request, auth.token())
        .await
        .map_err(map_inventory_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Medicine added to inventory",
        "item": item
    })))
}

#[axum::debug_handler]
pub async fn update_inventory_item(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<UpdateInventoryItemRequest>,
) -> Result<Json<Value>, AppError> {
    require_doctor(&user)?;

    let service = InventoryService::new(&state);
    let item = service
        .update_item(&user.id, item_id, request, auth.token())
        .await
        .map_err(map_inventory_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Inventory item updated",
        "item": item
    })))
}

#[axum::debug_handler]
pub async fn get_low_stock_items(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_doctor(&user)?;

    let service = InventoryService::new(&state);
    let items = service
        .low_stock_report(&user.id, auth.token())
        .await
        .map_err(map_inventory_error)?;

    Ok(Json(json!({
        "success": true,
        "count": items.len(),
        "items": items
    })))
}
