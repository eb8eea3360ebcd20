// libs/appointment-cell/src/handlers.rs
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
    AppointmentError, AppointmentQueryParams, CancelAppointmentRequest, RateAppointmentRequest,
    UpdateAppointmentRequest,
};
use crate::services::AppointmentService;

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::SlotTaken => {
            AppError::Conflict("This time slot is not available".to_string())
        }
        AppointmentError::InvalidTimeSlot(slot) => {
            AppError::ValidationError(format!("Invalid time slot: {}", slot))
        }
        AppointmentError::InvalidStatusTransition(_)
        | AppointmentError::AlreadyRated => AppError::Conflict(e.to_string()),
        AppointmentError::CancellationWindowClosed(_) | AppointmentError::NotCompleted => {
            AppError::BadRequest(e.to_string())
        }
        AppointmentError::InvalidRating => {
            AppError::ValidationError("Rating must be between 1 and 5".to_string())
        }
        AppointmentError::Unauthorized => {
            AppError::Auth("Not authorized to access this appointment".to_string())
        }
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn get_my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentService::new(&state);
    let appointments = service
        .list_for_user(&user, params.status, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "count": appointments.len(),
        "appointments": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    if !appointment.involves(&user.id) {
        return Err(AppError::Auth(
            "Not authorized to access this appointment".to_string(),
        ));
    }

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

/// Doctor-side status/notes update (completing a visit, flagging follow-up).
#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_role("doctor") {
        return Err(AppError::Auth(
            "Only the owning doctor can update an appointment".to_string(),
        ));
    }

    let service = AppointmentService::new(&state);
    let appointment = service
        .update_appointment(&user, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment updated",
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentService::new(&state);
    let appointment = service
        .cancel_appointment(&user, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled",
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn rate_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentService::new(&state);
    let appointment = service
        .rate_appointment(&user, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Rating submitted",
        "appointment": appointment
    })))
}
